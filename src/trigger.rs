//! Per-property lazy-fetch interceptors.
//!
//! One [`DataTrigger`] exists per (service, relationship property) and is
//! shared by every object of the type through a per-type [`TriggerSet`]
//! cached by the root service, so the installation cost is paid once per
//! type rather than once per instance. Per object the trigger moves through
//! Unfetched -> Fetching -> Fetched, with an escape directly to Fetched when
//! a caller supplies the value instead of fetching it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::{ArborError, Result, SharedResult};
use crate::model::{DataObjectDescriptor, IdHasher, ObjectId, OtherHasher, PropertyDescriptor};
use crate::service::{DataService, WeakDataService};

/// The coalescing unit: one shared future per (object, property) fetch.
pub type FetchFuture = Shared<BoxFuture<'static, SharedResult<()>>>;

fn settled() -> FetchFuture {
    future::ready(Ok(())).boxed().shared()
}

pub struct DataTrigger {
    service: WeakDataService,
    property: Arc<PropertyDescriptor>,
    // Fetching and Fetched states live here; an absent entry is Unfetched.
    fetches: Mutex<HashMap<ObjectId, FetchFuture, IdHasher>>,
}

impl DataTrigger {
    pub(crate) fn new(service: &DataService, property: Arc<PropertyDescriptor>) -> Self {
        Self {
            service: service.downgrade(),
            property,
            fetches: Mutex::new(HashMap::default()),
        }
    }
    pub fn property(&self) -> &Arc<PropertyDescriptor> {
        &self.property
    }
    /// The property's current raw slot value, which may be absent until a
    /// fetch resolves and writes through the setter. Triggering a fetch and
    /// reading the value are deliberately decoupled: callers that need the
    /// resolved value await the future from [`request_fetch`] first.
    pub fn current_value(&self, object: ObjectId) -> Option<Value> {
        self.service
            .upgrade()
            .and_then(|service| service.value(object, self.property.name()))
    }
    /// Fetch-if-absent: returns the cached future when one exists (Fetching
    /// or Fetched), otherwise starts a fetch. At most one concurrent fetch
    /// per (object, property).
    pub fn request_fetch(&self, object: ObjectId) -> FetchFuture {
        let mut fetches = self.fetches.lock().unwrap();
        if let Some(in_flight) = fetches.get(&object) {
            return in_flight.clone();
        }
        self.install_fetch(&mut fetches, object)
    }
    /// Force re-fetch, bypassing the Fetched short-circuit.
    pub fn update(&self, object: ObjectId) -> FetchFuture {
        let mut fetches = self.fetches.lock().unwrap();
        self.install_fetch(&mut fetches, object)
    }
    /// Writes the value and marks the property Fetched so no later read
    /// triggers a redundant fetch.
    pub fn set_value(&self, object: ObjectId, value: Value) -> Result<()> {
        let service = self.service.upgrade().ok_or_else(|| {
            ArborError::Invariant(String::from("trigger outlived its service"))
        })?;
        service.set_value(object, self.property.name(), value)
    }
    pub(crate) fn mark_fetched(&self, object: ObjectId) {
        self.fetches.lock().unwrap().insert(object, settled());
    }
    // The placeholder is cached before the future is first polled; a
    // re-entrant request for the same (object, property) joins it instead
    // of recursing into the service while the first fetch is outstanding.
    // A failed fetch stays in the cache: the error reaches all current and
    // future waiters until update() or set_value() replaces the entry.
    fn install_fetch(
        &self,
        fetches: &mut HashMap<ObjectId, FetchFuture, IdHasher>,
        object: ObjectId,
    ) -> FetchFuture {
        let service = self.service.clone();
        let property = Arc::clone(&self.property);
        let fetch = async move {
            let service = service.upgrade().ok_or_else(|| {
                Arc::new(ArborError::Invariant(String::from(
                    "trigger outlived its service",
                )))
            })?;
            service
                .fetch_property_data(object, &property)
                .await
                .map_err(Arc::new)
        }
        .boxed()
        .shared();
        fetches.insert(object, fetch.clone());
        fetch
    }
}

// ------------- TriggerSet -------------
/// The triggers for one type, materialized on the first request for that
/// type and cached by the root service.
pub struct TriggerSet {
    triggers: HashMap<String, Arc<DataTrigger>, OtherHasher>,
}

impl TriggerSet {
    pub(crate) fn for_type(service: &DataService, descriptor: &Arc<DataObjectDescriptor>) -> Self {
        let mut triggers: HashMap<String, Arc<DataTrigger>, OtherHasher> = HashMap::default();
        for property in descriptor.relationships() {
            triggers.insert(
                property.name().to_owned(),
                Arc::new(DataTrigger::new(service, Arc::clone(property))),
            );
        }
        Self { triggers }
    }
    pub fn trigger(&self, name: &str) -> Option<&Arc<DataTrigger>> {
        self.triggers.get(name)
    }
    pub fn len(&self) -> usize {
        self.triggers.len()
    }
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
