//! The data service tree.
//!
//! A service is either a composite node that dispatches fetches to its
//! children by type, or a leaf node that owns a [`RawDataSource`] and
//! ingests raw records. The unparented root exclusively owns the object
//! arena, the type registry, the per-type trigger caches, the
//! created/changed sets, and the offline replay machinery. Child services
//! never write those structures directly; they call back into root methods.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::{self, BoxFuture};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ArborError, Result, SharedResult};
use crate::expr::Scope;
use crate::model::{
    Cardinality, DataObjectDescriptor, DescriptorKeeper, IdHasher, ObjectId, ObjectStore,
    OtherHasher, PropertyDescriptor, RawRecord,
};
use crate::offline::{self, OfflineOperation, OfflineStore};
use crate::raw::{DataMapping, RawDataSource};
use crate::stream::{Criteria, DataSelector, DataStream};
use crate::trigger::{FetchFuture, TriggerSet};

/// Replay hook for offline operations whose type has no raw source behind
/// it; registered per type name on the root.
pub type OfflineHandler =
    Arc<dyn Fn(DataService, OfflineOperation) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// State owned exclusively by the root service. Every node carries one,
// but only the unparented node's is ever populated.
struct RootState {
    store: Mutex<ObjectStore>,
    descriptors: Mutex<DescriptorKeeper>,
    triggers: Mutex<HashMap<String, Arc<TriggerSet>, OtherHasher>>,
    created: Mutex<HashSet<ObjectId, IdHasher>>,
    changed: Mutex<HashSet<ObjectId, IdHasher>>,
    online: AtomicBool,
    offline_handlers: Mutex<HashMap<String, OfflineHandler, OtherHasher>>,
}

impl RootState {
    fn new() -> Self {
        Self {
            store: Mutex::new(ObjectStore::new()),
            descriptors: Mutex::new(DescriptorKeeper::new()),
            triggers: Mutex::new(HashMap::default()),
            created: Mutex::new(HashSet::default()),
            changed: Mutex::new(HashSet::default()),
            online: AtomicBool::new(true),
            offline_handlers: Mutex::new(HashMap::default()),
        }
    }
}

pub(crate) struct ServiceInner {
    name: String,
    // None in the handled list is the "all types" catch-all registration.
    handled_types: Vec<Option<String>>,
    source: Option<Box<dyn RawDataSource>>,
    mapping: Mutex<Option<Arc<dyn DataMapping>>>,
    offline_store: Mutex<Option<Arc<dyn OfflineStore>>>,
    parent: Mutex<Weak<ServiceInner>>,
    children: Mutex<Vec<DataService>>,
    children_by_type: Mutex<HashMap<Option<String>, Vec<DataService>, OtherHasher>>,
    child_types: Mutex<Vec<Option<String>>>,
    root: RootState,
}

/// A node in the data service tree. Cloning is cheap and clones refer to
/// the same node.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<ServiceInner>,
}

impl PartialEq for DataService {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for DataService {}

#[derive(Clone)]
pub struct WeakDataService {
    inner: Weak<ServiceInner>,
}

impl WeakDataService {
    pub fn upgrade(&self) -> Option<DataService> {
        self.inner.upgrade().map(|inner| DataService { inner })
    }
}

impl DataService {
    fn build(
        name: &str,
        handled_types: Vec<Option<String>>,
        source: Option<Box<dyn RawDataSource>>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                name: name.to_owned(),
                handled_types,
                source,
                mapping: Mutex::new(None),
                offline_store: Mutex::new(None),
                parent: Mutex::new(Weak::new()),
                children: Mutex::new(Vec::new()),
                children_by_type: Mutex::new(HashMap::default()),
                child_types: Mutex::new(Vec::new()),
                root: RootState::new(),
            }),
        }
    }
    /// A composite node: dispatches to children, serves nothing itself.
    pub fn new(name: &str) -> Self {
        Self::build(name, Vec::new(), None)
    }
    /// A leaf node serving the listed types from one raw source.
    pub fn leaf(name: &str, types: &[&str], source: Box<dyn RawDataSource>) -> Self {
        let handled = types.iter().map(|t| Some((*t).to_owned())).collect();
        Self::build(name, handled, Some(source))
    }
    /// A leaf node registered under the "all types" catch-all key.
    pub fn catch_all(name: &str, source: Box<dyn RawDataSource>) -> Self {
        Self::build(name, vec![None], Some(source))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
    pub(crate) fn downgrade(&self) -> WeakDataService {
        WeakDataService {
            inner: Arc::downgrade(&self.inner),
        }
    }
    pub fn set_mapping(&self, mapping: Arc<dyn DataMapping>) {
        *self.inner.mapping.lock().unwrap() = Some(mapping);
    }
    pub fn set_offline_store(&self, store: Arc<dyn OfflineStore>) {
        *self.inner.offline_store.lock().unwrap() = Some(store);
    }
    pub fn offline_store(&self) -> Option<Arc<dyn OfflineStore>> {
        self.inner.offline_store.lock().unwrap().clone()
    }

    // ------------- Tree structure -------------
    pub fn parent_service(&self) -> Option<DataService> {
        self.inner
            .parent
            .lock()
            .unwrap()
            .upgrade()
            .map(|inner| DataService { inner })
    }
    pub fn is_root(&self) -> bool {
        self.parent_service().is_none()
    }
    pub fn root_service(&self) -> DataService {
        let mut current = self.clone();
        while let Some(parent) = current.parent_service() {
            current = parent;
        }
        current
    }
    pub fn children(&self) -> Vec<DataService> {
        self.inner.children.lock().unwrap().clone()
    }
    /// Attaches `child`. A service has at most one parent at a time, so the
    /// child is detached from any existing parent first.
    pub fn add_child_service(&self, child: &DataService) {
        if let Some(previous) = child.parent_service() {
            previous.remove_child_service(child);
        }
        *child.inner.parent.lock().unwrap() = Arc::downgrade(&self.inner);
        self.inner.children.lock().unwrap().push(child.clone());
        let mut by_type = self.inner.children_by_type.lock().unwrap();
        let mut types = self.inner.child_types.lock().unwrap();
        for handled in &child.inner.handled_types {
            let services = match by_type.entry(handled.clone()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    types.push(handled.clone());
                    e.insert(Vec::new())
                }
            };
            services.push(child.clone());
        }
    }
    pub fn remove_child_service(&self, child: &DataService) {
        self.inner.children.lock().unwrap().retain(|c| c != child);
        let mut by_type = self.inner.children_by_type.lock().unwrap();
        let mut types = self.inner.child_types.lock().unwrap();
        for handled in &child.inner.handled_types {
            if let Some(services) = by_type.get_mut(handled) {
                services.retain(|c| c != child);
                // an array leaves the map exactly when it empties, and the
                // aggregate type list entry leaves with it
                if services.is_empty() {
                    by_type.remove(handled);
                    types.retain(|t| t != handled);
                }
            }
        }
        *child.inner.parent.lock().unwrap() = Weak::new();
    }
    /// First-match dispatch: the first child registered for the type, then
    /// the first catch-all child, then none. Registration order decides
    /// ties; this is never a merge.
    pub fn child_service_for_type(&self, type_name: &str) -> Option<DataService> {
        let by_type = self.inner.children_by_type.lock().unwrap();
        by_type
            .get(&Some(type_name.to_owned()))
            .and_then(|services| services.first().cloned())
            .or_else(|| by_type.get(&None).and_then(|services| services.first().cloned()))
    }
    pub fn child_types(&self) -> Vec<Option<String>> {
        self.inner.child_types.lock().unwrap().clone()
    }
    fn handles_type(&self, type_name: &str) -> bool {
        self.inner
            .handled_types
            .iter()
            .any(|t| t.is_none() || t.as_deref() == Some(type_name))
    }
    /// Walks the subtree to the leaf that ultimately serves the type.
    pub fn responsible_for_type(&self, type_name: &str) -> Option<DataService> {
        if self.inner.source.is_some() && self.handles_type(type_name) {
            return Some(self.clone());
        }
        self.child_service_for_type(type_name)
            .and_then(|child| child.responsible_for_type(type_name))
    }

    // ------------- Type registry -------------
    pub fn register_type(&self, descriptor: DataObjectDescriptor) -> Arc<DataObjectDescriptor> {
        let root = self.root_service();
        let (kept, _previously_kept) = root
            .inner
            .root
            .descriptors
            .lock()
            .unwrap()
            .keep(descriptor);
        kept
    }
    pub fn descriptor(&self, name: &str) -> Option<Arc<DataObjectDescriptor>> {
        self.root_service().inner.root.descriptors.lock().unwrap().get(name)
    }
    pub fn descriptor_of(&self, object: ObjectId) -> Option<Arc<DataObjectDescriptor>> {
        self.root_service().inner.root.store.lock().unwrap().descriptor_of(object)
    }

    /// The triggers for a type, materialized on first request and cached by
    /// the root; every instance of the type shares the one installation.
    pub fn triggers_for_type(&self, descriptor: &Arc<DataObjectDescriptor>) -> Arc<TriggerSet> {
        let root = self.root_service();
        let mut cache = root.inner.root.triggers.lock().unwrap();
        match cache.entry(descriptor.name().to_owned()) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                debug!(r#type = %descriptor.name(), "installing triggers");
                let set = Arc::new(TriggerSet::for_type(&root, descriptor));
                e.insert(Arc::clone(&set));
                set
            }
        }
    }

    // ------------- Objects -------------
    fn materialize(&self, descriptor: &Arc<DataObjectDescriptor>) -> ObjectId {
        let root = self.root_service();
        let _ = root.triggers_for_type(descriptor);
        let object = root
            .inner
            .root
            .store
            .lock()
            .unwrap()
            .create(Arc::clone(descriptor));
        object
    }
    /// Creates a new tracked object of the type and tracks it as created
    /// until it is first saved.
    pub fn create_data_object(&self, descriptor: &Arc<DataObjectDescriptor>) -> ObjectId {
        let root = self.root_service();
        let object = root.materialize(descriptor);
        root.inner.root.created.lock().unwrap().insert(object);
        object
    }
    /// Resolves the tracked object for a raw record.
    // TODO: resolve against previously tracked objects by identifier
    // instead of always constructing a new one.
    pub fn get_data_object(
        &self,
        descriptor: &Arc<DataObjectDescriptor>,
        _record: &RawRecord,
    ) -> ObjectId {
        self.root_service().materialize(descriptor)
    }
    pub fn value(&self, object: ObjectId, name: &str) -> Option<Value> {
        self.root_service().inner.root.store.lock().unwrap().value(object, name)
    }
    pub fn record(&self, object: ObjectId) -> Option<RawRecord> {
        self.root_service().inner.root.store.lock().unwrap().record(object)
    }
    /// Sets a property, tracks the object as changed, and marks any
    /// relationship trigger Fetched so no later read re-fetches.
    pub fn set_value(&self, object: ObjectId, name: &str, value: Value) -> Result<()> {
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        root.inner
            .root
            .store
            .lock()
            .unwrap()
            .set_value(object, name, value)?;
        root.inner.root.changed.lock().unwrap().insert(object);
        if let Some(property) = descriptor.property(name) {
            if property.is_relationship() {
                let triggers = root.triggers_for_type(&descriptor);
                if let Some(trigger) = triggers.trigger(name) {
                    trigger.mark_fetched(object);
                }
            }
        }
        Ok(())
    }
    /// A slot write for the ingestion path: no change tracking, no trigger
    /// transition. Fails for properties the type does not declare.
    pub fn set_raw_value(&self, object: ObjectId, name: &str, value: Value) -> Result<()> {
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        if descriptor.property(name).is_none() {
            return Err(ArborError::Mapping(format!(
                "no property '{}' on type '{}'",
                name,
                descriptor.name()
            )));
        }
        let mut store = root.inner.root.store.lock().unwrap();
        store.set_value(object, name, value)
    }
    pub fn created_data_objects(&self) -> Vec<ObjectId> {
        self.root_service()
            .inner
            .root
            .created
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }
    pub fn changed_data_objects(&self) -> Vec<ObjectId> {
        self.root_service()
            .inner
            .root
            .changed
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    // ------------- Fetching -------------
    /// Dispatches a fetch and returns its stream. A type name works as
    /// selector shorthand. Dispatch failures and synchronous errors are
    /// routed into the stream's error signal; fetch never throws past this
    /// boundary.
    pub fn fetch_data<S: Into<DataSelector>>(
        &self,
        selector: S,
        stream: Option<DataStream>,
    ) -> DataStream {
        let selector = selector.into();
        let stream = stream.unwrap_or_default();
        stream.set_selector(selector.clone());
        if let Some(source) = &self.inner.source {
            if self.handles_type(selector.type_name()) {
                let producer = source.fetch_raw_data(self.clone(), selector, stream.clone());
                let failures = stream.clone();
                tokio::spawn(async move {
                    if let Err(error) = producer.await {
                        failures.data_error(error);
                    }
                });
                return stream;
            }
        }
        match self.child_service_for_type(selector.type_name()) {
            Some(child) => {
                child.fetch_data(selector, Some(stream.clone()));
            }
            None => {
                stream.data_error(ArborError::Dispatch(selector.type_name().to_owned()));
            }
        }
        stream
    }

    // ------------- Raw-data ingestion -------------
    /// Ingests one decoded batch: offers it for offline persistence while
    /// online, resolves each record to a tracked object, maps it, and pushes
    /// the mapped batch into the stream in one append.
    pub fn add_raw_data(&self, stream: &DataStream, records: Vec<RawRecord>) -> Result<Vec<ObjectId>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.root_service();
        let selector = stream.selector();
        if root.is_online() {
            if let Some(source) = &self.inner.source {
                source.add_offline_data(self, selector.as_ref(), &records)?;
            }
        }
        let type_name = selector
            .map(|s| s.type_name().to_owned())
            .ok_or_else(|| ArborError::Invariant(String::from("stream has no selector")))?;
        let descriptor = root
            .descriptor(&type_name)
            .ok_or_else(|| ArborError::Mapping(format!("unregistered type '{}'", type_name)))?;
        let mut mapped = Vec::with_capacity(records.len());
        for record in &records {
            let object = root.get_data_object(&descriptor, record);
            self.map_from_raw_data(object, record)?;
            mapped.push(object);
        }
        stream.add_data(mapped.clone());
        Ok(mapped)
    }
    /// Terminal forwarders for the raw pipeline; never overridden.
    pub fn raw_data_done(&self, stream: &DataStream) {
        stream.data_done();
    }
    pub fn raw_data_error(&self, stream: &DataStream, error: ArborError) {
        stream.data_error(error);
    }
    fn map_from_raw_data(&self, object: ObjectId, record: &RawRecord) -> Result<()> {
        let mapping = self.inner.mapping.lock().unwrap().clone();
        if let Some(mapping) = mapping {
            return mapping.map_from_raw_data(self, object, record);
        }
        // no configured mapping: copy fields declared on the type, warn on
        // the rest and keep going
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        for (name, value) in record {
            if descriptor.property(name).is_some() {
                root.set_raw_value(object, name, value.clone())?;
            } else {
                warn!(property = %name, r#type = %descriptor.name(), "no declared property for raw field");
            }
        }
        Ok(())
    }

    // ------------- Property fetching -------------
    /// Ensures the named properties are fetched, coalescing identical
    /// in-flight fetches across the requested names, and resolves once all
    /// distinct underlying fetches resolve. Fetch-if-absent.
    pub async fn get_object_properties(&self, object: ObjectId, names: &[&str]) -> SharedResult<()> {
        let fetches = self.property_fetches(object, names, false).map_err(Arc::new)?;
        for outcome in future::join_all(fetches).await {
            outcome?;
        }
        Ok(())
    }
    /// Like [`get_object_properties`](Self::get_object_properties) but
    /// forces a re-fetch, bypassing the Fetched short-circuit.
    pub async fn update_object_properties(&self, object: ObjectId, names: &[&str]) -> SharedResult<()> {
        let fetches = self.property_fetches(object, names, true).map_err(Arc::new)?;
        for outcome in future::join_all(fetches).await {
            outcome?;
        }
        Ok(())
    }
    fn property_fetches(
        &self,
        object: ObjectId,
        names: &[&str],
        force: bool,
    ) -> Result<Vec<FetchFuture>> {
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        let triggers = root.triggers_for_type(&descriptor);
        // the extras list is allocated only once a second distinct fetch
        // shows up; a single requested property stays allocation-free
        let mut first: Option<FetchFuture> = None;
        let mut rest: Option<Vec<FetchFuture>> = None;
        for name in names {
            let Some(trigger) = triggers.trigger(name) else {
                continue;
            };
            let fetch = if force {
                trigger.update(object)
            } else {
                trigger.request_fetch(object)
            };
            match &first {
                None => first = Some(fetch),
                Some(existing) => {
                    if existing.ptr_eq(&fetch) {
                        continue;
                    }
                    let extras = rest.get_or_insert_with(Vec::new);
                    if extras.iter().any(|f| f.ptr_eq(&fetch)) {
                        continue;
                    }
                    extras.push(fetch);
                }
            }
        }
        let mut fetches = Vec::new();
        if let Some(first) = first {
            fetches.push(first);
        }
        if let Some(extras) = rest {
            fetches.extend(extras);
        }
        Ok(fetches)
    }
    /// The trigger's fetch hook: builds a selector for the relationship's
    /// destination type from its criteria expressions, fetches through the
    /// root, and writes the result into the property slot.
    pub(crate) async fn fetch_property_data(
        &self,
        object: ObjectId,
        property: &Arc<PropertyDescriptor>,
    ) -> Result<()> {
        let root = self.root_service();
        let destination = property
            .destination_type()
            .ok_or_else(|| {
                ArborError::Invariant(format!("property '{}' is not a relationship", property.name()))
            })?
            .to_owned();
        let record = root.record(object).ok_or(ArborError::UnknownObject(object))?;
        let scope_root = Value::Object(record);
        let scope = Scope::new(&scope_root);
        let mut pairs = RawRecord::new();
        for (name, expression) in property.criteria_expressions() {
            pairs.insert(name.clone(), expression.evaluate(&scope));
        }
        let criteria = if pairs.is_empty() {
            Criteria::None
        } else {
            Criteria::KeyValues(pairs)
        };
        let selector = DataSelector::with_type_and_criteria(&destination, criteria);
        let stream = root.fetch_data(selector, None);
        let results = stream
            .completed()
            .await
            .map_err(|error| ArborError::Fetch(error.to_string()))?;
        let value = match property.cardinality() {
            Cardinality::One => results
                .first()
                .map(|id| Value::from(*id))
                .unwrap_or(Value::Null),
            Cardinality::Many => Value::Array(results.iter().map(|id| Value::from(*id)).collect()),
        };
        let mut store = root.inner.root.store.lock().unwrap();
        store.set_value(object, property.name(), value)
    }

    // ------------- Saving and deleting -------------
    /// Routes the save to the responsible leaf's source; on success the
    /// object leaves the created set.
    pub async fn save_data_object(&self, object: ObjectId) -> Result<()> {
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        let record = root.record(object).ok_or(ArborError::UnknownObject(object))?;
        let service = root
            .responsible_for_type(descriptor.name())
            .ok_or_else(|| ArborError::Dispatch(descriptor.name().to_owned()))?;
        let source = service.inner.source.as_ref().ok_or_else(|| {
            ArborError::Invariant(String::from("responsible service has no source"))
        })?;
        source
            .save_data_object(service.clone(), object, record)
            .await?;
        root.inner.root.created.lock().unwrap().remove(&object);
        Ok(())
    }
    /// Routes the delete to the responsible leaf's source, then drops the
    /// object from tracking and evicts it from the arena.
    pub async fn delete_data_object(&self, object: ObjectId) -> Result<()> {
        let root = self.root_service();
        let descriptor = root
            .descriptor_of(object)
            .ok_or(ArborError::UnknownObject(object))?;
        let record = root.record(object).ok_or(ArborError::UnknownObject(object))?;
        let service = root
            .responsible_for_type(descriptor.name())
            .ok_or_else(|| ArborError::Dispatch(descriptor.name().to_owned()))?;
        let source = service.inner.source.as_ref().ok_or_else(|| {
            ArborError::Invariant(String::from("responsible service has no source"))
        })?;
        source
            .delete_data_object(service.clone(), object, record)
            .await?;
        root.inner.root.created.lock().unwrap().remove(&object);
        root.inner.root.changed.lock().unwrap().remove(&object);
        root.inner.root.store.lock().unwrap().evict(object);
        Ok(())
    }

    // ------------- Offline -------------
    pub fn is_online(&self) -> bool {
        self.root_service().inner.root.online.load(Ordering::SeqCst)
    }
    /// Flips the online flag; the offline-to-online edge replays the
    /// recorded offline operations across the whole subtree.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        let root = self.root_service();
        let was_online = root.inner.root.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!(service = %root.name(), "going online, replaying offline operations");
            root.go_online().await
        } else {
            Ok(())
        }
    }
    /// Removes one replayed operation from this service's durable log.
    /// Sources call this after each operation they apply, so a mid-batch
    /// failure leaves exactly the unapplied operations logged.
    pub fn offline_operation_performed(&self, operation: &OfflineOperation) -> Result<()> {
        if let Some(store) = self.offline_store() {
            store.delete_operation(operation.index())?;
        }
        Ok(())
    }
    pub fn register_offline_handler(&self, type_name: &str, handler: OfflineHandler) {
        self.root_service()
            .inner
            .root
            .offline_handlers
            .lock()
            .unwrap()
            .insert(type_name.to_owned(), handler);
    }
    /// Aggregates recorded offline operations across the subtree, tagging
    /// each with the service whose log produced it.
    pub fn read_offline_operations(&self) -> Result<Vec<(DataService, OfflineOperation)>> {
        let mut operations = Vec::new();
        if let Some(store) = self.offline_store() {
            for operation in store.read_operations()? {
                operations.push((self.clone(), operation));
            }
        }
        for child in self.children() {
            operations.extend(child.read_offline_operations()?);
        }
        Ok(operations)
    }
    pub async fn go_online(&self) -> Result<()> {
        let mut tagged = self.read_offline_operations()?;
        tagged.sort_by(|a, b| offline::compare(&a.1, &b.1));
        self.perform_offline_operations(tagged).await
    }
    /// Replays operations in the given order, one pass, batching
    /// consecutive operations of the same service into one delegated call.
    /// Each operation is deleted from its durable log only after it has
    /// been performed; a failure halts the remaining operations with the
    /// already-performed ones staying deleted.
    pub async fn perform_offline_operations(
        &self,
        operations: Vec<(DataService, OfflineOperation)>,
    ) -> Result<()> {
        let mut start = 0;
        while start < operations.len() {
            let service = operations[start].0.clone();
            let mut end = start + 1;
            while end < operations.len() && operations[end].0 == service {
                end += 1;
            }
            let batch: Vec<OfflineOperation> =
                operations[start..end].iter().map(|(_, op)| op.clone()).collect();
            self.perform_batch(&service, batch).await?;
            start = end;
        }
        Ok(())
    }
    async fn perform_batch(
        &self,
        service: &DataService,
        batch: Vec<OfflineOperation>,
    ) -> Result<()> {
        if let Some(source) = &service.inner.source {
            source
                .perform_offline_operations(service.clone(), batch.clone())
                .await?;
            // sources report per-operation progress through
            // offline_operation_performed; this sweep drains whatever a
            // source left behind on success
            if let Some(store) = service.offline_store() {
                for operation in &batch {
                    store.delete_operation(operation.index())?;
                }
            }
            return Ok(());
        }
        // the producing service has no raw source: dispatch per type to a
        // registered handler, or fall back to the leaf serving the type
        let root = self.root_service();
        for operation in batch {
            let handler = root
                .inner
                .root
                .offline_handlers
                .lock()
                .unwrap()
                .get(operation.type_name())
                .cloned();
            match handler {
                Some(handler) => handler(service.clone(), operation.clone()).await?,
                None => self.perform_generic_offline_operation(&operation).await?,
            }
            if let Some(store) = service.offline_store() {
                store.delete_operation(operation.index())?;
            }
        }
        Ok(())
    }
    async fn perform_generic_offline_operation(&self, operation: &OfflineOperation) -> Result<()> {
        match self.root_service().responsible_for_type(operation.type_name()) {
            Some(responsible) => {
                if let Some(source) = &responsible.inner.source {
                    source
                        .perform_offline_operations(responsible.clone(), vec![operation.clone()])
                        .await?;
                }
                Ok(())
            }
            None => {
                warn!(
                    r#type = %operation.type_name(),
                    id = %operation.data_id(),
                    "no handler for offline operation"
                );
                Ok(())
            }
        }
    }
}
