//! Credential acquisition for data modules.
//!
//! Each module that needs credentials exposes an [`AuthorizationSource`].
//! The [`AuthorizationManager`] memoizes one authorization round trip per
//! module id: concurrent and repeat requests receive the identical shared
//! future, and a settled outcome, success or rejection, stays memoized for
//! the manager's lifetime. Interactive credential UI plugs in through
//! [`PanelProvider`], with resolved panels cached per module id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::SharedResult;
use crate::model::OtherHasher;

#[derive(Clone, Debug)]
pub struct Authorization {
    credentials: Value,
}

impl Authorization {
    pub fn new(credentials: Value) -> Self {
        Self { credentials }
    }
    pub fn credentials(&self) -> &Value {
        &self.credentials
    }
}

/// When a module's credentials are acquired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationPolicy {
    /// Never through the manager; the module handles credentials itself.
    None,
    /// On the first request that needs them.
    OnDemand,
    /// During startup, before any request.
    UpFront,
}

pub trait AuthorizationSource: Send + Sync {
    fn module_id(&self) -> &str;
    /// Credentials already in hand, if any; the manager short-circuits on
    /// these without a round trip.
    fn authorization(&self) -> Option<Authorization>;
    /// Performs the actual round trip.
    fn authorize(&self) -> BoxFuture<'static, SharedResult<Authorization>>;
}

/// An interactive credential flow for one module.
pub trait AuthorizationPanel: Send + Sync {
    fn present(&self) -> BoxFuture<'static, SharedResult<Authorization>>;
}

pub trait PanelProvider: Send + Sync {
    fn panel_for(&self, module_id: &str) -> Option<Arc<dyn AuthorizationPanel>>;
}

/// One shared authorization round trip per module id.
pub type AuthFuture = Shared<BoxFuture<'static, SharedResult<Authorization>>>;

// ------------- AuthorizationManager -------------
pub struct AuthorizationManager {
    // settled entries stay; a rejection is memoized like a success
    in_flight: Mutex<HashMap<String, AuthFuture, OtherHasher>>,
    sources: Mutex<Vec<(Arc<dyn AuthorizationSource>, AuthorizationPolicy)>>,
    panels: Mutex<HashMap<String, Arc<dyn AuthorizationPanel>, OtherHasher>>,
    provider: Mutex<Option<Arc<dyn PanelProvider>>>,
    pending: Arc<AtomicUsize>,
}

impl AuthorizationManager {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::default()),
            sources: Mutex::new(Vec::new()),
            panels: Mutex::new(HashMap::default()),
            provider: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }
    pub fn register_source(
        &self,
        source: Arc<dyn AuthorizationSource>,
        policy: AuthorizationPolicy,
    ) {
        self.sources.lock().unwrap().push((source, policy));
    }
    pub fn set_panel_provider(&self, provider: Arc<dyn PanelProvider>) {
        *self.provider.lock().unwrap() = Some(provider);
    }
    /// The panel for a module, resolved through the provider on first use
    /// and cached after.
    pub fn panel_for_module(&self, module_id: &str) -> Option<Arc<dyn AuthorizationPanel>> {
        if let Some(panel) = self.panels.lock().unwrap().get(module_id) {
            return Some(Arc::clone(panel));
        }
        let provider = self.provider.lock().unwrap().clone()?;
        let panel = provider.panel_for(module_id)?;
        self.panels
            .lock()
            .unwrap()
            .insert(module_id.to_owned(), Arc::clone(&panel));
        Some(panel)
    }
    /// True while at least one round trip is outstanding.
    pub fn has_pending_services(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }
    /// Authorizes one module. Sources that already hold credentials resolve
    /// immediately; everything else coalesces onto the module's memoized
    /// round trip. There is no retry path for a memoized rejection short of
    /// a new manager.
    pub fn authorize_service(&self, source: Arc<dyn AuthorizationSource>) -> AuthFuture {
        if let Some(authorization) = source.authorization() {
            return future::ready(Ok(authorization)).boxed().shared();
        }
        let module = source.module_id().to_owned();
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pending) = in_flight.get(&module) {
            return pending.clone();
        }
        let pending_count = Arc::clone(&self.pending);
        let fetch = async move {
            pending_count.fetch_add(1, Ordering::SeqCst);
            let outcome = source.authorize().await;
            pending_count.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
        .boxed()
        .shared();
        in_flight.insert(module, fetch.clone());
        fetch
    }
    /// Runs the round trip for every registered up-front source, resolving
    /// once all have settled.
    pub async fn authorize_up_front(&self) -> SharedResult<()> {
        let fetches: Vec<AuthFuture> = self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, policy)| *policy == AuthorizationPolicy::UpFront)
            .map(|(source, _)| self.authorize_service(Arc::clone(source)))
            .collect();
        for outcome in future::join_all(fetches).await {
            outcome?;
        }
        Ok(())
    }
}

impl Default for AuthorizationManager {
    fn default() -> Self {
        Self::new()
    }
}
