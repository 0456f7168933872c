use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;
use tokio::sync::oneshot;

use arbor::authorize::{
    Authorization, AuthorizationManager, AuthorizationPanel, AuthorizationPolicy,
    AuthorizationSource, PanelProvider,
};
use arbor::error::{ArborError, SharedResult};

struct TestSource {
    module: String,
    existing: Option<Authorization>,
    reject: bool,
    round_trips: Arc<AtomicUsize>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Mutex<Option<oneshot::Sender<()>>>,
}

impl TestSource {
    fn new(module: &str) -> Self {
        Self {
            module: module.to_owned(),
            existing: None,
            reject: false,
            round_trips: Arc::new(AtomicUsize::new(0)),
            gate: Mutex::new(None),
            entered: Mutex::new(None),
        }
    }
}

impl AuthorizationSource for TestSource {
    fn module_id(&self) -> &str {
        &self.module
    }
    fn authorization(&self) -> Option<Authorization> {
        self.existing.clone()
    }
    fn authorize(&self) -> BoxFuture<'static, SharedResult<Authorization>> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let reject = self.reject;
        let gate = self.gate.lock().unwrap().take();
        let entered = self.entered.lock().unwrap().take();
        async move {
            if let Some(entered) = entered {
                let _ = entered.send(());
            }
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if reject {
                Err(Arc::new(ArborError::Authorization(String::from("denied"))))
            } else {
                Ok(Authorization::new(json!({ "token": "abc" })))
            }
        }
        .boxed()
    }
}

struct StaticPanel {
    token: String,
}

impl AuthorizationPanel for StaticPanel {
    fn present(&self) -> BoxFuture<'static, SharedResult<Authorization>> {
        let token = self.token.clone();
        async move { Ok(Authorization::new(json!({ "token": token }))) }.boxed()
    }
}

struct CountingProvider {
    resolutions: Arc<AtomicUsize>,
}

impl PanelProvider for CountingProvider {
    fn panel_for(&self, module_id: &str) -> Option<Arc<dyn AuthorizationPanel>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(StaticPanel {
            token: module_id.to_owned(),
        }))
    }
}

#[tokio::test]
async fn panels_resolve_once_per_module() {
    let manager = AuthorizationManager::new();
    assert!(manager.panel_for_module("crm").is_none(), "no provider installed yet");

    let resolutions = Arc::new(AtomicUsize::new(0));
    manager.set_panel_provider(Arc::new(CountingProvider {
        resolutions: Arc::clone(&resolutions),
    }));
    let first = manager.panel_for_module("crm").expect("resolved through the provider");
    let second = manager.panel_for_module("crm").expect("cached");
    assert!(Arc::ptr_eq(&first, &second), "repeat requests return the cached panel");
    assert_eq!(resolutions.load(Ordering::SeqCst), 1, "one resolution per module");

    manager.panel_for_module("billing").expect("other modules resolve on their own");
    assert_eq!(resolutions.load(Ordering::SeqCst), 2);

    let authorization = first.present().await.expect("panel flow resolves");
    assert_eq!(authorization.credentials(), &json!({ "token": "crm" }));
}

#[tokio::test]
async fn concurrent_requests_share_one_round_trip() {
    let manager = AuthorizationManager::new();
    let source = Arc::new(TestSource::new("crm"));
    let round_trips = Arc::clone(&source.round_trips);

    let first = manager.authorize_service(source.clone());
    let second = manager.authorize_service(source.clone());
    assert!(first.ptr_eq(&second), "same module yields the identical future");

    let (a, b) = tokio::join!(first, second);
    a.expect("authorized");
    b.expect("authorized");
    assert_eq!(round_trips.load(Ordering::SeqCst), 1, "one round trip for the module");

    // still memoized after settling
    let third = manager.authorize_service(source.clone());
    third.await.expect("authorized from memo");
    assert_eq!(round_trips.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_rejection_is_memoized_like_a_success() {
    let manager = AuthorizationManager::new();
    let mut source = TestSource::new("crm");
    source.reject = true;
    let source = Arc::new(source);
    let round_trips = Arc::clone(&source.round_trips);

    let first = manager.authorize_service(source.clone()).await.unwrap_err();
    let second = manager.authorize_service(source.clone()).await.unwrap_err();
    assert!(Arc::ptr_eq(&first, &second), "waiters share the rejection");
    assert_eq!(round_trips.load(Ordering::SeqCst), 1, "no retry round trip");
}

#[tokio::test]
async fn existing_credentials_short_circuit() {
    let manager = AuthorizationManager::new();
    let mut source = TestSource::new("crm");
    source.existing = Some(Authorization::new(json!({ "token": "kept" })));
    let source = Arc::new(source);
    let round_trips = Arc::clone(&source.round_trips);

    let authorization = manager
        .authorize_service(source.clone())
        .await
        .expect("resolved from existing credentials");
    assert_eq!(authorization.credentials(), &json!({ "token": "kept" }));
    assert_eq!(round_trips.load(Ordering::SeqCst), 0, "no round trip needed");
}

#[tokio::test]
async fn up_front_policy_authorizes_at_startup_only() {
    let manager = AuthorizationManager::new();
    let eager = Arc::new(TestSource::new("crm"));
    let lazy = Arc::new(TestSource::new("billing"));
    manager.register_source(eager.clone(), AuthorizationPolicy::UpFront);
    manager.register_source(lazy.clone(), AuthorizationPolicy::OnDemand);

    manager.authorize_up_front().await.expect("startup authorization ok");
    assert_eq!(eager.round_trips.load(Ordering::SeqCst), 1);
    assert_eq!(lazy.round_trips.load(Ordering::SeqCst), 0, "on-demand waits for a request");
}

#[tokio::test]
async fn pending_flag_tracks_outstanding_round_trips() {
    let manager = Arc::new(AuthorizationManager::new());
    let source = TestSource::new("crm");
    let (release, gate) = oneshot::channel();
    let (entered_tx, entered) = oneshot::channel();
    *source.gate.lock().unwrap() = Some(gate);
    *source.entered.lock().unwrap() = Some(entered_tx);
    let source = Arc::new(source);

    assert!(!manager.has_pending_services());
    let pending = manager.authorize_service(source.clone());
    let waiter = tokio::spawn(pending);
    entered.await.expect("round trip started");
    assert!(manager.has_pending_services(), "round trip outstanding");

    release.send(()).expect("gate released");
    waiter.await.unwrap().expect("authorized");
    assert!(!manager.has_pending_services(), "round trip settled");
}
