use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;

use arbor::error::{ArborError, Result};
use arbor::expr::{ExpressionCompiler, KeyPathCompiler};
use arbor::model::{Cardinality, DataObjectDescriptor, PropertyDescriptor, RawRecord};
use arbor::raw::{MemorySource, RawDataSource};
use arbor::service::DataService;
use arbor::stream::{DataSelector, DataStream};

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(record) => record,
        _ => panic!("not a record"),
    }
}

// Counts fetches for one type, delegating the work to an inner source.
struct CountingSource {
    inner: MemorySource,
    counted_type: String,
    fetches: Arc<AtomicUsize>,
}

impl RawDataSource for CountingSource {
    fn fetch_raw_data(
        &self,
        service: DataService,
        selector: DataSelector,
        stream: DataStream,
    ) -> BoxFuture<'static, Result<()>> {
        if selector.type_name() == self.counted_type {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.fetch_raw_data(service, selector, stream)
    }
}

// Fails fetches for one type while the flag is set, counting attempts.
struct FlakySource {
    inner: MemorySource,
    flaky_type: String,
    failing: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl RawDataSource for FlakySource {
    fn fetch_raw_data(
        &self,
        service: DataService,
        selector: DataSelector,
        stream: DataStream,
    ) -> BoxFuture<'static, Result<()>> {
        if selector.type_name() == self.flaky_type {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return async move { Err(ArborError::Fetch(String::from("backend unavailable"))) }
                    .boxed();
            }
        }
        self.inner.fetch_raw_data(service, selector, stream)
    }
}

fn seeded_memory() -> MemorySource {
    let inner = MemorySource::new();
    inner.insert("Person", record(json!({ "id": 1, "lastName": "Smith" })));
    inner.insert("Address", record(json!({ "id": 10, "personId": 1, "city": "Uppsala" })));
    inner.insert("Address", record(json!({ "id": 11, "personId": 2, "city": "Lund" })));
    inner
}

fn tree_with(source: Box<dyn RawDataSource>) -> DataService {
    let root = DataService::new("root");
    root.add_child_service(&DataService::leaf(
        "backend",
        &["Person", "Address"],
        source,
    ));
    root.register_type(
        DataObjectDescriptor::new("Address")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("personId", "number"))
            .with_property(PropertyDescriptor::primitive("city", "string"))
            .with_identifier("id"),
    );
    root.register_type(
        DataObjectDescriptor::new("Person")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("lastName", "string"))
            .with_property(
                PropertyDescriptor::relationship("addresses", "Address", Cardinality::Many)
                    .with_criteria(
                        "personId",
                        KeyPathCompiler.compile("id").expect("path compiles"),
                    ),
            )
            .with_identifier("id"),
    );
    root
}

fn relationship_tree(fetches: Arc<AtomicUsize>) -> DataService {
    tree_with(Box::new(CountingSource {
        inner: seeded_memory(),
        counted_type: String::from("Address"),
        fetches,
    }))
}

async fn one_person(root: &DataService) -> u64 {
    let found = root.fetch_data("Person", None).completed().await.expect("fetch ok");
    assert_eq!(found.len(), 1);
    found[0]
}

#[tokio::test]
async fn concurrent_property_requests_share_one_fetch() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let root = relationship_tree(Arc::clone(&fetches));
    let person = one_person(&root).await;

    let (first, second) = tokio::join!(
        root.get_object_properties(person, &["addresses"]),
        root.get_object_properties(person, &["addresses"]),
    );
    first.expect("first request ok");
    second.expect("second request ok");
    assert_eq!(fetches.load(Ordering::SeqCst), 1, "requests coalesced onto one fetch");

    let addresses = root.value(person, "addresses").expect("slot written");
    let addresses = addresses.as_array().expect("to-many resolves to an array");
    assert_eq!(addresses.len(), 1, "criteria matched the person's address only");

    // resolved state short-circuits later requests
    root.get_object_properties(person, &["addresses"])
        .await
        .expect("cached request ok");
    assert_eq!(fetches.load(Ordering::SeqCst), 1, "no re-fetch once resolved");
}

#[tokio::test]
async fn duplicate_names_in_one_request_are_deduplicated() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let root = relationship_tree(Arc::clone(&fetches));
    let person = one_person(&root).await;

    root.get_object_properties(person, &["addresses", "addresses", "lastName"])
        .await
        .expect("request ok");
    assert_eq!(fetches.load(Ordering::SeqCst), 1, "one fetch per distinct property");
}

#[tokio::test]
async fn update_forces_a_refetch() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let root = relationship_tree(Arc::clone(&fetches));
    let person = one_person(&root).await;

    root.get_object_properties(person, &["addresses"]).await.expect("first ok");
    root.update_object_properties(person, &["addresses"]).await.expect("update ok");
    assert_eq!(fetches.load(Ordering::SeqCst), 2, "update bypasses the resolved state");
}

#[tokio::test]
async fn assigning_a_value_skips_the_fetch() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let root = relationship_tree(Arc::clone(&fetches));
    let person = one_person(&root).await;

    root.set_value(person, "addresses", json!([42]))
        .expect("assignment ok");
    root.get_object_properties(person, &["addresses"]).await.expect("request ok");
    assert_eq!(fetches.load(Ordering::SeqCst), 0, "assignment marked the property fetched");
    assert_eq!(root.value(person, "addresses"), Some(json!([42])), "assigned value kept");
}

#[tokio::test]
async fn a_failed_fetch_stays_cached_until_updated() {
    let failing = Arc::new(AtomicBool::new(true));
    let fetches = Arc::new(AtomicUsize::new(0));
    let root = tree_with(Box::new(FlakySource {
        inner: seeded_memory(),
        flaky_type: String::from("Address"),
        failing: Arc::clone(&failing),
        fetches: Arc::clone(&fetches),
    }));
    let person = one_person(&root).await;

    let first = root
        .get_object_properties(person, &["addresses"])
        .await
        .unwrap_err();
    let second = root
        .get_object_properties(person, &["addresses"])
        .await
        .unwrap_err();
    assert!(Arc::ptr_eq(&first, &second), "later readers observe the shared error");
    assert_eq!(fetches.load(Ordering::SeqCst), 1, "a failed fetch is not retried on read");

    // update is the retry path
    failing.store(false, Ordering::SeqCst);
    root.update_object_properties(person, &["addresses"])
        .await
        .expect("update retried the fetch");
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    let addresses = root.value(person, "addresses").expect("slot written");
    assert_eq!(
        addresses.as_array().expect("to-many resolves to an array").len(),
        1,
        "the retried fetch resolved the relationship"
    );
}

#[tokio::test]
async fn to_one_relationship_resolves_to_a_single_handle() {
    let root = DataService::new("root");
    let source = MemorySource::new();
    source.insert("Person", record(json!({ "id": 1, "employerId": 7 })));
    source.insert("Company", record(json!({ "id": 7, "name": "Acme" })));
    root.add_child_service(&DataService::leaf(
        "backend",
        &["Person", "Company"],
        Box::new(source),
    ));
    root.register_type(
        DataObjectDescriptor::new("Company")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("name", "string"))
            .with_identifier("id"),
    );
    root.register_type(
        DataObjectDescriptor::new("Person")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("employerId", "number"))
            .with_property(
                PropertyDescriptor::relationship("employer", "Company", Cardinality::One)
                    .with_criteria(
                        "id",
                        KeyPathCompiler.compile("employerId").expect("path compiles"),
                    ),
            )
            .with_identifier("id"),
    );

    let found = root.fetch_data("Person", None).completed().await.expect("fetch ok");
    let person = found[0];
    root.get_object_properties(person, &["employer"]).await.expect("request ok");
    let employer = root.value(person, "employer").expect("slot written");
    let employer = employer.as_u64().expect("to-one resolves to a handle");
    assert_eq!(root.value(employer, "name"), Some(json!("Acme")));
}
