use serde_json::json;

use arbor::error::ArborError;
use arbor::model::{DataObjectDescriptor, PropertyDescriptor, RawRecord};
use arbor::raw::MemorySource;
use arbor::service::DataService;

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(record) => record,
        _ => panic!("not a record"),
    }
}

fn register_person(service: &DataService) {
    service.register_type(
        DataObjectDescriptor::new("Person")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_identifier("id"),
    );
}

#[tokio::test]
async fn first_registered_child_wins() {
    let root = DataService::new("root");
    let first = MemorySource::new();
    first.insert("Person", record(json!({ "id": 1 })));
    let second = MemorySource::new();
    second.insert("Person", record(json!({ "id": 2 })));
    root.add_child_service(&DataService::leaf("a", &["Person"], Box::new(first)));
    root.add_child_service(&DataService::leaf("b", &["Person"], Box::new(second)));
    register_person(&root);

    let found = root.fetch_data("Person", None).completed().await.expect("fetch ok");
    assert_eq!(found.len(), 1, "one child serves the type, never a merge");
    assert_eq!(root.value(found[0], "id"), Some(json!(1)), "the first child won");
}

#[tokio::test]
async fn catch_all_serves_unlisted_types() {
    let root = DataService::new("root");
    root.add_child_service(&DataService::leaf(
        "people",
        &["Person"],
        Box::new(MemorySource::new()),
    ));
    let rest = MemorySource::new();
    rest.insert("Address", record(json!({ "id": 9, "city": "Uppsala" })));
    root.add_child_service(&DataService::catch_all("rest", Box::new(rest)));
    root.register_type(
        DataObjectDescriptor::new("Address")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("city", "string"))
            .with_identifier("id"),
    );

    let found = root.fetch_data("Address", None).completed().await.expect("fetch ok");
    assert_eq!(found.len(), 1, "catch-all handled the unlisted type");
    assert_eq!(root.value(found[0], "city"), Some(json!("Uppsala")));
}

#[tokio::test]
async fn unhandled_type_fails_the_stream() {
    let root = DataService::new("root");
    let error = root.fetch_data("Ghost", None).completed().await.unwrap_err();
    assert!(
        matches!(&*error, ArborError::Dispatch(name) if name == "Ghost"),
        "dispatch failure reaches the stream instead of panicking"
    );
}

#[tokio::test]
async fn reparenting_detaches_from_the_old_parent() {
    let first = DataService::new("first");
    let second = DataService::new("second");
    let source = MemorySource::new();
    source.insert("Person", record(json!({ "id": 1 })));
    let leaf = DataService::leaf("people", &["Person"], Box::new(source));

    first.add_child_service(&leaf);
    assert!(first.child_service_for_type("Person").is_some());

    second.add_child_service(&leaf);
    assert!(
        first.child_service_for_type("Person").is_none(),
        "old parent no longer dispatches the type"
    );
    assert!(first.children().is_empty());
    assert!(first.child_types().is_empty(), "type list shrank with the map");
    assert!(leaf.parent_service().expect("has a parent") == second);

    register_person(&second);
    let found = second.fetch_data("Person", None).completed().await.expect("fetch ok");
    assert_eq!(found.len(), 1, "the new tree serves the type");
}

#[tokio::test]
async fn removing_one_of_two_children_keeps_the_type_registered() {
    let root = DataService::new("root");
    let a = DataService::leaf("a", &["Person"], Box::new(MemorySource::new()));
    let b = DataService::leaf("b", &["Person"], Box::new(MemorySource::new()));
    root.add_child_service(&a);
    root.add_child_service(&b);
    root.remove_child_service(&a);
    assert!(
        root.child_service_for_type("Person").expect("still dispatches") == b,
        "the remaining child serves the type"
    );
    assert_eq!(root.child_types().len(), 1);
}
