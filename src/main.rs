use std::sync::Arc;

use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbor::error::Result;
use arbor::model::{Cardinality, DataObjectDescriptor, PropertyDescriptor};
use arbor::expr::{ExpressionCompiler, KeyPathCompiler};
use arbor::offline::{MemoryOfflineStore, SqliteOfflineStore};
use arbor::raw::MemorySource;
use arbor::service::DataService;
use arbor::settings::Settings;

fn record(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(record) => record,
        _ => serde_json::Map::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.clone())),
        )
        .init();
    info!(online = settings.online, "starting arbor demo");

    let root = DataService::new("root");
    match &settings.offline_store_path {
        Some(path) => root.set_offline_store(Arc::new(SqliteOfflineStore::open(path)?)),
        None => root.set_offline_store(Arc::new(MemoryOfflineStore::new())),
    }
    root.set_online(settings.online).await?;

    let source = MemorySource::new();
    source.insert(
        "Person",
        record(json!({ "id": 1, "firstName": "Agnes", "lastName": "Smith" })),
    );
    source.insert(
        "Person",
        record(json!({ "id": 2, "firstName": "Bert", "lastName": "Smith" })),
    );
    source.insert(
        "Address",
        record(json!({ "id": 10, "personId": 1, "city": "Uppsala" })),
    );
    let people = DataService::leaf("people", &["Person", "Address"], Box::new(source));
    root.add_child_service(&people);

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
            .with_property(PropertyDescriptor::primitive("firstName", "string"))
            .with_property(PropertyDescriptor::primitive("lastName", "string"))
            .with_property(
                PropertyDescriptor::relationship("addresses", "Address", Cardinality::Many)
                    .with_criteria("personId", KeyPathCompiler.compile("id")?),
            )
            .with_identifier("id"),
    );

    let smiths = root
        .fetch_data(
            arbor::stream::DataSelector::with_type_and_criteria(
                "Person",
                arbor::stream::Criteria::KeyValues(record(json!({ "lastName": "Smith" }))),
            ),
            None,
        )
        .completed()
        .await
        .map_err(|error| arbor::error::ArborError::Fetch(error.to_string()))?;
    info!(count = smiths.len(), "fetched Smiths");

    for object in smiths {
        root.get_object_properties(object, &["addresses"])
            .await
            .map_err(|error| arbor::error::ArborError::Fetch(error.to_string()))?;
        info!(
            object,
            first_name = %root.value(object, "firstName").unwrap_or_default(),
            addresses = %root.value(object, "addresses").unwrap_or_default(),
            "resolved person"
        );
    }

    Ok(())
}
