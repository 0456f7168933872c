use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use arbor::model::{DataObjectDescriptor, PropertyDescriptor, RawRecord};
use arbor::raw::MemorySource;
use arbor::service::DataService;
use arbor::stream::{Criteria, DataSelector, DataStream};

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(record) => record,
        _ => panic!("not a record"),
    }
}

fn people_tree(rows: u64) -> DataService {
    let root = DataService::new("root");
    let source = MemorySource::new();
    for id in 0..rows {
        source.insert(
            "Person",
            record(json!({
                "id": id,
                "lastName": if id % 2 == 0 { "Smith" } else { "Jones" },
            })),
        );
    }
    root.add_child_service(&DataService::leaf("people", &["Person"], Box::new(source)));
    root.register_type(
        DataObjectDescriptor::new("Person")
            .with_property(PropertyDescriptor::primitive("id", "number"))
            .with_property(PropertyDescriptor::primitive("lastName", "string"))
            .with_identifier("id"),
    );
    root
}

fn stream_append_throughput(c: &mut Criterion) {
    c.bench_function("stream append 1000 handles in batches of 10", |b| {
        b.iter(|| {
            let stream = DataStream::new();
            for batch in 0..100u64 {
                let base = batch * 10;
                stream.add_data((base..base + 10).collect());
            }
            stream.data_done();
            black_box(stream.data().len())
        });
    });
}

fn criteria_matching(c: &mut Criterion) {
    let criteria = Criteria::KeyValues(record(json!({ "lastName": "Smith" })));
    let hit = record(json!({ "id": 1, "lastName": "Smith" }));
    let miss = record(json!({ "id": 2, "lastName": "Jones" }));
    c.bench_function("key-value criteria match", |b| {
        b.iter(|| black_box(criteria.matches(&hit)) ^ black_box(criteria.matches(&miss)));
    });
}

fn fetch_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let root = people_tree(1000);
    c.bench_function("fetch 500 of 1000 records through the tree", |b| {
        b.iter(|| {
            let selector = DataSelector::with_type_and_criteria(
                "Person",
                Criteria::KeyValues(record(json!({ "lastName": "Smith" }))),
            );
            let found = runtime
                .block_on(async { root.fetch_data(selector, None).completed().await })
                .unwrap();
            black_box(found.len())
        });
    });
}

criterion_group!(
    benches,
    stream_append_throughput,
    criteria_matching,
    fetch_round_trip
);
criterion_main!(benches);
