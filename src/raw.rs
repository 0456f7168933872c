//! The raw-data seam: leaf services delegate to a [`RawDataSource`] that
//! talks to one concrete store, and decoded records flow back through the
//! ingestion pipeline on the owning service (`add_raw_data`).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::expr::{Expression, ExpressionCompiler, KeyPathCompiler, Scope};
use crate::model::{ObjectId, OtherHasher, RawRecord};
use crate::offline::{OfflineOperation, OperationKind};
use crate::service::DataService;
use crate::stream::{DataSelector, DataStream};

// ------------- RawDataSource -------------
/// The specialization contract for leaf services. `fetch_raw_data` is the
/// one method every source implements; the producer it returns pushes
/// decoded records through `service.add_raw_data` and terminates the stream
/// with `service.raw_data_done`. The remaining methods have no-op defaults.
pub trait RawDataSource: Send + Sync {
    fn fetch_raw_data(
        &self,
        service: DataService,
        selector: DataSelector,
        stream: DataStream,
    ) -> BoxFuture<'static, Result<()>>;

    fn save_data_object(
        &self,
        _service: DataService,
        _object: ObjectId,
        _record: RawRecord,
    ) -> BoxFuture<'static, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn delete_data_object(
        &self,
        _service: DataService,
        _object: ObjectId,
        _record: RawRecord,
    ) -> BoxFuture<'static, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    /// Chance to persist a fetched batch for offline use. Called by
    /// `add_raw_data` while online, before mapping.
    fn add_offline_data(
        &self,
        _service: &DataService,
        _selector: Option<&DataSelector>,
        _records: &[RawRecord],
    ) -> Result<()> {
        Ok(())
    }

    /// Replays one batch of offline operations recorded by this source.
    /// Implementations call `service.offline_operation_performed` after each
    /// applied operation; a mid-batch failure then leaves only the unapplied
    /// operations in the log.
    fn perform_offline_operations(
        &self,
        _service: DataService,
        _operations: Vec<OfflineOperation>,
    ) -> BoxFuture<'static, Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

// ------------- DataMapping -------------
/// Maps one raw record onto a tracked object. Services without a configured
/// mapping fall back to field-by-field copy of declared properties.
pub trait DataMapping: Send + Sync {
    fn map_from_raw_data(
        &self,
        service: &DataService,
        object: ObjectId,
        record: &RawRecord,
    ) -> Result<()>;
}

/// Rule-based mapping: each rule evaluates an expression against the raw
/// record and writes the result to a property. An unmappable rule is logged
/// as a warning and skipped; mapping continues for remaining properties.
pub struct ExpressionMapping {
    rules: Vec<(String, Arc<dyn Expression>)>,
}

impl ExpressionMapping {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }
    pub fn with_rule(mut self, property: &str, expression: Arc<dyn Expression>) -> Self {
        self.rules.push((property.to_owned(), expression));
        self
    }
    /// Convenience: compile `source` with the default key-path compiler.
    pub fn with_path(self, property: &str, source: &str) -> Result<Self> {
        let expression = KeyPathCompiler.compile(source)?;
        Ok(self.with_rule(property, expression))
    }
}

impl Default for ExpressionMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl DataMapping for ExpressionMapping {
    fn map_from_raw_data(
        &self,
        service: &DataService,
        object: ObjectId,
        record: &RawRecord,
    ) -> Result<()> {
        let root = Value::Object(record.clone());
        let scope = Scope::new(&root);
        for (property, expression) in &self.rules {
            let value = expression.evaluate(&scope);
            if let Err(error) = service.set_raw_value(object, property, value) {
                warn!(property = %property, %error, "mapping rule failed");
            }
        }
        Ok(())
    }
}

// ------------- Value ordering -------------
// Sort-key comparison for selector orderings. Numbers order numerically,
// strings lexically; mixed kinds fall back to their textual form.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

pub(crate) fn sort_records(records: &mut [RawRecord], selector: &DataSelector) {
    for ordering in selector.orderings().iter().rev() {
        let expression = match KeyPathCompiler.compile(ordering.expression()) {
            Ok(expression) => expression,
            Err(error) => {
                warn!(expression = %ordering.expression(), %error, "unusable ordering");
                continue;
            }
        };
        records.sort_by(|a, b| {
            let left = expression.evaluate(&Scope::new(&Value::Object(a.clone())));
            let right = expression.evaluate(&Scope::new(&Value::Object(b.clone())));
            let ordered = compare_values(&left, &right);
            if ordering.is_descending() {
                ordered.reverse()
            } else {
                ordered
            }
        });
    }
}

// ------------- MemorySource -------------
/// A complete in-memory raw store: records per type, criteria filtering,
/// selector orderings, and offline operation replay against its own rows.
#[derive(Clone, Default)]
pub struct MemorySource {
    records: Arc<Mutex<HashMap<String, Vec<RawRecord>, OtherHasher>>>,
}

fn record_id_matches(record: &RawRecord, key: &str, data_id: &str) -> bool {
    match record.get(key) {
        Some(Value::String(text)) => text == data_id,
        Some(Value::Number(number)) => number.to_string() == data_id,
        _ => false,
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, type_name: &str, record: RawRecord) {
        self.records
            .lock()
            .unwrap()
            .entry(type_name.to_owned())
            .or_default()
            .push(record);
    }
    pub fn records(&self, type_name: &str) -> Vec<RawRecord> {
        self.records
            .lock()
            .unwrap()
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }
    fn select(&self, selector: &DataSelector) -> Vec<RawRecord> {
        let records = self.records.lock().unwrap();
        let mut matches: Vec<RawRecord> = records
            .get(selector.type_name())
            .map(|rows| {
                rows.iter()
                    .filter(|row| selector.criteria().matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_records(&mut matches, selector);
        matches
    }
    fn upsert(&self, type_name: &str, key: &str, data_id: &str, record: RawRecord) {
        let mut records = self.records.lock().unwrap();
        let rows = records.entry(type_name.to_owned()).or_default();
        match rows.iter_mut().find(|row| record_id_matches(row, key, data_id)) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
    }
    fn remove(&self, type_name: &str, key: &str, data_id: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(rows) = records.get_mut(type_name) {
            rows.retain(|row| !record_id_matches(row, key, data_id));
        }
    }
}

impl RawDataSource for MemorySource {
    fn fetch_raw_data(
        &self,
        service: DataService,
        selector: DataSelector,
        stream: DataStream,
    ) -> BoxFuture<'static, Result<()>> {
        let matches = self.select(&selector);
        async move {
            service.add_raw_data(&stream, matches)?;
            service.raw_data_done(&stream);
            Ok(())
        }
        .boxed()
    }

    fn save_data_object(
        &self,
        service: DataService,
        object: ObjectId,
        record: RawRecord,
    ) -> BoxFuture<'static, Result<()>> {
        let source = self.clone();
        async move {
            let descriptor = service.descriptor_of(object);
            let (type_name, key) = match &descriptor {
                Some(descriptor) => (
                    descriptor.name().to_owned(),
                    descriptor
                        .identifiers()
                        .iter()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| String::from("id")),
                ),
                None => return Ok(()),
            };
            let data_id = record
                .get(&key)
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            source.upsert(&type_name, &key, &data_id, record);
            Ok(())
        }
        .boxed()
    }

    fn delete_data_object(
        &self,
        service: DataService,
        object: ObjectId,
        record: RawRecord,
    ) -> BoxFuture<'static, Result<()>> {
        let source = self.clone();
        async move {
            let descriptor = service.descriptor_of(object);
            if let Some(descriptor) = descriptor {
                let key = descriptor
                    .identifiers()
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| String::from("id"));
                if let Some(value) = record.get(&key) {
                    let data_id = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    source.remove(descriptor.name(), &key, &data_id);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn perform_offline_operations(
        &self,
        service: DataService,
        operations: Vec<OfflineOperation>,
    ) -> BoxFuture<'static, Result<()>> {
        let source = self.clone();
        async move {
            for operation in operations {
                let key = "id";
                match operation.operation() {
                    OperationKind::Create => {
                        if let Some(changes) = operation.changes() {
                            source.insert(operation.type_name(), changes.clone());
                        }
                    }
                    OperationKind::Update => {
                        if let Some(changes) = operation.changes() {
                            let mut records = source.records.lock().unwrap();
                            if let Some(rows) = records.get_mut(operation.type_name()) {
                                for row in rows.iter_mut() {
                                    if record_id_matches(row, key, operation.data_id()) {
                                        for (name, value) in changes {
                                            row.insert(name.clone(), value.clone());
                                        }
                                    }
                                }
                            }
                        }
                    }
                    OperationKind::Delete => {
                        source.remove(operation.type_name(), key, operation.data_id());
                    }
                }
                service.offline_operation_performed(&operation)?;
            }
            Ok(())
        }
        .boxed()
    }
}
