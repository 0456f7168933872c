//! The offline operation log and its durable stores.
//!
//! Work performed while disconnected is recorded as operation records and
//! replayed on reconnect in nondecreasing `(last_modified, time, index)`
//! order. The durable store must write data rows and operation rows inside
//! one atomic transaction, since the offline write path persists both as a
//! single unit.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::error::{ArborError, Result};
use crate::model::RawRecord;

// ------------- OfflineOperation -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(ArborError::Offline(format!(
                "unknown operation kind '{}'", other
            ))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OfflineOperation {
    data_id: String,
    type_name: String,
    operation: OperationKind,
    changes: Option<RawRecord>,
    last_modified: i64,
    time: i64,
    index: u64,
}

impl OfflineOperation {
    pub fn new(data_id: &str, type_name: &str, operation: OperationKind) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            data_id: data_id.to_owned(),
            type_name: type_name.to_owned(),
            operation,
            changes: None,
            last_modified: now,
            time: now,
            index: 0,
        }
    }
    pub fn with_changes(mut self, changes: RawRecord) -> Self {
        self.changes = Some(changes);
        self
    }
    pub fn at(mut self, last_modified: i64, time: i64) -> Self {
        self.last_modified = last_modified;
        self.time = time;
        self
    }
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }
    pub fn data_id(&self) -> &str {
        &self.data_id
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn operation(&self) -> OperationKind {
        self.operation
    }
    pub fn changes(&self) -> Option<&RawRecord> {
        self.changes.as_ref()
    }
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }
    pub fn time(&self) -> i64 {
        self.time
    }
    pub fn index(&self) -> u64 {
        self.index
    }
}

/// The replay comparator. The fallback chain through all three keys keeps
/// replay deterministic even with duplicate timestamps.
pub fn compare(a: &OfflineOperation, b: &OfflineOperation) -> Ordering {
    (a.last_modified, a.time, a.index).cmp(&(b.last_modified, b.time, b.index))
}

/// A data row persisted alongside the operation log.
#[derive(Debug, Clone)]
pub struct OfflineRecord {
    pub data_id: String,
    pub type_name: String,
    pub record: RawRecord,
}

impl OfflineRecord {
    pub fn new(data_id: &str, type_name: &str, record: RawRecord) -> Self {
        Self {
            data_id: data_id.to_owned(),
            type_name: type_name.to_owned(),
            record,
        }
    }
}

// ------------- OfflineStore -------------
pub trait OfflineStore: Send + Sync {
    /// Writes data rows and operation rows as one atomic unit.
    fn put_data(&self, records: &[OfflineRecord], operations: &[OfflineOperation]) -> Result<()>;
    fn read_data(&self, type_name: &str) -> Result<Vec<RawRecord>>;
    fn read_operations(&self) -> Result<Vec<OfflineOperation>>;
    /// Called after an operation has been successfully replayed.
    fn delete_operation(&self, index: u64) -> Result<()>;
    fn clear_operations(&self) -> Result<()>;
}

// ------------- SqliteOfflineStore -------------
pub struct SqliteOfflineStore {
    db: Mutex<Connection>,
}

impl SqliteOfflineStore {
    pub fn new(connection: Connection) -> Result<Self> {
        connection.execute_batch(
            "
            create table if not exists Data (
                Data_Identity text not null,
                Data_Type text not null,
                Record text not null,
                constraint unique_Data primary key (
                    Data_Identity,
                    Data_Type
                )
            );
            create table if not exists Operation (
                Operation_Index integer primary key autoincrement,
                Data_Identity text not null,
                Data_Type text not null,
                Operation text not null,
                Changes text null,
                Last_Modified integer not null,
                Operation_Time integer not null
            );
            ",
        )?;
        Ok(Self {
            db: Mutex::new(connection),
        })
    }
    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

impl OfflineStore for SqliteOfflineStore {
    fn put_data(&self, records: &[OfflineRecord], operations: &[OfflineOperation]) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        for record in records {
            tx.execute(
                "
                insert into Data (
                    Data_Identity,
                    Data_Type,
                    Record
                ) values (?, ?, ?)
                on conflict (Data_Identity, Data_Type)
                do update set Record = excluded.Record
                ",
                params![
                    &record.data_id,
                    &record.type_name,
                    &Value::Object(record.record.clone()).to_string()
                ],
            )?;
        }
        for operation in operations {
            let changes = operation
                .changes()
                .map(|c| Value::Object(c.clone()).to_string());
            tx.execute(
                "
                insert into Operation (
                    Data_Identity,
                    Data_Type,
                    Operation,
                    Changes,
                    Last_Modified,
                    Operation_Time
                ) values (?, ?, ?, ?, ?, ?)
                ",
                params![
                    &operation.data_id(),
                    &operation.type_name(),
                    &operation.operation().as_str(),
                    &changes,
                    &operation.last_modified(),
                    &operation.time()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
    fn read_data(&self, type_name: &str) -> Result<Vec<RawRecord>> {
        let db = self.db.lock().unwrap();
        let mut statement = db.prepare_cached(
            "
            select Record
                from Data
                where Data_Type = ?
            ",
        )?;
        let rows = statement.query_map(params![type_name], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            let text = row?;
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(record)) => records.push(record),
                _ => {
                    return Err(ArborError::Offline(format!(
                        "corrupt data row for type '{}'", type_name
                    )));
                }
            }
        }
        Ok(records)
    }
    fn read_operations(&self) -> Result<Vec<OfflineOperation>> {
        let db = self.db.lock().unwrap();
        let mut statement = db.prepare_cached(
            "
            select Operation_Index,
                    Data_Identity,
                    Data_Type,
                    Operation,
                    Changes,
                    Last_Modified,
                    Operation_Time
                from Operation
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let mut operations = Vec::new();
        for row in rows {
            let (index, data_id, type_name, kind, changes, last_modified, time) = row?;
            let mut operation = OfflineOperation::new(&data_id, &type_name, OperationKind::parse(&kind)?)
                .at(last_modified, time)
                .with_index(index);
            if let Some(text) = changes {
                match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(record)) => operation = operation.with_changes(record),
                    _ => {
                        return Err(ArborError::Offline(format!(
                            "corrupt changes for operation {}", index
                        )));
                    }
                }
            }
            operations.push(operation);
        }
        Ok(operations)
    }
    fn delete_operation(&self, index: u64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "delete from Operation where Operation_Index = ?",
            params![index],
        )?;
        Ok(())
    }
    fn clear_operations(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("delete from Operation", [])?;
        Ok(())
    }
}

// ------------- MemoryOfflineStore -------------
// Backing for tests and fully in-memory trees.
#[derive(Default)]
pub struct MemoryOfflineStore {
    state: Mutex<MemoryOfflineState>,
}

#[derive(Default)]
struct MemoryOfflineState {
    data: Vec<OfflineRecord>,
    operations: Vec<OfflineOperation>,
    next_index: u64,
}

impl MemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfflineStore for MemoryOfflineStore {
    fn put_data(&self, records: &[OfflineRecord], operations: &[OfflineOperation]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for record in records {
            match state
                .data
                .iter_mut()
                .find(|r| r.data_id == record.data_id && r.type_name == record.type_name)
            {
                Some(existing) => existing.record = record.record.clone(),
                None => state.data.push(record.clone()),
            }
        }
        for operation in operations {
            state.next_index += 1;
            let index = state.next_index;
            state.operations.push(operation.clone().with_index(index));
        }
        Ok(())
    }
    fn read_data(&self, type_name: &str) -> Result<Vec<RawRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .data
            .iter()
            .filter(|r| r.type_name == type_name)
            .map(|r| r.record.clone())
            .collect())
    }
    fn read_operations(&self) -> Result<Vec<OfflineOperation>> {
        Ok(self.state.lock().unwrap().operations.clone())
    }
    fn delete_operation(&self, index: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.retain(|o| o.index() != index);
        Ok(())
    }
    fn clear_operations(&self) -> Result<()> {
        self.state.lock().unwrap().operations.clear();
        Ok(())
    }
}
