//! Selectors describe what to fetch; streams deliver the results
//! incrementally while doubling as a single-resolution future.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{ArborError, SharedError, SharedResult};
use crate::expr::{Expression, Scope};
use crate::model::{ObjectId, RawRecord};

// ------------- Criteria -------------
#[derive(Clone, Default)]
pub enum Criteria {
    #[default]
    None,
    /// Every listed field must equal the given value.
    KeyValues(RawRecord),
    /// An arbitrary predicate evaluated with the record as scope root.
    Expression(Arc<dyn Expression>),
}

impl Criteria {
    pub fn matches(&self, record: &RawRecord) -> bool {
        match self {
            Criteria::None => true,
            Criteria::KeyValues(pairs) => pairs
                .iter()
                .all(|(name, expected)| record.get(name) == Some(expected)),
            Criteria::Expression(expression) => {
                let root = Value::Object(record.clone());
                expression.truth(&Scope::new(&root))
            }
        }
    }
}

impl fmt::Debug for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Criteria::None => write!(f, "Criteria::None"),
            Criteria::KeyValues(pairs) => write!(f, "Criteria::KeyValues({:?})", pairs),
            Criteria::Expression(_) => write!(f, "Criteria::Expression(..)"),
        }
    }
}

// ------------- DataOrdering -------------
#[derive(Clone, Debug)]
pub struct DataOrdering {
    expression: String,
    descending: bool,
}

impl DataOrdering {
    pub fn ascending(expression: &str) -> Self {
        Self {
            expression: expression.to_owned(),
            descending: false,
        }
    }
    pub fn descending(expression: &str) -> Self {
        Self {
            expression: expression.to_owned(),
            descending: true,
        }
    }
    pub fn expression(&self) -> &str {
        &self.expression
    }
    pub fn is_descending(&self) -> bool {
        self.descending
    }
}

// ------------- DataSelector -------------
// A selector instance is never mutated by participants other than its
// creator; services only read it.
#[derive(Clone, Debug)]
pub struct DataSelector {
    type_name: String,
    criteria: Criteria,
    orderings: Vec<DataOrdering>,
}

impl DataSelector {
    /// The canonical constructor for downstream dispatch code.
    pub fn with_type_and_criteria(type_name: &str, criteria: Criteria) -> Self {
        Self {
            type_name: type_name.to_owned(),
            criteria,
            orderings: Vec::new(),
        }
    }
    pub fn with_type(type_name: &str) -> Self {
        Self::with_type_and_criteria(type_name, Criteria::None)
    }
    pub fn ordered_by(mut self, ordering: DataOrdering) -> Self {
        self.orderings.push(ordering);
        self
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }
    pub fn orderings(&self) -> &[DataOrdering] {
        &self.orderings
    }
}

// A bare type name is selector shorthand for "everything of that type".
impl From<&str> for DataSelector {
    fn from(type_name: &str) -> Self {
        DataSelector::with_type(type_name)
    }
}

// ------------- DataStream -------------
struct StreamState {
    selector: Option<DataSelector>,
    data: Vec<ObjectId>,
    done: Option<SharedResult<()>>,
    waiters: Vec<oneshot::Sender<SharedResult<Vec<ObjectId>>>>,
}

/// An append-only, single-completion result container.
///
/// Exactly one producer writes to a stream: it appends batches with
/// [`add_data`](DataStream::add_data) and terminates with one
/// [`data_done`](DataStream::data_done) or
/// [`data_error`](DataStream::data_error) call. This is a contract, not a
/// runtime-enforced invariant. Consumers may snapshot partial results with
/// [`data`](DataStream::data) at any time or await
/// [`completed`](DataStream::completed), before or after the terminal
/// signal, any number of times.
#[derive(Clone)]
pub struct DataStream {
    state: Arc<Mutex<StreamState>>,
}

impl DataStream {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                selector: None,
                data: Vec::new(),
                done: None,
                waiters: Vec::new(),
            })),
        }
    }
    pub fn for_selector(selector: DataSelector) -> Self {
        let stream = Self::new();
        stream.set_selector(selector);
        stream
    }
    pub fn selector(&self) -> Option<DataSelector> {
        self.state.lock().unwrap().selector.clone()
    }
    pub fn set_selector(&self, selector: DataSelector) {
        self.state.lock().unwrap().selector = Some(selector);
    }
    /// Appends a batch. A no-op for empty batches. Appends after completion
    /// are visible to later snapshots but do not re-resolve the stream.
    pub fn add_data(&self, items: Vec<ObjectId>) {
        if items.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.data.extend(items);
    }
    /// Snapshot of the accumulated results so far, in append order.
    pub fn data(&self) -> Vec<ObjectId> {
        self.state.lock().unwrap().data.clone()
    }
    pub fn is_done(&self) -> bool {
        self.state.lock().unwrap().done.is_some()
    }
    /// Marks successful completion. Idempotent: re-calls do not re-resolve,
    /// and a stream that already failed stays failed.
    pub fn data_done(&self) {
        let (waiters, data) = {
            let mut state = self.state.lock().unwrap();
            if state.done.is_some() {
                return;
            }
            state.done = Some(Ok(()));
            (std::mem::take(&mut state.waiters), state.data.clone())
        };
        for waiter in waiters {
            let _ = waiter.send(Ok(data.clone()));
        }
    }
    /// The alternate terminal signal. All current and future waiters observe
    /// the same shared error. Ignored once the stream has completed.
    pub fn data_error(&self, error: ArborError) {
        let shared: SharedError = Arc::new(error);
        let waiters = {
            let mut state = self.state.lock().unwrap();
            if state.done.is_some() {
                return;
            }
            state.done = Some(Err(Arc::clone(&shared)));
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(Arc::clone(&shared)));
        }
    }
    /// Resolves on the terminal signal with the accumulated results.
    pub async fn completed(&self) -> SharedResult<Vec<ObjectId>> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            match &state.done {
                Some(Ok(())) => return Ok(state.data.clone()),
                Some(Err(shared)) => return Err(Arc::clone(shared)),
                None => {
                    let (sender, receiver) = oneshot::channel();
                    state.waiters.push(sender);
                    receiver
                }
            }
        };
        receiver.await.unwrap_or_else(|_| {
            Err(Arc::new(ArborError::Invariant(String::from(
                "stream dropped without a terminal signal",
            ))))
        })
    }
}

impl Default for DataStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("DataStream")
            .field("data", &state.data.len())
            .field("done", &state.done.is_some())
            .finish()
    }
}
