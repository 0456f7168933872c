//! The expression seam consumed by mappings, criteria and orderings.
//!
//! The core treats expressions as an opaque capability: something that can be
//! compiled from a string and later evaluated against a [`Scope`] to produce a
//! value or a boolean predicate. Evaluation is pure and side-effect free.
//! A built-in [`KeyPathCompiler`] covers the common case of dotted property
//! paths; richer languages plug in through [`ExpressionCompiler`].

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ArborError, Result};

/// The evaluation scope: a root value plus named parameters.
pub struct Scope<'a> {
    root: &'a Value,
    parameters: Option<&'a Map<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self { root, parameters: None }
    }
    pub fn with_parameters(root: &'a Value, parameters: &'a Map<String, Value>) -> Self {
        Self { root, parameters: Some(parameters) }
    }
    pub fn root(&self) -> &Value {
        self.root
    }
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.and_then(|p| p.get(name))
    }
}

pub trait Expression: Send + Sync {
    fn evaluate(&self, scope: &Scope) -> Value;
    /// Predicate form. Null and false are falsy, everything else is truthy.
    fn truth(&self, scope: &Scope) -> bool {
        !matches!(self.evaluate(scope), Value::Null | Value::Bool(false))
    }
}

pub trait ExpressionCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>>;
}

// ------------- Key paths -------------
// "address.city" walks the scope root; "$name" reads a named parameter.
enum Segment {
    Property(String),
    Parameter(String),
}

pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    pub fn parse(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(ArborError::Expression(String::from("empty key path")));
        }
        let mut segments = Vec::new();
        for (position, part) in source.trim().split('.').enumerate() {
            if part.is_empty() {
                return Err(ArborError::Expression(format!(
                    "empty segment in key path '{}'", source
                )));
            }
            let segment = match part.strip_prefix('$') {
                Some(name) if position == 0 => Segment::Parameter(name.to_owned()),
                Some(_) => {
                    return Err(ArborError::Expression(format!(
                        "parameter reference only allowed first in '{}'", source
                    )));
                }
                None => Segment::Property(part.to_owned()),
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }
}

impl Expression for KeyPath {
    fn evaluate(&self, scope: &Scope) -> Value {
        let mut current: Option<&Value> = Some(scope.root());
        for segment in &self.segments {
            current = match segment {
                Segment::Parameter(name) => scope.parameter(name),
                Segment::Property(name) => match current {
                    Some(Value::Object(map)) => map.get(name),
                    _ => None,
                },
            };
        }
        current.cloned().unwrap_or(Value::Null)
    }
}

/// The default compiler. Anything needing more than property traversal
/// supplies its own [`ExpressionCompiler`].
pub struct KeyPathCompiler;

impl ExpressionCompiler for KeyPathCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>> {
        Ok(Arc::new(KeyPath::parse(source)?))
    }
}
