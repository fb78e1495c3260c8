//! Step conditions: structured predicates over the request payload
//!
//! A step may carry a condition deciding whether it applies to a given
//! request at all. Conditions are structured variants rather than a
//! free-form expression string, so a definition that survives validation
//! cannot fail to parse at evaluation time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over the request payload, evaluated when a step becomes
/// the current step. A step whose condition is false is skipped entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StepCondition {
    /// The field equals the given value
    Equals { field: String, value: Value },
    /// The field is numeric and strictly greater than the threshold
    GreaterThan { field: String, value: f64 },
    /// The field is numeric and strictly less than the threshold
    LessThan { field: String, value: f64 },
    /// The field is present (and not null)
    Exists { field: String },
    /// Negation
    Not(Box<StepCondition>),
    /// All sub-conditions must hold
    AllOf(Vec<StepCondition>),
    /// At least one sub-condition must hold
    AnyOf(Vec<StepCondition>),
}

impl StepCondition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_than(field: impl Into<String>, value: f64) -> Self {
        Self::GreaterThan {
            field: field.into(),
            value,
        }
    }

    pub fn less_than(field: impl Into<String>, value: f64) -> Self {
        Self::LessThan {
            field: field.into(),
            value,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    /// Evaluate the condition against a request payload.
    ///
    /// Missing or mistyped fields make the individual comparison false,
    /// never an error.
    pub fn evaluate(&self, payload: &Value) -> bool {
        match self {
            Self::Equals { field, value } => lookup(payload, field) == Some(value),
            Self::GreaterThan { field, value } => lookup(payload, field)
                .and_then(Value::as_f64)
                .map(|v| v > *value)
                .unwrap_or(false),
            Self::LessThan { field, value } => lookup(payload, field)
                .and_then(Value::as_f64)
                .map(|v| v < *value)
                .unwrap_or(false),
            Self::Exists { field } => {
                matches!(lookup(payload, field), Some(v) if !v.is_null())
            }
            Self::Not(inner) => !inner.evaluate(payload),
            Self::AllOf(conditions) => conditions.iter().all(|c| c.evaluate(payload)),
            Self::AnyOf(conditions) => conditions.iter().any(|c| c.evaluate(payload)),
        }
    }
}

/// Resolve a dotted path ("trip.cost") into the payload
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
