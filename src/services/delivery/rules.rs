// ============================================
// Rule Predicate Evaluator
// ============================================
//
// Shared condition layer for the rate-limit, dedup, and aggregation rule
// tables: a field path into the serialized subject, an operator, and a
// comparison value. Rules stay data; no policy branches in code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    Eq,
    Ne,
    /// Field value is one of the listed values
    In,
    Gte,
    Lte,
    /// String or array containment
    Contains,
}

/// One predicate over a dot-separated field path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub op: FieldOp,
    pub value: Value,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, op: FieldOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn matches(&self, subject: &Value) -> bool {
        let Some(actual) = lookup_path(subject, &self.field) else {
            return false;
        };
        match self.op {
            FieldOp::Eq => actual == &self.value,
            FieldOp::Ne => actual != &self.value,
            FieldOp::In => match &self.value {
                Value::Array(options) => options.contains(actual),
                _ => false,
            },
            FieldOp::Gte => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a >= b,
                _ => false,
            },
            FieldOp::Lte => match (actual.as_f64(), self.value.as_f64()) {
                (Some(a), Some(b)) => a <= b,
                _ => false,
            },
            FieldOp::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
        }
    }
}

/// All conditions must hold; an empty list always matches
pub fn matches_all(conditions: &[RuleCondition], subject: &Value) -> bool {
    conditions.iter().all(|c| c.matches(subject))
}

fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
