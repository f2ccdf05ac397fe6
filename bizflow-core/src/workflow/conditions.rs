//! Field conditions evaluated against JSON documents
//!
//! Used by conditional tasks (against workflow data) and by automation trigger
//! conditions (against the company facts document). Field names support dot notation
//! for nested objects and numeric segments for array elements.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path, e.g. `amount` or `workflows.active`
    pub field: String,
    pub operator: ConditionOperator,
    /// Value to compare against; ignored by the unary operators
    #[serde(default)]
    pub value: Value,
}

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Contains,
    StartsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    IsTrue,
    IsFalse,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than_or_equals(field: &str, value: f64) -> Self {
        Self::new(
            field,
            ConditionOperator::LessThanOrEquals,
            serde_json::json!(value),
        )
    }

    pub fn is_true(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsTrue, Value::Null)
    }

    /// Evaluate against a document; missing fields read as null
    pub fn evaluate(&self, document: &Value) -> bool {
        let actual = lookup(document, &self.field).unwrap_or(&Value::Null);
        let expected = &self.value;

        match self.operator {
            ConditionOperator::Equals => loose_eq(actual, expected),
            ConditionOperator::NotEquals => !loose_eq(actual, expected),
            ConditionOperator::GreaterThan => compare(actual, expected, Ordering::is_gt),
            ConditionOperator::GreaterThanOrEquals => compare(actual, expected, Ordering::is_ge),
            ConditionOperator::LessThan => compare(actual, expected, Ordering::is_lt),
            ConditionOperator::LessThanOrEquals => compare(actual, expected, Ordering::is_le),
            ConditionOperator::Contains => match (actual, expected) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
                _ => false,
            },
            ConditionOperator::StartsWith => match (actual, expected) {
                (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            ConditionOperator::In => match expected {
                Value::Array(options) => options.iter().any(|o| loose_eq(actual, o)),
                _ => false,
            },
            ConditionOperator::NotIn => match expected {
                Value::Array(options) => !options.iter().any(|o| loose_eq(actual, o)),
                _ => true,
            },
            ConditionOperator::IsNull => actual.is_null(),
            ConditionOperator::IsNotNull => !actual.is_null(),
            ConditionOperator::IsEmpty => is_empty(actual),
            ConditionOperator::IsNotEmpty => !is_empty(actual),
            ConditionOperator::IsTrue => actual.as_bool() == Some(true),
            ConditionOperator::IsFalse => actual.as_bool() == Some(false),
        }
    }
}

/// All conditions hold; an empty list holds trivially
pub fn evaluate_all(conditions: &[Condition], document: &Value) -> bool {
    conditions.iter().all(|c| c.evaluate(document))
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(document);
    }
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Numeric view of a value; decimal amounts are often stored as strings
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) if actual.is_number() || expected.is_number() => a == b,
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(Ordering) -> bool) -> bool {
    let ordering = match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        // ISO-8601 timestamps order lexicographically
        _ => match (actual, expected) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    ordering.is_some_and(op)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_lookup() {
        let doc = json!({"workflows": {"active": 3}, "items": [{"sku": "A1"}]});
        assert_eq!(lookup(&doc, "workflows.active"), Some(&json!(3)));
        assert_eq!(lookup(&doc, "items.0.sku"), Some(&json!("A1")));
        assert_eq!(lookup(&doc, "workflows.missing"), None);
    }

    #[test]
    fn test_numeric_comparison_accepts_decimal_strings() {
        let doc = json!({"amount": "1250.50"});
        assert!(Condition::greater_than("amount", 1000.0).evaluate(&doc));
        assert!(!Condition::less_than_or_equals("amount", 1000.0).evaluate(&doc));
    }

    #[test]
    fn test_missing_field_reads_as_null() {
        let doc = json!({});
        assert!(Condition::new("manager", ConditionOperator::IsNull, Value::Null).evaluate(&doc));
        assert!(!Condition::greater_than("amount", 0.0).evaluate(&doc));
    }

    #[test]
    fn test_in_and_contains() {
        let doc = json!({"category": "travel", "tags": ["urgent", "q3"]});
        let in_list = Condition::new(
            "category",
            ConditionOperator::In,
            json!(["travel", "meals"]),
        );
        assert!(in_list.evaluate(&doc));

        let contains = Condition::new("tags", ConditionOperator::Contains, json!("urgent"));
        assert!(contains.evaluate(&doc));
    }

    #[test]
    fn test_timestamp_ordering() {
        let doc = json!({"now": "2026-03-02T10:00:00Z"});
        let before = Condition::new(
            "now",
            ConditionOperator::GreaterThanOrEquals,
            json!("2026-03-01T00:00:00Z"),
        );
        assert!(before.evaluate(&doc));
    }

    #[test]
    fn test_evaluate_all_empty_is_true() {
        assert!(evaluate_all(&[], &json!({})));
    }

    #[test]
    fn test_operator_deserialization() {
        let condition: Condition = serde_json::from_value(json!({
            "field": "requires_travel",
            "operator": "is_true"
        }))
        .unwrap();
        assert_eq!(condition.operator, ConditionOperator::IsTrue);
        assert!(condition.evaluate(&json!({"requires_travel": true})));
    }
}
