//! Condition evaluation for trigger matching and condition steps.
//!
//! A condition is a list of `{field, operator, value}` clauses that are all
//! ANDed together. There is no OR or grouping. `field` is a dot path resolved
//! against the evaluation context; a missing path resolves to "absent", which
//! behaves like `null` and never raises an error.
//!
//! Emptiness (`is_empty` / `is_not_empty`) is loose-falsy: absent, `null`,
//! `false`, `0`, `0.0`, `""`, `"0"`, `[]` and `{}` are all empty.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mapper;

/// Clause operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    /// Loose, case-sensitive equality.
    #[default]
    Equals,
    /// Negation of `Equals`.
    NotEquals,
    /// Case-insensitive substring match on strings.
    Contains,
    /// Case-insensitive prefix match on strings.
    StartsWith,
    /// Numeric, or lexical for two non-numeric strings.
    GreaterThan,
    /// Numeric, or lexical for two non-numeric strings.
    LessThan,
    /// Loose-falsy emptiness.
    IsEmpty,
    /// Negation of `IsEmpty`.
    IsNotEmpty,
    /// Not understood; the clause passes.
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "equals" | "==" => Self::Equals,
            "not_equals" | "!=" => Self::NotEquals,
            "contains" => Self::Contains,
            "starts_with" => Self::StartsWith,
            "greater_than" | ">" => Self::GreaterThan,
            "less_than" | "<" => Self::LessThan,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            _ => Self::Unknown(s),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

/// A single `{field, operator, value}` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionClause {
    /// Dot path into the context.
    pub field: String,

    /// Operator (default: `equals`).
    #[serde(default)]
    pub operator: Operator,

    /// Literal to compare against; unused by emptiness operators.
    #[serde(default)]
    pub value: Value,
}

impl ConditionClause {
    pub fn new(field: &str, operator: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator: Operator::from(operator.to_string()),
            value,
        }
    }
}

/// Accepts either a single clause object or a list of clauses.
#[derive(Deserialize)]
#[serde(untagged)]
enum ClauseSet {
    One(ConditionClause),
    Many(Vec<ConditionClause>),
}

/// Parse a stored condition document.
///
/// `null` is an empty clause list. Anything that is neither a clause nor a
/// list of clauses is rejected; callers treat that as a configuration error.
pub fn parse_clauses(value: &Value) -> Result<Vec<ConditionClause>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    match serde_json::from_value::<ClauseSet>(value.clone())? {
        ClauseSet::One(clause) => Ok(vec![clause]),
        ClauseSet::Many(clauses) => Ok(clauses),
    }
}

/// Stateless clause evaluator shared by the trigger gateway and condition steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all clauses against `context`. An empty list is `true`.
    pub fn evaluate(&self, context: &Value, clauses: &[ConditionClause]) -> bool {
        clauses
            .iter()
            .all(|clause| self.evaluate_clause(context, clause))
    }

    /// Evaluate a single clause.
    pub fn evaluate_clause(&self, context: &Value, clause: &ConditionClause) -> bool {
        let actual = mapper::get(context, &clause.field);
        let expected = &clause.value;

        match &clause.operator {
            Operator::Equals => loose_equals(actual, expected),
            Operator::NotEquals => !loose_equals(actual, expected),
            Operator::Contains => {
                string_pair(actual, expected).is_some_and(|(a, e)| a.contains(&e))
            }
            Operator::StartsWith => {
                string_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(&e))
            }
            Operator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            Operator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::Unknown(name) => {
                tracing::warn!(
                    operator = %name,
                    field = %clause.field,
                    "Unknown condition operator, clause treated as passing"
                );
                true
            }
        }
    }
}

/// Loose-falsy emptiness.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty() || s == "0",
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

/// Numeric view of numbers and numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Loose equality: numbers and numeric strings compare numerically, booleans
/// compare against the other side's truthiness, and `null`/absent equals any
/// empty value. Strings otherwise compare exactly.
fn loose_equals(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);

    match (actual, expected) {
        (Value::Null, other) | (other, Value::Null) => is_empty(Some(other)),
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == !is_empty(Some(other)),
        (Value::String(a), Value::String(b)) => match (as_number(actual), as_number(expected)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(actual), as_number(expected)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (a, b) => a == b,
    }
}

/// Lowercased operands for substring operators; `None` unless both are strings.
fn string_pair(actual: Option<&Value>, expected: &Value) -> Option<(String, String)> {
    match (actual?, expected) {
        (Value::String(a), Value::String(e)) => Some((a.to_lowercase(), e.to_lowercase())),
        _ => None,
    }
}

/// Ordering for `greater_than` / `less_than`; `None` when incomparable.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&e);
    }
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => Some(a.as_str().cmp(e.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(context: Value, field: &str, op: &str, value: Value) -> bool {
        ConditionEvaluator::new().evaluate(&context, &[ConditionClause::new(field, op, value)])
    }

    #[test]
    fn test_empty_clause_list_is_true() {
        assert!(ConditionEvaluator::new().evaluate(&json!({}), &[]));
    }

    #[test]
    fn test_clauses_are_anded() {
        let context = json!({"status": "new", "score": 80});
        let evaluator = ConditionEvaluator::new();
        let clauses = vec![
            ConditionClause::new("status", "equals", json!("new")),
            ConditionClause::new("score", "greater_than", json!(50)),
        ];
        assert!(evaluator.evaluate(&context, &clauses));

        let clauses = vec![
            ConditionClause::new("status", "equals", json!("new")),
            ConditionClause::new("score", "greater_than", json!(90)),
        ];
        assert!(!evaluator.evaluate(&context, &clauses));
    }

    #[test]
    fn test_equals_is_loose_but_case_sensitive() {
        assert!(eval(json!({"status": "new"}), "status", "equals", json!("new")));
        assert!(!eval(json!({"status": "New"}), "status", "equals", json!("new")));
        assert!(eval(json!({"age": "42"}), "age", "equals", json!(42)));
        assert!(eval(json!({"age": 42.0}), "age", "equals", json!(42)));
        assert!(eval(json!({"opted_in": true}), "opted_in", "equals", json!("yes")));
        assert!(eval(json!({}), "missing", "equals", Value::Null));
        assert!(eval(json!({"status": "old"}), "status", "not_equals", json!("new")));
    }

    #[test]
    fn test_nested_field_paths() {
        let context = json!({"lead": {"address": {"country": "BE"}}, "tags": ["vip", "b2b"]});
        assert!(eval(context.clone(), "lead.address.country", "equals", json!("BE")));
        assert!(eval(context.clone(), "tags.1", "equals", json!("b2b")));
        assert!(!eval(context, "lead.address.city", "equals", json!("Gent")));
    }

    #[test]
    fn test_contains_and_starts_with_ignore_case() {
        let context = json!({"email": "Jane.Doe@Example.com", "score": 12345});
        assert!(eval(context.clone(), "email", "contains", json!("example.COM")));
        assert!(eval(context.clone(), "email", "starts_with", json!("jane")));
        assert!(!eval(context.clone(), "email", "starts_with", json!("doe")));
        // Non-string operands fail the clause.
        assert!(!eval(context.clone(), "score", "contains", json!("23")));
        assert!(!eval(context, "missing", "contains", json!("x")));
    }

    #[test]
    fn test_ordering_operators() {
        let context = json!({"score": 75, "amount": "19.5", "stage": "b"});
        assert!(eval(context.clone(), "score", "greater_than", json!(50)));
        assert!(eval(context.clone(), "score", "less_than", json!("100")));
        assert!(eval(context.clone(), "amount", "greater_than", json!(19)));
        assert!(eval(context.clone(), "stage", "greater_than", json!("a")));
        assert!(!eval(context.clone(), "missing", "greater_than", json!(0)));
        assert!(!eval(context, "missing", "less_than", json!(0)));
    }

    #[test]
    fn test_emptiness_is_loose_falsy() {
        let context = json!({
            "null": null,
            "empty_string": "",
            "zero_string": "0",
            "zero": 0,
            "zero_float": 0.0,
            "false": false,
            "empty_list": [],
            "empty_map": {},
            "space": " ",
            "one": 1,
            "list": [0]
        });
        for field in [
            "null",
            "empty_string",
            "zero_string",
            "zero",
            "zero_float",
            "false",
            "empty_list",
            "empty_map",
            "absent",
        ] {
            assert!(eval(context.clone(), field, "is_empty", Value::Null), "{field}");
            assert!(!eval(context.clone(), field, "is_not_empty", Value::Null), "{field}");
        }
        for field in ["space", "one", "list"] {
            assert!(eval(context.clone(), field, "is_not_empty", Value::Null), "{field}");
        }
    }

    #[test]
    fn test_unknown_operator_passes() {
        assert!(eval(json!({"a": 1}), "a", "matches_regex", json!("^x")));
    }

    #[test]
    fn test_symbol_aliases() {
        assert_eq!(Operator::from("==".to_string()), Operator::Equals);
        assert_eq!(Operator::from(">".to_string()), Operator::GreaterThan);
        assert_eq!(String::from(Operator::NotEquals), "not_equals");
    }

    #[test]
    fn test_evaluation_is_pure() {
        let context = json!({"status": "new"});
        let clauses = vec![ConditionClause::new("status", "equals", json!("new"))];
        let evaluator = ConditionEvaluator::new();
        let first = evaluator.evaluate(&context, &clauses);
        let second = evaluator.evaluate(&context, &clauses);
        assert_eq!(first, second);
        assert_eq!(context, json!({"status": "new"}));
    }

    #[test]
    fn test_parse_clauses_shapes() {
        let one = parse_clauses(&json!({"field": "a", "operator": "equals", "value": 1})).unwrap();
        assert_eq!(one.len(), 1);

        let many = parse_clauses(&json!([
            {"field": "a", "operator": "is_empty"},
            {"field": "b", "value": "x"}
        ]))
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].operator, Operator::Equals);

        assert!(parse_clauses(&Value::Null).unwrap().is_empty());
        assert!(parse_clauses(&json!("status == new")).is_err());
        assert!(parse_clauses(&json!([{"operator": "equals"}])).is_err());
    }
}
