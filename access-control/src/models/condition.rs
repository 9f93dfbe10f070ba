//! Condition expressions shared by capability rules and resource policies.
//!
//! Conditions are a closed set of operators evaluated against a
//! [`ResourceContext`] supplied by the caller. The JSON form follows the
//! Mongo-style shape stored by the admin endpoints:
//!
//! ```json
//! { "status": "archived", "createdBy": { "$ne": "u1" }, "level": { "$in": [1, 2] } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while parsing a JSON predicate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("conditions must be a JSON object")]
    NotAnObject,

    #[error("unsupported operator {operator} on field {field}")]
    UnknownOperator { field: String, operator: String },

    #[error("operator {operator} on field {field} expects an array")]
    ExpectedArray { field: String, operator: String },

    #[error("field {0} mixes operators and plain keys")]
    MixedOperators(String),
}

/// One comparison applied to a single context field.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchExpression {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

impl MatchExpression {
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            MatchExpression::Eq(expected) => values_equal(actual, expected),
            MatchExpression::Ne(expected) => !values_equal(actual, expected),
            MatchExpression::In(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
            MatchExpression::Nin(candidates) => {
                !candidates.iter().any(|c| values_equal(actual, c))
            }
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            MatchExpression::Eq(_) => "$eq",
            MatchExpression::Ne(_) => "$ne",
            MatchExpression::In(_) => "$in",
            MatchExpression::Nin(_) => "$nin",
        }
    }

    fn operand(&self) -> Value {
        match self {
            MatchExpression::Eq(v) | MatchExpression::Ne(v) => v.clone(),
            MatchExpression::In(vs) | MatchExpression::Nin(vs) => Value::Array(vs.clone()),
        }
    }
}

/// Numbers compare by value so `1` and `1.0` are equal. Two integers are
/// compared exactly.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            if x.is_f64() || y.is_f64() {
                return x.as_f64() == y.as_f64();
            }
            // One negative and one beyond i64::MAX.
            false
        }
        _ => a == b,
    }
}

/// Attributes of the record an action targets (`createdBy`, `tenantId`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceContext(Map<String, Value>);

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Build a context from a JSON object; any other JSON value yields `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Resolve a field, following dots into nested objects (`author.id`).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Field predicates that must all hold for a rule or policy to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Conditions(BTreeMap<String, Vec<MatchExpression>>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `{ field: value }`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(field, MatchExpression::Eq(value.into()))
    }

    pub fn with(mut self, field: impl Into<String>, expression: MatchExpression) -> Self {
        self.0.entry(field.into()).or_default().push(expression);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// True when every expression holds. Missing fields read as `null`.
    pub fn matches(&self, context: &ResourceContext) -> bool {
        self.0.iter().all(|(field, expressions)| {
            let actual = context.lookup(field).unwrap_or(&Value::Null);
            expressions.iter().all(|e| e.matches(actual))
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, ConditionError> {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => return Ok(Self::new()),
            _ => return Err(ConditionError::NotAnObject),
        };

        let mut conditions = Self::new();
        for (field, raw) in object {
            for expression in parse_field(field, raw)? {
                conditions = conditions.with(field.clone(), expression);
            }
        }
        Ok(conditions)
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (field, expressions) in &self.0 {
            let value = match expressions.as_slice() {
                [MatchExpression::Eq(v)] if !is_operator_object(v) => v.clone(),
                _ => Value::Object(
                    expressions
                        .iter()
                        .map(|e| (e.operator().to_string(), e.operand()))
                        .collect(),
                ),
            };
            object.insert(field.clone(), value);
        }
        Value::Object(object)
    }
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.keys().any(|k| k.starts_with('$')))
}

fn parse_field(field: &str, raw: &Value) -> Result<Vec<MatchExpression>, ConditionError> {
    let object = match raw {
        Value::Object(object) if is_operator_object(raw) => object,
        _ => return Ok(vec![MatchExpression::Eq(raw.clone())]),
    };

    if object.keys().any(|k| !k.starts_with('$')) {
        return Err(ConditionError::MixedOperators(field.to_string()));
    }

    object
        .iter()
        .map(|(operator, operand)| match operator.as_str() {
            "$eq" => Ok(MatchExpression::Eq(operand.clone())),
            "$ne" => Ok(MatchExpression::Ne(operand.clone())),
            "$in" => expect_array(field, operator, operand).map(MatchExpression::In),
            "$nin" => expect_array(field, operator, operand).map(MatchExpression::Nin),
            _ => Err(ConditionError::UnknownOperator {
                field: field.to_string(),
                operator: operator.clone(),
            }),
        })
        .collect()
}

fn expect_array(field: &str, operator: &str, operand: &Value) -> Result<Vec<Value>, ConditionError> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| ConditionError::ExpectedArray {
            field: field.to_string(),
            operator: operator.to_string(),
        })
}

impl TryFrom<Value> for Conditions {
    type Error = ConditionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Conditions::from_json(&value)
    }
}

impl From<Conditions> for Value {
    fn from(conditions: Conditions) -> Self {
        conditions.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_values_are_equality() {
        let conditions = Conditions::from_json(&json!({"status": "archived"})).unwrap();
        assert!(conditions.matches(&ResourceContext::new().with("status", "archived")));
        assert!(!conditions.matches(&ResourceContext::new().with("status", "draft")));
    }

    #[test]
    fn test_operators() {
        let conditions = Conditions::from_json(&json!({
            "createdBy": {"$ne": "u1"},
            "status": {"$in": ["draft", "review"]},
            "level": {"$nin": [3]},
        }))
        .unwrap();

        let ctx = ResourceContext::new()
            .with("createdBy", "u2")
            .with("status", "review")
            .with("level", 1);
        assert!(conditions.matches(&ctx));

        assert!(!conditions.matches(&ctx.clone().with("createdBy", "u1")));
        assert!(!conditions.matches(&ctx.clone().with("status", "published")));
        assert!(!conditions.matches(&ctx.with("level", 3.0)));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let big = 9_007_199_254_740_993_i64;
        let conditions = Conditions::from_json(&json!({ "ownerId": big })).unwrap();
        assert!(conditions.matches(&ResourceContext::new().with("ownerId", big)));
        assert!(!conditions.matches(&ResourceContext::new().with("ownerId", big - 1)));

        let huge = u64::MAX;
        let conditions = Conditions::from_json(&json!({ "ownerId": huge })).unwrap();
        assert!(conditions.matches(&ResourceContext::new().with("ownerId", huge)));
        assert!(!conditions.matches(&ResourceContext::new().with("ownerId", huge - 1)));
        assert!(!conditions.matches(&ResourceContext::new().with("ownerId", -1)));

        let one = Conditions::from_json(&json!({ "level": 1 })).unwrap();
        assert!(one.matches(&ResourceContext::new().with("level", 1.0)));
    }

    #[test]
    fn test_missing_field_reads_as_null() {
        let eq = Conditions::eq("tenantId", "t1");
        assert!(!eq.matches(&ResourceContext::new()));

        let ne = Conditions::new().with("tenantId", MatchExpression::Ne(json!("t1")));
        assert!(ne.matches(&ResourceContext::new()));
    }

    #[test]
    fn test_nested_lookup() {
        let conditions = Conditions::eq("author.id", "u1");
        let ctx = ResourceContext::from_json(json!({"author": {"id": "u1"}})).unwrap();
        assert!(conditions.matches(&ctx));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let err = Conditions::from_json(&json!({"score": {"$gt": 3}})).unwrap_err();
        assert!(matches!(err, ConditionError::UnknownOperator { .. }));
    }

    #[test]
    fn test_rejects_non_array_in() {
        let err = Conditions::from_json(&json!({"status": {"$in": "draft"}})).unwrap_err();
        assert!(matches!(err, ConditionError::ExpectedArray { .. }));
    }

    #[test]
    fn test_rejects_mixed_keys() {
        let err = Conditions::from_json(&json!({"meta": {"$ne": 1, "kind": "x"}})).unwrap_err();
        assert_eq!(err, ConditionError::MixedOperators("meta".to_string()));
    }

    #[test]
    fn test_rejects_non_object() {
        assert_eq!(
            Conditions::from_json(&json!(["status"])).unwrap_err(),
            ConditionError::NotAnObject
        );
        assert!(Conditions::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_serde_uses_json_predicate_shape() {
        let conditions: Conditions =
            serde_json::from_value(json!({"status": "archived", "level": {"$in": [1, 2]}}))
                .unwrap();
        assert_eq!(
            serde_json::to_value(&conditions).unwrap(),
            json!({"status": "archived", "level": {"$in": [1, 2]}})
        );
    }
}
