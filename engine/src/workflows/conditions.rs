// Condition predicates and their evaluation against an execution's view of
// the world (contact snapshot + trigger context).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cadence_shared::ContactSnapshot;

/// Where a predicate field is resolved from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldScope {
    /// The contact snapshot carried in the execution context.
    Contact,
    /// The trigger payload / accumulated execution context.
    Context,
}

/// Typed reference to a field, replacing ad-hoc `"contact.foo"` string
/// prefixes. `name` may use dots to reach nested values within the scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRef {
    pub scope: FieldScope,
    pub name: String,
}

impl FieldRef {
    pub fn contact(name: &str) -> Self {
        Self {
            scope: FieldScope::Contact,
            name: name.to_string(),
        }
    }

    pub fn context(name: &str) -> Self {
        Self {
            scope: FieldScope::Context,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
}

/// How a predicate combines with the running evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub field: FieldRef,
    pub operator: PredicateOperator,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default)]
    pub logical: LogicalOperator,
}

impl Predicate {
    pub fn new(field: FieldRef, operator: PredicateOperator, value: JsonValue) -> Self {
        Self {
            field,
            operator,
            value,
            logical: LogicalOperator::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.logical = LogicalOperator::Or;
        self
    }

    pub fn equals(field: FieldRef, value: JsonValue) -> Self {
        Self::new(field, PredicateOperator::Equals, value)
    }

    pub fn not_equals(field: FieldRef, value: JsonValue) -> Self {
        Self::new(field, PredicateOperator::NotEquals, value)
    }

    pub fn contains(field: FieldRef, value: &str) -> Self {
        Self::new(
            field,
            PredicateOperator::Contains,
            JsonValue::String(value.to_string()),
        )
    }

    pub fn greater_than(field: FieldRef, value: f64) -> Self {
        Self::new(field, PredicateOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: FieldRef, value: f64) -> Self {
        Self::new(field, PredicateOperator::LessThan, serde_json::json!(value))
    }

    pub fn exists(field: FieldRef) -> Self {
        Self::new(field, PredicateOperator::Exists, JsonValue::Null)
    }

    pub fn not_exists(field: FieldRef) -> Self {
        Self::new(field, PredicateOperator::NotExists, JsonValue::Null)
    }
}

/// Evaluate an ordered predicate list.
///
/// Policy: predicates run in order; an OR predicate that matches
/// short-circuits the whole list to true; a non-OR predicate that fails
/// short-circuits to false; an empty list is true.
pub fn evaluate(predicates: &[Predicate], contact: &ContactSnapshot, context: &JsonValue) -> bool {
    for predicate in predicates {
        let matched = evaluate_one(predicate, contact, context);
        match predicate.logical {
            LogicalOperator::Or if matched => return true,
            LogicalOperator::And if !matched => return false,
            _ => {}
        }
    }
    true
}

fn evaluate_one(predicate: &Predicate, contact: &ContactSnapshot, context: &JsonValue) -> bool {
    let resolved = resolve(&predicate.field, contact, context);
    let field_value = resolved.as_ref().filter(|v| !v.is_null());

    match predicate.operator {
        PredicateOperator::Equals => field_value.map(|v| *v == predicate.value).unwrap_or(false),
        PredicateOperator::NotEquals => field_value.map(|v| *v != predicate.value).unwrap_or(true),
        PredicateOperator::Contains => match (field_value, coerce_string(&predicate.value)) {
            (Some(v), Some(needle)) => coerce_string(v)
                .map(|haystack| haystack.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            _ => false,
        },
        PredicateOperator::NotContains => match (field_value, coerce_string(&predicate.value)) {
            (Some(v), Some(needle)) => coerce_string(v)
                .map(|haystack| !haystack.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(true),
            _ => true,
        },
        PredicateOperator::GreaterThan => match (
            field_value.and_then(coerce_number),
            coerce_number(&predicate.value),
        ) {
            (Some(v), Some(target)) => v > target,
            _ => false,
        },
        PredicateOperator::LessThan => match (
            field_value.and_then(coerce_number),
            coerce_number(&predicate.value),
        ) {
            (Some(v), Some(target)) => v < target,
            _ => false,
        },
        PredicateOperator::Exists => field_value.is_some(),
        PredicateOperator::NotExists => field_value.is_none(),
    }
}

/// Resolve a field reference against its scope. Dot-separated names descend
/// into nested objects; arrays are matched by membership for tag lookups.
pub fn resolve(
    field: &FieldRef,
    contact: &ContactSnapshot,
    context: &JsonValue,
) -> Option<JsonValue> {
    match field.scope {
        FieldScope::Contact => resolve_contact(&field.name, contact),
        FieldScope::Context => lookup_path(context, &field.name),
    }
}

fn resolve_contact(name: &str, contact: &ContactSnapshot) -> Option<JsonValue> {
    match name {
        "id" => Some(JsonValue::String(contact.id.to_string())),
        "email" => Some(JsonValue::String(contact.email.clone())),
        "subscription_status" => Some(JsonValue::String(
            contact.subscription_status.as_str().to_string(),
        )),
        "tags" => Some(JsonValue::Array(
            contact
                .tags
                .iter()
                .map(|t| JsonValue::String(t.clone()))
                .collect(),
        )),
        _ => {
            let (head, rest) = match name.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (name, None),
            };
            let value = contact.attributes.get(head)?;
            match rest {
                Some(path) => lookup_path(value, path),
                None => Some(value.clone()),
            }
        }
    }
}

fn lookup_path(root: &JsonValue, path: &str) -> Option<JsonValue> {
    let mut current = root;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn coerce_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Array(items) => Some(
            items
                .iter()
                .filter_map(coerce_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

fn coerce_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
