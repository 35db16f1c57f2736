//! Trigger condition evaluation.
//!
//! A trigger carries an ordered list of [`Condition`]s.  They are combined
//! with a left fold: each condition's [`LogicalOperator`] decides how the
//! *next* condition joins the running result, so `[A(OR), B(AND), C]` means
//! `(A || B) && C`.  There is no grouping.
//!
//! Evaluation is fail-closed.  A missing field has fixed semantics per
//! operator, and a malformed comparison (bad regex, non-list operand for
//! `in`) makes the whole list evaluate to `false`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    RegexMatch,
}

/// How a condition combines with the one after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// One predicate over the firing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path into the context, e.g. `payload.sender`.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            logical_operator: None,
        }
    }

    /// Join the next condition with OR instead of AND.
    pub fn or(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::Or);
        self
    }

    pub fn and(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::And);
        self
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `conditions` against `context`.  An empty list is `true`.
pub fn evaluate(conditions: &[Condition], context: &Value) -> bool {
    let mut result = true;
    let mut combinator = LogicalOperator::And;

    for condition in conditions {
        let actual = lookup(context, &condition.field);
        let met = match apply_operator(condition.operator, actual, &condition.value) {
            Ok(met) => met,
            Err(reason) => {
                debug!(field = %condition.field, operator = ?condition.operator, %reason, "condition error, failing closed");
                return false;
            }
        };
        result = match combinator {
            LogicalOperator::And => result && met,
            LogicalOperator::Or => result || met,
        };
        combinator = condition.logical_operator.unwrap_or_default();
    }

    result
}

/// Walk a dot-path through objects (and arrays, by numeric index).
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(context);
    }
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn apply_operator(
    operator: ConditionOperator,
    actual: Option<&Value>,
    expected: &Value,
) -> Result<bool, String> {
    let Some(actual) = actual else {
        // Undefined field.
        return match operator {
            ConditionOperator::NotEquals | ConditionOperator::NotIn => Ok(true),
            _ => Ok(false),
        };
    };

    match operator {
        ConditionOperator::Equals => Ok(values_equal(actual, expected)),
        ConditionOperator::NotEquals => Ok(!values_equal(actual, expected)),
        ConditionOperator::Contains => Ok(match actual {
            Value::String(s) => as_text(expected).is_some_and(|needle| s.contains(&needle)),
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            _ => false,
        }),
        ConditionOperator::StartsWith => Ok(match (actual, as_text(expected)) {
            (Value::String(s), Some(prefix)) => s.starts_with(&prefix),
            _ => false,
        }),
        ConditionOperator::EndsWith => Ok(match (actual, as_text(expected)) {
            (Value::String(s), Some(suffix)) => s.ends_with(&suffix),
            _ => false,
        }),
        ConditionOperator::GreaterThan => Ok(compare(actual, expected) == Some(std::cmp::Ordering::Greater)),
        ConditionOperator::LessThan => Ok(compare(actual, expected) == Some(std::cmp::Ordering::Less)),
        ConditionOperator::In => membership(actual, expected),
        ConditionOperator::NotIn => membership(actual, expected).map(|found| !found),
        ConditionOperator::RegexMatch => {
            let pattern = expected
                .as_str()
                .ok_or_else(|| "regex_match needs a string pattern".to_string())?;
            let re = Regex::new(pattern).map_err(|e| format!("invalid regex `{pattern}`: {e}"))?;
            Ok(as_text(actual).is_some_and(|text| re.is_match(&text)))
        }
    }
}

fn membership(actual: &Value, expected: &Value) -> Result<bool, String> {
    match expected {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(actual, item))),
        other => Err(format!("in/not_in needs a list operand, got {other}")),
    }
}

/// JSON equality, treating numbers by value (`1` equals `1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Numeric comparison when both sides are numbers (or numeric strings),
/// otherwise lexicographic for two strings (ISO timestamps order correctly).
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
