//! Parameter validation against a catalog schema.
//!
//! Runs before any side effect.  The first violation found (in schema
//! order) is returned.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::{Map, Value};

use super::catalog::{ActionDefinition, ParamType, ParameterDef};
use crate::error::ValidationError;

/// Compiled catalog patterns; `None` marks a pattern that failed to compile.
static PATTERNS: LazyLock<DashMap<&'static str, Option<Regex>>> = LazyLock::new(DashMap::new);

fn compiled(pattern: &'static str) -> Option<Regex> {
    PATTERNS
        .entry(pattern)
        .or_insert_with(|| Regex::new(pattern).ok())
        .clone()
}

/// Check `params` against every parameter of `definition`.
///
/// A `null` value counts as absent.  Unknown keys are ignored.
pub fn validate(definition: &ActionDefinition, params: &Map<String, Value>) -> Result<(), ValidationError> {
    for def in definition.parameters {
        match params.get(def.name) {
            None | Some(Value::Null) => {
                if def.required {
                    return Err(ValidationError::MissingParameter {
                        parameter: def.name.to_string(),
                    });
                }
            }
            Some(value) => validate_value(def, value)?,
        }
    }
    Ok(())
}

fn validate_value(def: &ParameterDef, value: &Value) -> Result<(), ValidationError> {
    if !type_matches(def.param_type, value) {
        return Err(ValidationError::InvalidType {
            parameter: def.name.to_string(),
            expected: def.param_type.as_str().to_string(),
        });
    }

    if let (Some(pattern), Some(s)) = (def.pattern, value.as_str()) {
        // an invalid pattern never matches
        let matched = compiled(pattern).is_some_and(|re| re.is_match(s));
        if !matched {
            return Err(ValidationError::PatternMismatch {
                parameter: def.name.to_string(),
                pattern: pattern.to_string(),
            });
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = def.min
            && n < min
        {
            return Err(ValidationError::BelowMin {
                parameter: def.name.to_string(),
                min,
                actual: n,
            });
        }
        if let Some(max) = def.max
            && n > max
        {
            return Err(ValidationError::ExceedsMax {
                parameter: def.name.to_string(),
                max,
                actual: n,
            });
        }
    }

    Ok(())
}

fn type_matches(param_type: ParamType, value: &Value) -> bool {
    match param_type {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Date => value.as_str().is_some_and(|s| parse_date(s).is_some()),
        ParamType::Array => value.is_array(),
        ParamType::Object => value.is_object(),
    }
}

/// Parse an RFC 3339 timestamp parameter.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::action::catalog::definition;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_is_named() {
        let err = validate(definition(ActionType::CreateTask), &params(json!({ "priority": "high" }))).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingParameter {
                parameter: "title".into()
            }
        );

        let err = validate(definition(ActionType::CreateTask), &params(json!({ "title": null }))).unwrap_err();
        assert_eq!(err.code(), "missing_parameter");
    }

    #[test]
    fn array_parameters_must_be_arrays() {
        let p = params(json!({ "to": "a@example.com", "subject": "s", "body": "b" }));
        let err = validate(definition(ActionType::SendEmail), &p).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidType {
                parameter: "to".into(),
                expected: "array".into()
            }
        );
    }

    #[test]
    fn dates_must_be_rfc3339() {
        let def = definition(ActionType::CreateReminder);
        let ok = params(json!({ "title": "t", "remind_at": "2025-03-10T09:00:00Z" }));
        assert!(validate(def, &ok).is_ok());
        let bad = params(json!({ "title": "t", "remind_at": "tomorrow" }));
        assert_eq!(validate(def, &bad).unwrap_err().code(), "invalid_type");
    }

    #[test]
    fn pattern_and_range_rules() {
        let def = definition(ActionType::CreateTask);
        let err = validate(def, &params(json!({ "title": "t", "priority": "whenever" }))).unwrap_err();
        assert_eq!(err.code(), "pattern_mismatch");
        assert_eq!(err.parameter(), "priority");

        let def = definition(ActionType::AnalyzeData);
        let low = params(json!({ "data_type": "tasks", "time_range_days": 0 }));
        assert_eq!(validate(def, &low).unwrap_err().code(), "below_min");
        let high = params(json!({ "data_type": "tasks", "time_range_days": 365 }));
        assert_eq!(validate(def, &high).unwrap_err().code(), "exceeds_max");
        let fine = params(json!({ "data_type": "tasks", "time_range_days": 30 }));
        assert!(validate(def, &fine).is_ok());
    }

    #[test]
    fn patterns_are_compiled_once() {
        let def = definition(ActionType::CreateTask);
        let pattern = def
            .parameters
            .iter()
            .find_map(|p| p.pattern)
            .unwrap();
        for _ in 0..3 {
            assert!(validate(def, &params(json!({ "title": "t", "priority": "high" }))).is_ok());
        }
        assert!(PATTERNS.get(pattern).is_some_and(|re| re.is_some()));

        let first = compiled(pattern).unwrap();
        let again = compiled(pattern).unwrap();
        assert_eq!(first.as_str(), again.as_str());
        assert!(compiled("(unclosed").is_none());
    }

    #[test]
    fn optional_parameters_may_be_absent() {
        let p = params(json!({ "title": "Write report", "extra": 1 }));
        assert!(validate(definition(ActionType::CreateTask), &p).is_ok());
    }
}
