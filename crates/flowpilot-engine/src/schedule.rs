//! Cron helpers for time-based triggers.
//!
//! Expressions are parsed via the `cron` crate which supports standard
//! 6-field (with seconds) and 7-field formats.  Typical 5-field user input
//! is normalized by prepending a `0` seconds field.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};

/// Normalize a cron expression to the 6/7-field format expected by the
/// `cron` crate.
pub fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse a cron expression string into a [`cron::Schedule`].
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    if expr.trim().is_empty() {
        return Err(EngineError::InvalidCronExpression {
            expression: expr.to_string(),
            reason: "expression is empty".into(),
        });
    }
    cron::Schedule::from_str(&normalize_cron_expr(expr)).map_err(|e| {
        EngineError::InvalidCronExpression {
            expression: expr.to_string(),
            reason: e.to_string(),
        }
    })
}

/// The next occurrence strictly after `after`.
pub fn next_run_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Preview the next `count` occurrences of `expr` from now.
pub fn next_runs(expr: &str, count: usize) -> Result<Vec<DateTime<Utc>>> {
    let schedule = parse_schedule(expr)?;
    Ok(schedule.upcoming(Utc).take(count).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn five_field_gets_seconds() {
        assert_eq!(normalize_cron_expr("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron_expr("0 0 9 * * *"), "0 0 9 * * *");
    }

    #[test]
    fn invalid_expression_is_structured_error() {
        let err = parse_schedule("not a cron").unwrap_err();
        assert!(matches!(err, EngineError::InvalidCronExpression { .. }));
        assert!(matches!(parse_schedule("  "), Err(EngineError::InvalidCronExpression { .. })));
    }

    #[test]
    fn next_run_is_after_reference() {
        let schedule = parse_schedule("0 9 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let next = next_run_after(&schedule, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_runs_are_ordered() {
        let runs = next_runs("0 * * * *", 3).unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs.windows(2).all(|w| w[0] < w[1]));
        assert!(runs.iter().all(|r| r.minute() == 0 && r.second() == 0));
    }
}
