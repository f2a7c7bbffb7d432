//! Five-field cron evaluation.
//!
//! Operators write standard five-field expressions
//! (`minute hour day-of-month month day-of-week`). The `cron` crate wants a
//! leading seconds field, so expressions are normalised with `0` seconds
//! before parsing: fires always land on a whole minute.

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ConfigError;

/// Parse a five-field cron expression.
fn parse(expr: &str) -> Result<Schedule, ConfigError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, got {fields}"),
        });
    }
    format!("0 {expr}")
        .parse::<Schedule>()
        .map_err(|e| ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

/// Validate a cron expression without evaluating it.
pub fn validate(expr: &str) -> Result<(), ConfigError> {
    parse(expr).map(|_| ())
}

/// Compute the next fire instant strictly after `after`.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
    let schedule = parse(expr)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| ConfigError::InvalidCron {
            expr: expr.to_string(),
            reason: "no upcoming instant".to_string(),
        })
}
