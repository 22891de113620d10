//! Cron expression parsing.
//!
//! Expressions are seconds-first (`sec min hour dom month dow [year]`).
//! Classic five-field expressions get a `0` seconds field prepended.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ::cron::Schedule;

use crate::error::ScheduleError;

/// Prepend a seconds field to five-field expressions.
pub fn normalize(expr: &str) -> Cow<'_, str> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {trimmed}"))
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// Parse a cron expression, rejecting blank input before the parser sees it.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ScheduleError> {
    if expr.trim().is_empty() {
        return Err(ScheduleError::Empty);
    }
    Schedule::from_str(&normalize(expr)).map_err(|e| ScheduleError::Invalid {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a cron expression and compute the next fire time from now.
pub fn next_fire(expr: &str) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(parse_schedule(expr)?.upcoming(Utc).next())
}
