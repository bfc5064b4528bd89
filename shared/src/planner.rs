//! Cron planning: pure evaluation of 5-field cron expressions in a zone
//!
//! Given a cron expression, an IANA zone, and a reference instant, the
//! planner produces upcoming fire instants in UTC. It is deterministic and
//! performs no I/O; expressions are validated here once (at create/update
//! time) so evaluation cannot fail later at dispatch time.
// Wall-clock semantics: evaluation happens in the schedule's zone.
// Spring-forward gaps are skipped (the nonexistent local time never
// fires); fall-back repeats surface once, at the earlier UTC instant.
// Day-of-month and day-of-week combine with OR-semantics when both are
// restricted, per the standard five-field form.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

/// Errors surfaced when parsing a cron expression or zone.
///
/// A parse error is distinct from "no upcoming matches"; the latter cannot
/// happen for a well-formed 5-field expression.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("Invalid timezone '{0}': not a known IANA zone")]
    InvalidTimezone(String),
}

/// A validated cron expression bound to a zone.
#[derive(Debug, Clone)]
pub struct CronPlan {
    expr: String,
    timezone: Tz,
    // The `cron` crate intersects restricted day-of-month and day-of-week
    // fields, while the standard five-field form unions them. When both
    // are restricted we evaluate two relaxed schedules and merge their
    // fire sequences.
    schedules: Vec<Schedule>,
}

impl CronPlan {
    /// Parse a 5-field cron expression evaluated in `timezone`.
    pub fn parse(expr: &str, timezone: &str) -> Result<Self, PlannerError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| PlannerError::InvalidTimezone(timezone.to_string()))?;

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(PlannerError::InvalidCron {
                expr: expr.to_string(),
                reason: format!(
                    "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                    fields.len()
                ),
            });
        }

        // Standard five-field day-of-week numbering is 0-7 with both 0 and
        // 7 meaning Sunday; the cron crate numbers days differently, so
        // numeric tokens are rewritten to unambiguous day names.
        let dow = normalize_dow_field(fields[4]).map_err(|reason| PlannerError::InvalidCron {
            expr: expr.to_string(),
            reason,
        })?;
        let mut fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        fields[4] = dow;

        let dom_restricted = fields[2] != "*";
        let dow_restricted = fields[4] != "*";

        let mut variants: Vec<Vec<String>> = Vec::new();
        if dom_restricted && dow_restricted {
            let mut dom_only = fields.clone();
            dom_only[4] = "*".to_string();
            let mut dow_only = fields.clone();
            dow_only[2] = "*".to_string();
            variants.push(dom_only);
            variants.push(dow_only);
        } else {
            variants.push(fields.clone());
        }

        let mut schedules = Vec::with_capacity(variants.len());
        for variant in variants {
            // The cron crate expects a 6-field expression with a leading
            // seconds field.
            let full = format!("0 {}", variant.join(" "));
            let schedule = Schedule::from_str(&full).map_err(|e| PlannerError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
            schedules.push(schedule);
        }

        Ok(Self {
            expr: expr.to_string(),
            timezone: tz,
            schedules,
        })
    }

    /// The original 5-field expression.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// The zone the expression is evaluated in.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The next `count` fire instants strictly after `after`, in UTC.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let local_after = after.with_timezone(&self.timezone);
        let mut iters: Vec<_> = self
            .schedules
            .iter()
            .map(|s| s.after(&local_after).peekable())
            .collect();

        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let mut best: Option<DateTime<Tz>> = None;
            for iter in iters.iter_mut() {
                if let Some(head) = iter.peek() {
                    if best.as_ref().map_or(true, |b| head < b) {
                        best = Some(head.clone());
                    }
                }
            }
            let Some(best) = best else { break };
            for iter in iters.iter_mut() {
                while iter.peek().map_or(false, |head| *head == best) {
                    iter.next();
                }
            }
            out.push(best.with_timezone(&Utc));
        }
        out
    }

    /// The next fire instant strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.upcoming(after, 1).into_iter().next()
    }

    /// The gap between the next two fires after `after`.
    ///
    /// Used as the default recency window for dependency freshness.
    pub fn period(&self, after: DateTime<Utc>) -> Option<Duration> {
        let fires = self.upcoming(after, 2);
        match fires.as_slice() {
            [first, second] => Some(*second - *first),
            _ => None,
        }
    }
}

/// Validate an expression/zone pair without keeping the plan.
pub fn validate(expr: &str, timezone: &str) -> Result<(), PlannerError> {
    CronPlan::parse(expr, timezone).map(|_| ())
}

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite numeric day-of-week tokens (0-7, Sunday twice) as day names,
/// preserving lists, ranges, and step suffixes. Non-numeric tokens pass
/// through for the cron parser to validate.
fn normalize_dow_field(field: &str) -> Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }
    let mut parts = Vec::new();
    for token in field.split(',') {
        let (body, step) = match token.split_once('/') {
            Some((body, step)) => (body, Some(step)),
            None => (token, None),
        };
        let mapped = if body == "*" {
            body.to_string()
        } else if let Some((from, to)) = body.split_once('-') {
            format!("{}-{}", map_dow_token(from)?, map_dow_token(to)?)
        } else {
            map_dow_token(body)?
        };
        match step {
            Some(step) => parts.push(format!("{mapped}/{step}")),
            None => parts.push(mapped),
        }
    }
    Ok(parts.join(","))
}

fn map_dow_token(token: &str) -> Result<String, String> {
    match token.parse::<u8>() {
        Ok(value) if value <= 7 => Ok(DOW_NAMES[(value % 7) as usize].to_string()),
        Ok(value) => Err(format!("day-of-week value {value} out of range (0-7)")),
        Err(_) => Ok(token.to_string()),
    }
}
