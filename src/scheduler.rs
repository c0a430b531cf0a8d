//! Cron trigger for full sweeps.
//!
//! Expressions have the usual five fields (minute, hour, day-of-month,
//! month, day-of-week) and accept `*`, lists, ranges and `/step`. Times are
//! evaluated in UTC. When both day fields are restricted a day matches if
//! either does.

use crate::sync::{ScanError, orchestrator::ScanOrchestrator};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How far ahead `next_after` searches before giving up (e.g. `0 0 30 2 *`).
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cron expression `{expr}`: {reason}")]
pub struct ScheduleError {
    pub expr: String,
    pub reason: String,
}

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
// 7 is accepted as an alias for Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fail = |reason: String| ScheduleError {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(fail(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(fail)?;
        let hours = parse_field(fields[1], &HOUR).map_err(fail)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(fail)?;
        let months = parse_field(fields[3], &MONTH).map_err(fail)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(fail)?;
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1 << 7));
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// First fire time strictly after `after`, at minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= horizon {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(t.day());
        let dow = self.days_of_week.contains(t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldSet, String> {
    let mut set = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step `{}` in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", spec.name));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec)?, parse_value(hi, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // `5/15` means every 15 starting at 5.
            if part.contains('/') {
                (value, spec.max)
            } else {
                (value, value)
            }
        };
        if start > end {
            return Err(format!("range `{}` runs backwards in {} field", range, spec.name));
        }

        for value in (start..=end).step_by(step as usize) {
            set |= 1 << value;
        }
    }
    Ok(FieldSet(set))
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("bad value `{}` in {} field", raw, spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

/// Start the trigger loop. It fires a sweep whenever `schedule` comes due,
/// and once immediately when `run_on_startup` is set, until `shutdown` is
/// cancelled.
pub fn spawn(
    orchestrator: Arc<ScanOrchestrator>,
    schedule: Schedule,
    run_on_startup: bool,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(schedule = %schedule, "scan scheduler started");
        if run_on_startup {
            launch_sweep(orchestrator.clone(), shutdown.child_token(), "startup");
        }

        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                warn!(schedule = %schedule, "schedule never fires, scheduler exiting");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "next scheduled sweep");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scan scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            launch_sweep(orchestrator.clone(), shutdown.child_token(), "schedule");
        }
    })
}

/// Run one full sweep in the background and log how it ended.
pub fn launch_sweep(
    orchestrator: Arc<ScanOrchestrator>,
    cancel: CancellationToken,
    trigger: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match orchestrator.run_full_sweep(&cancel).await {
            Ok(summary) => info!(
                trigger,
                scanned = summary.buckets_scanned,
                failed = summary.failures.len(),
                "sweep finished"
            ),
            Err(ScanError::SweepInProgress) => {
                warn!(trigger, "sweep skipped, another sweep is still running")
            }
            Err(err) => error!(trigger, "sweep failed: {}", err),
        }
    })
}
