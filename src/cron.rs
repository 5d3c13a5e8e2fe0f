//! Cron-like trigger scheduling (spec.md §4.J).
//!
//! The system this was distilled from parses no real cron grammar — its
//! expression parser is a stub that always returns `now + 1 hour`, an
//! open question spec.md §9 hands to the implementer. This module
//! implements a standard 5-field grammar (`minute hour day-of-month month
//! day-of-week`) supporting `*`, comma-separated lists, `a-b` ranges, and
//! `*/N` steps, with the usual cron day-of-month/day-of-week OR rule.
//!
//! Timezone is carried on [`CronSchedule`] for fidelity with the
//! registration payload but evaluation is UTC-only — see DESIGN.md.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::model::{Job, Parameters};

const SEARCH_LIMIT_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldMatch {
    Any,
    Values(HashSet<u32>),
}

impl FieldMatch {
    fn matches(&self, value: u32) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Values(set) => set.contains(&value),
        }
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldMatch> {
    if field == "*" {
        return Ok(FieldMatch::Any);
    }
    let mut values = HashSet::new();
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().map_err(|_| SchedulerError::validation(format!("invalid step in cron field: {part}")))?),
            None => (part, 1),
        };
        if step == 0 {
            return Err(SchedulerError::validation(format!("cron step must be non-zero: {part}")));
        }

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range_part.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| SchedulerError::validation(format!("invalid range in cron field: {part}")))?;
            let hi: u32 = hi.parse().map_err(|_| SchedulerError::validation(format!("invalid range in cron field: {part}")))?;
            (lo, hi)
        } else {
            let v: u32 = range_part.parse().map_err(|_| SchedulerError::validation(format!("invalid value in cron field: {part}")))?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(SchedulerError::validation(format!("cron field value out of range [{min}, {max}]: {part}")));
        }

        let mut v = lo;
        while v <= hi {
            values.insert(v);
            v += step;
        }
    }
    Ok(FieldMatch::Values(values))
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    minute: FieldMatch,
    hour: FieldMatch,
    day_of_month: FieldMatch,
    month: FieldMatch,
    day_of_week: FieldMatch,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::validation(format!("cron expression must have 5 fields, got {}: {expression}", fields.len())));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    fn day_matches(&self, date: DateTime<Utc>) -> bool {
        let dom_any = matches!(self.day_of_month, FieldMatch::Any);
        let dow_any = matches!(self.day_of_week, FieldMatch::Any);
        let dom_hit = self.day_of_month.matches(date.day());
        let dow_hit = self.day_of_week.matches(date.weekday().num_days_from_sunday());

        match (dom_any, dow_any) {
            (true, true) => true,
            (true, false) => dow_hit,
            (false, true) => dom_hit,
            (false, false) => dom_hit || dow_hit,
        }
    }

    fn matches(&self, date: DateTime<Utc>) -> bool {
        self.minute.matches(date.minute())
            && self.hour.matches(date.hour())
            && self.month.matches(date.month())
            && self.day_matches(date)
    }

    /// First matching minute strictly after `from`, searched up to one year
    /// ahead. `None` if the expression never matches in that window (e.g.
    /// February 30th).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = from.with_second(0).unwrap().with_nanosecond(0).unwrap() + chrono::Duration::minutes(1);
        for _ in 0..SEARCH_LIMIT_MINUTES {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

/// Template a cron schedule materializes into a job on each firing.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub name: String,
    pub job_type: String,
    pub parameters: Parameters,
    pub priority: i32,
    pub max_retries: i32,
}

/// A named schedule (spec.md §4.J).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    pub schedule_id: String,
    pub raw_expression: String,
    expression: CronExpression,
    pub timezone: String,
    pub enabled: bool,
    pub template: JobTemplate,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl CronSchedule {
    pub fn new(schedule_id: impl Into<String>, expression: &str, timezone: impl Into<String>, template: JobTemplate) -> Result<Self> {
        let parsed = CronExpression::parse(expression)?;
        let next_run = parsed.next_after(Utc::now());
        Ok(Self {
            schedule_id: schedule_id.into(),
            raw_expression: expression.to_string(),
            expression: parsed,
            timezone: timezone.into(),
            enabled: true,
            template,
            next_run,
            last_run: None,
        })
    }

    fn materialize(&self, key: u64) -> Job {
        let mut job = Job::new(key, uuid::Uuid::new_v4().to_string(), self.template.name.clone(), self.template.job_type.clone());
        job.parameters = self.template.parameters.clone();
        job.priority = self.template.priority;
        job.max_retries = self.template.max_retries;
        job.tags = vec!["scheduled".to_string(), format!("cron:{}", self.schedule_id)];
        job
    }
}

/// Registry of cron schedules, evaluated on a one-minute tick (spec.md
/// §4.H "cron-like trigger evaluation").
pub struct CronScheduler {
    schedules: DashMap<String, CronSchedule>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self { schedules: DashMap::new() }
    }

    pub fn register(&self, schedule: CronSchedule) {
        info!(schedule_id = %schedule.schedule_id, expression = %schedule.raw_expression, "cron schedule registered");
        self.schedules.insert(schedule.schedule_id.clone(), schedule);
    }

    pub fn unregister(&self, schedule_id: &str) {
        self.schedules.remove(schedule_id);
    }

    pub fn set_enabled(&self, schedule_id: &str, enabled: bool) {
        if let Some(mut schedule) = self.schedules.get_mut(schedule_id) {
            schedule.enabled = enabled;
        }
    }

    /// Evaluate every schedule whose `next_run <= now`, materialize a job
    /// from its template (using `next_key` to assign increasing keys), and
    /// recompute `next_run`. Returns the materialized jobs for the caller
    /// to enqueue through the control loop.
    pub fn evaluate(&self, now: DateTime<Utc>, mut next_key: impl FnMut() -> u64) -> Vec<Job> {
        let mut fired = Vec::new();
        for mut schedule in self.schedules.iter_mut() {
            if !schedule.enabled {
                continue;
            }
            let Some(next_run) = schedule.next_run else { continue };
            if next_run > now {
                continue;
            }

            let job = schedule.materialize(next_key());
            schedule.last_run = Some(now);
            schedule.next_run = schedule.expression.next_after(now);
            if schedule.next_run.is_none() {
                warn!(schedule_id = %schedule.schedule_id, "cron schedule has no future occurrence within the search window");
            }
            fired.push(job);
        }
        fired
    }
}
