//! Five-field cron expressions, evaluated in UTC.
//!
//! Fields are `minute hour day-of-month month day-of-week`. Each field accepts
//! `*`, a value, a range `a-b`, a step `*/n` or `a-b/n`, and comma separated
//! lists of those. Day-of-week runs 0-7 with both 0 and 7 meaning Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Timelike, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("Expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("Invalid {field} field: {value}")]
    InvalidField { field: &'static str, value: String },
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
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

/// Longest search window for the next match. Covers leap-day schedules.
const SEARCH_YEARS: i64 = 8;

/// A parsed cron schedule. Each field is a bit set of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_any: bool,
    day_of_week_any: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
            day_of_month_any: fields[2] == "*",
            day_of_week_any: fields[4] == "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the schedule fires at the minute containing `time`.
    pub fn matches(&self, time: DateTime<Utc>) -> bool {
        self.months & (1 << time.month()) != 0
            && self.day_matches(time)
            && self.hours & (1 << time.hour()) != 0
            && self.minutes & (1 << time.minute()) != 0
    }

    /// First firing time strictly after `after`, truncated to the minute.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut time = after.with_second(0)?.with_nanosecond(0)? + TimeDelta::minutes(1);
        let limit = after + TimeDelta::days(366 * SEARCH_YEARS);

        while time <= limit {
            if self.months & (1 << time.month()) == 0 {
                time = start_of_next_month(time)?;
                continue;
            }
            if !self.day_matches(time) {
                time = start_of_next_day(time)?;
                continue;
            }
            if self.hours & (1 << time.hour()) == 0 {
                time = time.with_minute(0)? + TimeDelta::hours(1);
                continue;
            }
            if self.minutes & (1 << time.minute()) == 0 {
                time += TimeDelta::minutes(1);
                continue;
            }
            return Some(time);
        }

        None
    }

    /// Restricted day-of-month and day-of-week match if either matches.
    fn day_matches(&self, time: DateTime<Utc>) -> bool {
        let dom = self.days_of_month & (1 << time.day()) != 0;
        let dow = self.days_of_week & (1 << time.weekday().num_days_from_sunday()) != 0;

        match (self.day_of_month_any, self.day_of_week_any) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn start_of_next_day(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = time.date_naive().succ_opt()?;
    Some(next.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if time.month() == 12 {
        (time.year() + 1, 1)
    } else {
        (time.year(), time.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField {
        field: spec.name,
        value: field.to_string(),
    };

    let mut bits = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec).ok_or_else(invalid)?, parse_value(b, spec).ok_or_else(invalid)?)
        } else {
            let value = parse_value(range, spec).ok_or_else(invalid)?;
            // `a/n` runs from a to the end of the field
            if step > 1 { (value, spec.max) } else { (value, value) }
        };

        if start > end {
            return Err(invalid());
        }

        for value in (start..=end).step_by(step as usize) {
            bits |= 1 << value;
        }
    }

    Ok(bits)
}

fn parse_value(value: &str, spec: &FieldSpec) -> Option<u32> {
    let value: u32 = value.parse().ok()?;
    (spec.min..=spec.max).contains(&value).then_some(value)
}
