//! Schedule predicates: five-field cron expressions and fixed intervals.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};

use modhost_protocols::ScheduleSpec;

use crate::error::ScheduleParseError;

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
// 0 and 7 are both Sunday.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldPart {
    Any,
    Value(u32),
    /// `*/n`: the value is a multiple of `n`.
    Every(u32),
    Range { start: u32, end: u32, step: u32 },
}

impl FieldPart {
    fn matches(&self, value: u32) -> bool {
        match *self {
            FieldPart::Any => true,
            FieldPart::Value(v) => v == value,
            FieldPart::Every(n) => value % n == 0,
            FieldPart::Range { start, end, step } => {
                value >= start && value <= end && (value - start) % step == 0
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field(Vec<FieldPart>);

impl Field {
    fn parse(raw: &str, spec: FieldSpec) -> Result<Self, ScheduleParseError> {
        let parts = raw
            .split(',')
            .map(|part| parse_part(part, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Field(parts))
    }

    fn matches(&self, value: u32) -> bool {
        self.0.iter().any(|p| p.matches(value))
    }
}

fn parse_part(raw: &str, spec: FieldSpec) -> Result<FieldPart, ScheduleParseError> {
    let invalid = || ScheduleParseError::InvalidField {
        field: spec.name,
        value: raw.to_string(),
    };

    if raw == "*" {
        return Ok(FieldPart::Any);
    }

    let (range, step) = match raw.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(ScheduleParseError::ZeroStep(spec.name));
            }
            (range, Some(step))
        }
        None => (raw, None),
    };

    if range == "*" {
        return match step {
            Some(n) => Ok(FieldPart::Every(n)),
            None => Ok(FieldPart::Any),
        };
    }

    let number = |s: &str| -> Result<u32, ScheduleParseError> {
        let value: u32 = s.parse().map_err(|_| invalid())?;
        if value < spec.min || value > spec.max {
            return Err(ScheduleParseError::OutOfRange {
                field: spec.name,
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        Ok(value)
    };

    match range.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (number(start)?, number(end)?);
            if start > end {
                return Err(invalid());
            }
            Ok(FieldPart::Range {
                start,
                end,
                step: step.unwrap_or(1),
            })
        }
        None => {
            let value = number(range)?;
            match step {
                // `a/n` runs from `a` to the top of the field.
                Some(step) => Ok(FieldPart::Range {
                    start: value,
                    end: spec.max,
                    step,
                }),
                None => Ok(FieldPart::Value(value)),
            }
        }
    }
}

/// A parsed five-field cron expression:
/// `minute hour day-of-month month day-of-week`.
///
/// All five fields must match (they are ANDed). Evaluation is in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleParseError::FieldCount(fields.len()));
        }

        Ok(Self {
            expr: fields.join(" "),
            minute: Field::parse(fields[0], MINUTE)?,
            hour: Field::parse(fields[1], HOUR)?,
            day_of_month: Field::parse(fields[2], DAY_OF_MONTH)?,
            month: Field::parse(fields[3], MONTH)?,
            day_of_week: Field::parse(fields[4], DAY_OF_WEEK)?,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        let weekday = at.weekday().num_days_from_sunday();
        let dow_matches =
            self.day_of_week.matches(weekday) || (weekday == 0 && self.day_of_week.matches(7));

        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && dow_matches
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// When a job is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronSchedule),
    Interval(Duration),
}

impl Schedule {
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self, ScheduleParseError> {
        match spec {
            ScheduleSpec::Cron(expr) => Ok(Schedule::Cron(CronSchedule::parse(expr)?)),
            ScheduleSpec::Every { seconds } => {
                Ok(Schedule::Interval(Duration::from_secs((*seconds).max(1))))
            }
        }
    }

    /// Whether a job with this schedule should fire at `now`, given when it
    /// last fired.
    ///
    /// A cron job fires at most once per calendar minute, however often the
    /// loop ticks.
    pub fn is_due(&self, now: &DateTime<Utc>, last_fired: Option<&DateTime<Utc>>) -> bool {
        match self {
            Schedule::Cron(cron) => {
                cron.matches(now)
                    && last_fired.is_none_or(|last| minute_window(last) != minute_window(now))
            }
            Schedule::Interval(interval) => last_fired.is_none_or(|last| {
                (*now - *last)
                    .to_std()
                    .map(|elapsed| elapsed >= *interval)
                    .unwrap_or(false)
            }),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron(cron) => f.write_str(cron.expr()),
            Schedule::Interval(d) => write!(f, "every {}s", d.as_secs()),
        }
    }
}

pub(crate) fn minute_window(at: &DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
