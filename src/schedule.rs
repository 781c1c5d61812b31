//! Five-field cron expressions (`minute hour day-of-month month day-of-week`).
//!
//! Supports `*`, numbers, ranges (`1-5`), steps (`*/15`, `0-30/10`), lists
//! (`1,15`) and the `@hourly`/`@daily`/`@weekly`/`@monthly` shorthands.
//! Times are evaluated in UTC.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field `{value}`")]
    InvalidField { field: &'static str, value: String },
}

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
// 7 is accepted as an alias for Sunday and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    // When both day fields are restricted, cron matches either of them.
    any_day_of_month: bool,
    any_day_of_week: bool,
}

impl CronSchedule {
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether the schedule fires at the minute containing `at`.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, at.month())
            && self.day_matches(at.date_naive())
    }

    /// The first firing time strictly after `after`, or `None` if the
    /// expression can never fire (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);
        // Four years covers every leap-day combination.
        let limit = after + Duration::days(366 * 4);

        while t <= limit {
            if !bit(self.months, t.month()) {
                t = start_of_next_month(t.date_naive())?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = start_of_day(t.date_naive().succ_opt()?)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            debug_assert!(self.matches(t));
            return Some(t);
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days, date.day());
        let dow = bit(self.weekdays, date.weekday().num_days_from_sunday());
        match (self.any_day_of_month, self.any_day_of_week) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let expanded = match expr {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let mut weekdays = parse_field(fields[4], DAY_OF_WEEK)?;
        if bit(weekdays, 7) {
            weekdays = (weekdays | 1) & !(1 << 7);
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes: parse_field(fields[0], MINUTE)?,
            hours: parse_field(fields[1], HOUR)?,
            days: parse_field(fields[2], DAY_OF_MONTH)?,
            months: parse_field(fields[3], MONTH)?,
            weekdays,
            any_day_of_month: fields[2] == "*",
            any_day_of_week: fields[4] == "*",
        })
    }
}

fn bit(mask: u64, n: u32) -> bool {
    mask & (1 << n) != 0
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<u64, ScheduleError> {
    let invalid = || ScheduleError::InvalidField {
        field: spec.name,
        value: raw.to_string(),
    };

    let mut mask = 0u64;
    for part in raw.split(',') {
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

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| invalid())?;
            let hi: u32 = hi.parse().map_err(|_| invalid())?;
            (lo, hi)
        } else {
            let n: u32 = range.parse().map_err(|_| invalid())?;
            // `5/10` means "from 5 to the end, every 10".
            if step > 1 { (n, spec.max) } else { (n, n) }
        };

        if lo < spec.min || hi > spec.max || lo > hi {
            return Err(invalid());
        }
        for n in (lo..=hi).step_by(step as usize) {
            mask |= 1 << n;
        }
    }
    Ok(mask)
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(date: NaiveDate) -> Option<DateTime<Utc>> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekly_sunday_schedule() {
        let cron: CronSchedule = "0 2 * * 0".parse().unwrap();
        // 2026-10-19 is a Monday.
        let next = cron.next_after(at(2026, 10, 19, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 25, 2, 0));
        assert!(cron.matches(next));
    }

    #[test]
    fn next_is_strictly_after() {
        let cron: CronSchedule = "*/15 * * * *".parse().unwrap();
        let next = cron.next_after(at(2026, 1, 1, 10, 15)).unwrap();
        assert_eq!(next, at(2026, 1, 1, 10, 30));
    }

    #[test]
    fn rolls_over_year_end() {
        let cron: CronSchedule = "30 0 1 1 *".parse().unwrap();
        let next = cron.next_after(at(2026, 6, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2027, 1, 1, 0, 30));
    }

    #[test]
    fn leap_day_is_found() {
        let cron: CronSchedule = "0 0 29 2 *".parse().unwrap();
        let next = cron.next_after(at(2025, 3, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 0, 0));
    }

    #[test]
    fn impossible_date_never_fires() {
        let cron: CronSchedule = "0 0 31 2 *".parse().unwrap();
        assert!(cron.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // The 1st of the month or any Friday.
        let cron: CronSchedule = "0 12 1 * 5".parse().unwrap();
        assert!(cron.matches(at(2026, 10, 1, 12, 0)));
        assert!(cron.matches(at(2026, 10, 23, 12, 0)));
        assert!(!cron.matches(at(2026, 10, 22, 12, 0)));
    }

    #[test]
    fn sunday_alias_seven() {
        let cron: CronSchedule = "0 0 * * 7".parse().unwrap();
        assert!(cron.matches(at(2026, 10, 25, 0, 0)));
    }

    #[test]
    fn lists_ranges_and_shorthands() {
        let cron: CronSchedule = "5,10-12 * * * *".parse().unwrap();
        assert!(cron.matches(at(2026, 1, 1, 0, 5)));
        assert!(cron.matches(at(2026, 1, 1, 0, 11)));
        assert!(!cron.matches(at(2026, 1, 1, 0, 13)));

        let daily: CronSchedule = "@daily".parse().unwrap();
        assert_eq!(daily.expr(), "@daily");
        assert_eq!(daily.next_after(at(2026, 1, 1, 0, 0)).unwrap(), at(2026, 1, 2, 0, 0));
    }

    #[test]
    fn rejects_bad_expressions() {
        assert_eq!(
            "* * *".parse::<CronSchedule>().unwrap_err(),
            ScheduleError::FieldCount(3)
        );
        assert!(matches!(
            "60 * * * *".parse::<CronSchedule>().unwrap_err(),
            ScheduleError::InvalidField { field: "minute", .. }
        ));
        assert!("*/0 * * * *".parse::<CronSchedule>().is_err());
        assert!("* * 0 * *".parse::<CronSchedule>().is_err());
        assert!("* * * * mon".parse::<CronSchedule>().is_err());
    }
}
