//! Calendar intervals a dependent item looks at, relative to a business date.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateInterval {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t <= self.end
    }

    fn hour(t: NaiveDateTime) -> Self {
        let start = t.date().and_time(NaiveTime::MIN) + TimeDelta::hours(t.hour() as i64);
        Self {
            start,
            end: start + TimeDelta::hours(1) - TimeDelta::milliseconds(1),
        }
    }

    fn day(d: NaiveDate) -> Self {
        let start = d.and_time(NaiveTime::MIN);
        Self {
            start,
            end: start + TimeDelta::days(1) - TimeDelta::milliseconds(1),
        }
    }
}

fn monday_of(d: NaiveDate) -> NaiveDate {
    d - TimeDelta::days(d.weekday().num_days_from_monday() as i64)
}

fn first_day_of_month(d: NaiveDate) -> NaiveDate {
    d - TimeDelta::days(d.day0() as i64)
}

fn days_between(first: NaiveDate, last: NaiveDate) -> Vec<DateInterval> {
    first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(DateInterval::day)
        .collect()
}

fn last_hours(t: NaiveDateTime, hours: i64) -> Vec<DateInterval> {
    (1..=hours)
        .rev()
        .map(|i| DateInterval::hour(t - TimeDelta::hours(i)))
        .collect()
}

fn last_days(d: NaiveDate, days: i64) -> Vec<DateInterval> {
    (1..=days)
        .rev()
        .map(|i| DateInterval::day(d - TimeDelta::days(i)))
        .collect()
}

fn last_week_day(d: NaiveDate, offset_from_monday: i64) -> Vec<DateInterval> {
    let last_monday = monday_of(d) - TimeDelta::days(7);
    vec![DateInterval::day(last_monday + TimeDelta::days(offset_from_monday))]
}

/// Expands `(cycle, date_value)` into the intervals to check, oldest first.
///
/// The cycle only groups the date values; an unknown date value is a definition error.
pub fn date_intervals(
    business_date: NaiveDateTime,
    cycle: &str,
    date_value: &str,
) -> Result<Vec<DateInterval>, SchedulerError> {
    let day = business_date.date();
    let intervals = match (cycle, date_value) {
        ("hour", "currentHour") => vec![DateInterval::hour(business_date)],
        ("hour", "last1Hour") => last_hours(business_date, 1),
        ("hour", "last2Hours") => last_hours(business_date, 2),
        ("hour", "last3Hours") => last_hours(business_date, 3),
        ("hour", "last24Hours") => last_hours(business_date, 24),
        ("day", "today") => vec![DateInterval::day(day)],
        ("day", "last1Days") => last_days(day, 1),
        ("day", "last2Days") => last_days(day, 2),
        ("day", "last3Days") => last_days(day, 3),
        ("day", "last7Days") => last_days(day, 7),
        ("week", "thisWeek") => days_between(monday_of(day), day),
        ("week", "lastWeek") => {
            let last_monday = monday_of(day) - TimeDelta::days(7);
            days_between(last_monday, last_monday + TimeDelta::days(6))
        }
        ("week", "lastMonday") => last_week_day(day, 0),
        ("week", "lastTuesday") => last_week_day(day, 1),
        ("week", "lastWednesday") => last_week_day(day, 2),
        ("week", "lastThursday") => last_week_day(day, 3),
        ("week", "lastFriday") => last_week_day(day, 4),
        ("week", "lastSaturday") => last_week_day(day, 5),
        ("week", "lastSunday") => last_week_day(day, 6),
        ("month", "thisMonth") => days_between(first_day_of_month(day), day),
        ("month", "lastMonth") => {
            let last_day = first_day_of_month(day) - TimeDelta::days(1);
            days_between(first_day_of_month(last_day), last_day)
        }
        ("month", "lastMonthBegin") => {
            let last_day = first_day_of_month(day) - TimeDelta::days(1);
            vec![DateInterval::day(first_day_of_month(last_day))]
        }
        ("month", "lastMonthEnd") => {
            vec![DateInterval::day(first_day_of_month(day) - TimeDelta::days(1))]
        }
        _ => {
            return Err(SchedulerError::definition(format!(
                "unsupported dependent date '{}' for cycle '{}'",
                date_value, cycle
            )));
        }
    };
    Ok(intervals)
}
