//! Calendar preset resolution.
//!
//! Everything here is pure: given a preset and a wall-clock "now" the resolver
//! produces the same `[start, end]` pair every time. Callers pass
//! `Local::now().naive_local()` so the crate never touches a timezone
//! database.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Chart bucket width derived from the span of a resolved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartUnit {
    Hour,
    Day,
    Month,
}

impl ChartUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartUnit::Hour => "hour",
            ChartUnit::Day => "day",
            ChartUnit::Month => "month",
        }
    }
}

/// A date range preset. `Custom` carries both bounds, so a custom range
/// without bounds is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "preset")]
pub enum DateRange {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    Last7Days,
    Last30Days,
    Last90Days,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    Custom {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Concrete bounds plus the chart granularity for the span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub unit: ChartUnit,
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).expect("valid time")
}

/// Full calendar days are end-inclusive at 23:59:59.999.
fn day_end(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_milli_opt(23, 59, 59, 999).expect("valid time")
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).expect("day 1 exists")
}

fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid date") - Duration::days(1)
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

impl DateRange {
    /// Resolve the preset against `now`. Weeks start on Monday (ISO);
    /// month/year presets use calendar boundaries.
    pub fn resolve(&self, now: NaiveDateTime) -> ResolvedRange {
        let today = now.date();
        let (start, end) = match self {
            DateRange::Today => (day_start(today), day_end(today)),
            DateRange::Yesterday => {
                let d = today - Duration::days(1);
                (day_start(d), day_end(d))
            }
            DateRange::ThisWeek => {
                let monday = monday_of(today);
                (day_start(monday), day_end(monday + Duration::days(6)))
            }
            DateRange::LastWeek => {
                let monday = monday_of(today) - Duration::days(7);
                (day_start(monday), day_end(monday + Duration::days(6)))
            }
            DateRange::Last7Days => (day_start(today - Duration::days(6)), day_end(today)),
            DateRange::Last30Days => (day_start(today - Duration::days(29)), day_end(today)),
            DateRange::Last90Days => (day_start(today - Duration::days(89)), day_end(today)),
            DateRange::ThisMonth => (day_start(month_start(today)), day_end(month_end(today))),
            DateRange::LastMonth => {
                let prev = month_start(today) - Duration::days(1);
                (day_start(month_start(prev)), day_end(month_end(prev)))
            }
            DateRange::ThisYear => {
                let jan1 = NaiveDate::from_ymd_opt(today.year(), 1, 1).expect("valid date");
                let dec31 = NaiveDate::from_ymd_opt(today.year(), 12, 31).expect("valid date");
                (day_start(jan1), day_end(dec31))
            }
            DateRange::LastYear => {
                let year = today.year() - 1;
                let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date");
                let dec31 = NaiveDate::from_ymd_opt(year, 12, 31).expect("valid date");
                (day_start(jan1), day_end(dec31))
            }
            DateRange::Custom { start, end } => (*start, *end),
        };

        ResolvedRange {
            start,
            end,
            unit: unit_for(start, end),
        }
    }

    /// Stable identifier for cache keys. Presets use their name; custom
    /// ranges encode both bounds so two different custom spans never share
    /// an entry.
    pub fn range_id(&self) -> String {
        match self {
            DateRange::Today => "today".to_string(),
            DateRange::Yesterday => "yesterday".to_string(),
            DateRange::ThisWeek => "this-week".to_string(),
            DateRange::LastWeek => "last-week".to_string(),
            DateRange::Last7Days => "last-7-days".to_string(),
            DateRange::Last30Days => "last-30-days".to_string(),
            DateRange::Last90Days => "last-90-days".to_string(),
            DateRange::ThisMonth => "this-month".to_string(),
            DateRange::LastMonth => "last-month".to_string(),
            DateRange::ThisYear => "this-year".to_string(),
            DateRange::LastYear => "last-year".to_string(),
            DateRange::Custom { start, end } => format!(
                "custom-{}-{}",
                start.format("%Y%m%d%H%M"),
                end.format("%Y%m%d%H%M")
            ),
        }
    }
}

/// Unit thresholds are inclusive: a 1-day span charts hourly, a 90-day span
/// charts daily, anything longer charts monthly. Downstream chart bucket
/// width depends on these exact cutoffs.
fn unit_for(start: NaiveDateTime, end: NaiveDateTime) -> ChartUnit {
    let days = (end.date() - start.date()).num_days() + 1;
    if days <= 1 {
        ChartUnit::Hour
    } else if days <= 90 {
        ChartUnit::Day
    } else {
        ChartUnit::Month
    }
}
