//! Calendar-period boundaries for the analytics queries.
//!
//! All boundaries are computed in UTC against the stored `occurred_at` key:
//! ISO weeks start on Monday, quarters are three-month blocks from January,
//! half-years split at July 1.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeDelta, Utc};

/// Start instants of the named rolling-total periods, relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodStarts {
    pub today: DateTime<Utc>,
    pub week: DateTime<Utc>,
    pub month: DateTime<Utc>,
    pub quarter: DateTime<Utc>,
    pub half_year: DateTime<Utc>,
}

impl PeriodStarts {
    pub fn compute(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();

        let week_monday =
            date - Days::new(u64::from(date.weekday().num_days_from_monday()));
        let quarter_month = date.month() - (date.month() - 1) % 3;
        let half_year_month = if date.month() <= 6 { 1 } else { 7 };

        Self {
            today: start_of_day(date),
            week: start_of_day(week_monday),
            month: start_of_day(first_of_month(date.year(), date.month())),
            quarter: start_of_day(first_of_month(date.year(), quarter_month)),
            half_year: start_of_day(first_of_month(date.year(), half_year_month)),
        }
    }
}

/// Named preset windows accepted by the per-day series endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesPreset {
    Days7,
    Days30,
    Days90,
    Days180,
    Days365,
}

impl SeriesPreset {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "7days" => Some(SeriesPreset::Days7),
            "30days" => Some(SeriesPreset::Days30),
            "90days" => Some(SeriesPreset::Days90),
            "180days" => Some(SeriesPreset::Days180),
            "365days" => Some(SeriesPreset::Days365),
            _ => None,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            SeriesPreset::Days7 => 7,
            SeriesPreset::Days30 => 30,
            SeriesPreset::Days90 => 90,
            SeriesPreset::Days180 => 180,
            SeriesPreset::Days365 => 365,
        }
    }
}

impl Default for SeriesPreset {
    fn default() -> Self {
        SeriesPreset::Days30
    }
}

/// Half-open time range `[from, to)` queried by the per-day series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SeriesRange {
    pub fn preset(preset: SeriesPreset, end: DateTime<Utc>) -> Self {
        Self {
            from: end - TimeDelta::days(preset.days()),
            to: end,
        }
    }

    /// Explicit date bounds; both days are included in full.
    pub fn dates(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: start_of_day(from),
            to: start_of_day(to + Days::new(1)),
        }
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("month start is a valid date")
}
