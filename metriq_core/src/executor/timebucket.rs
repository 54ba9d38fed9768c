//! Timestamp parsing, bucket derivation, and relative period windows.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::QueryError;
use crate::plan::{PeriodToken, TimeGrain};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a raw timestamp cell. Accepts date-time strings (with or without
/// fractional seconds, trailing `Z` tolerated) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches('Z');
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Parse or fail with the offending column named.
pub fn parse_column_timestamp(raw: &str, column: &str) -> Result<NaiveDateTime, QueryError> {
    parse_timestamp(raw).ok_or_else(|| QueryError::TypeMismatch {
        column: column.to_string(),
        message: format!("unparseable timestamp '{}'", raw),
    })
}

/// Bucket label for a timestamp: day `YYYY-MM-DD`, month `YYYY-MM`, week is
/// the date of the ISO week's Monday.
pub fn bucket(ts: NaiveDateTime, grain: TimeGrain) -> String {
    let date = ts.date();
    match grain {
        TimeGrain::Day => date.format("%Y-%m-%d").to_string(),
        TimeGrain::Month => date.format("%Y-%m").to_string(),
        TimeGrain::Week => week_start(date).format("%Y-%m-%d").to_string(),
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month is valid")
}

fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is valid") - Duration::days(1)
}

/// Inclusive date window a period token denotes, anchored at `anchor`
/// (the newest date in the filtered data).
pub fn period_window(token: PeriodToken, anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
    match token {
        PeriodToken::CurrentDay => (anchor, anchor),
        PeriodToken::PreviousDay => {
            let d = anchor - Duration::days(1);
            (d, d)
        }
        PeriodToken::CurrentWeek => {
            let start = week_start(anchor);
            (start, start + Duration::days(6))
        }
        PeriodToken::PreviousWeek => {
            let start = week_start(anchor) - Duration::days(7);
            (start, start + Duration::days(6))
        }
        PeriodToken::CurrentMonth => (month_start(anchor), month_end(anchor)),
        PeriodToken::PreviousMonth => {
            let last_of_prev = month_start(anchor) - Duration::days(1);
            (month_start(last_of_prev), last_of_prev)
        }
        PeriodToken::SameMonthLastYear => {
            // Clamped to day 1; February 29 anchors still resolve.
            let start = NaiveDate::from_ymd_opt(anchor.year() - 1, anchor.month(), 1)
                .expect("first of month is valid");
            (start, month_end(start))
        }
    }
}

pub fn in_window(date: NaiveDate, window: (NaiveDate, NaiveDate)) -> bool {
    date >= window.0 && date <= window.1
}
