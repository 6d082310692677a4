//! Date parsing and the date-column heuristic
//!
//! One parser is shared by the heuristic, the date filter comparator and the
//! display formatter, so a value is either a date everywhere or nowhere.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::row::{CellValue, Row};

lazy_static! {
    static ref US_DATE: Regex = Regex::new(
        r"^\s*(\d{1,2})/(\d{1,2})/(\d{2,4})(?:\s+(\d{1,2}):(\d{2})(?::(\d{2}))?)?\s*$"
    )
    .unwrap();
    static ref DATE_LIKE_NAME: Regex = Regex::new(r"(?i)date|time").unwrap();
    static ref FOUR_DIGIT_YEAR: Regex = Regex::new(r"^\d{4}[-/]").unwrap();
}

/// Columns that are never dates, whatever their values look like
pub const EXCLUDED_DATE_COLUMNS: [&str; 1] = ["LetterNoticeID"];

/// Only the first rows of a dataset are sampled
pub const SAMPLE_ROWS: usize = 50;

/// At most this many non-blank values are sampled per column
pub const SAMPLE_VALUES: usize = 10;

/// Share of sampled values that must parse for a column to count as dates
pub const DATE_HIT_RATIO: f64 = 0.6;

/// Display format for values in date columns
pub const DISPLAY_FORMAT: &str = "%m/%d/%Y";

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const NUMERIC_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

const NAMED_DATE_FORMATS: [&str; 8] = [
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%a %b %d %Y",
    "%A, %B %d, %Y",
];

/// Parses a cell as a date-time
///
/// Tries a general calendar parse first, then the strict `M/D/Y[ H:M[:S]]`
/// form. Numbers, booleans and blanks are never dates.
pub fn parse_date(value: &CellValue) -> Option<NaiveDateTime> {
    match value {
        CellValue::Text(s) => parse_date_str(s),
        _ => None,
    }
}

pub fn parse_date_str(text: &str) -> Option<NaiveDateTime> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    parse_calendar(s).or_else(|| parse_us_date(s))
}

fn parse_calendar(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.naive_local());
    }
    // %Y alone would read "3/5/24" as the year 3
    if FOUR_DIGIT_YEAR.is_match(s) {
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(dt);
            }
        }
        for fmt in NUMERIC_DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Some(d.and_time(NaiveTime::MIN));
            }
        }
    }
    for fmt in NAMED_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Strict `M/D/Y[ H:M[:S]]` with a two-digit year pivot at 70.
///
/// Components out of range roll over like calendar arithmetic: 2/30/99 is 1999-03-02.
fn parse_us_date(s: &str) -> Option<NaiveDateTime> {
    let caps = US_DATE.captures(s)?;
    let num = |i: usize| -> Option<i64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let month = num(1)?;
    let day = num(2)?;
    let mut year = num(3)?;
    if year < 100 {
        year += if year >= 70 { 1900 } else { 2000 };
    }

    let month_index = month - 1;
    let year = year + month_index.div_euclid(12);
    let month0 = month_index.rem_euclid(12);
    let first = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month0 as u32 + 1, 1)?;
    let date = first.checked_add_signed(Duration::days(day - 1))?;

    let offset = Duration::hours(num(4)?) + Duration::minutes(num(5)?) + Duration::seconds(num(6)?);
    date.and_time(NaiveTime::MIN).checked_add_signed(offset)
}

/// Compares a cell to a filter date by calendar day, ignoring time of day.
///
/// A missing filter date or a cell that is not a date sorts before the filter,
/// so such cells only ever satisfy "less than".
pub fn compare_by_day(filter: Option<NaiveDate>, cell: &CellValue) -> Ordering {
    let Some(filter) = filter else {
        return Ordering::Less;
    };
    match parse_date(cell) {
        Some(dt) => dt.date().cmp(&filter),
        None => Ordering::Less,
    }
}

/// Formats a date cell as `MM/DD/YYYY`; `None` when the value is not a date
pub fn format_display(value: &CellValue) -> Option<String> {
    parse_date(value).map(|dt| dt.format(DISPLAY_FORMAT).to_string())
}

/// Date of an Excel serial number (1900 date system)
pub fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(NaiveTime::MIN);
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    epoch.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

/// Text an Excel date-time cell is shown as, `M/D/YYYY` plus time when present
pub fn excel_display(dt: NaiveDateTime) -> String {
    let date = format!("{}/{}/{}", dt.month(), dt.day(), dt.year());
    if dt.time() == NaiveTime::MIN {
        date
    } else {
        format!("{} {}", date, dt.format("%H:%M:%S"))
    }
}

fn name_looks_like_date(column: &str) -> bool {
    DATE_LIKE_NAME.is_match(column)
}

/// Decides whether a single column holds dates
pub fn is_date_column(column: &str, rows: &[Row]) -> bool {
    if EXCLUDED_DATE_COLUMNS.contains(&column) {
        return false;
    }
    if name_looks_like_date(column) {
        return true;
    }

    let mut seen = 0usize;
    let mut hits = 0usize;
    for row in rows.iter().take(SAMPLE_ROWS) {
        let value = row.value(column);
        if value.is_blank() {
            continue;
        }
        seen += 1;
        if parse_date(&value).is_some() {
            hits += 1;
        }
        if seen >= SAMPLE_VALUES {
            break;
        }
    }

    seen > 0 && hits as f64 / seen as f64 >= DATE_HIT_RATIO
}

/// Columns of the dataset to treat as dates for filtering and formatting
pub fn detect_date_columns(columns: &[String], rows: &[Row]) -> BTreeSet<String> {
    columns
        .iter()
        .filter(|column| is_date_column(column, rows))
        .cloned()
        .collect()
}
