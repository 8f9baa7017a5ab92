use std::sync::LazyLock;

use regex::Regex;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

const CANONICAL: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");

/// Accepted shapes, tried in order. Numeric day/month pairs are read month-first unless
/// the first number cannot be a month.
const FORMATS: [&[BorrowedFormatItem]; 11] = [
    format_description!("[year]-[month]-[day]"),
    format_description!("[year]/[month]/[day]"),
    format_description!("[year].[month padding:none].[day padding:none]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none], [year]"),
    format_description!("[month repr:short case_sensitive:false] [day padding:none], [year]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none] [year]"),
    format_description!("[day padding:none] [month repr:long case_sensitive:false] [year]"),
    format_description!("[day padding:none] [month repr:short case_sensitive:false] [year]"),
    format_description!("[month padding:none]/[day padding:none]/[year]"),
    format_description!("[day padding:none]/[month padding:none]/[year]"),
    format_description!("[day padding:none].[month padding:none].[year]"),
];

static ISO_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());
static TRAILING_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*\b\d{4})[\sT,]+\d{1,2}:\d{2}\b.*$").unwrap());
static MONTH_ABBR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\.").unwrap()
});
static SEPT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bsept\b").unwrap());
static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:mon|tue|tues|wed|wednes|thu|thur|thurs|fri|sat|satur|sun)(?:day)?,?\s+")
        .unwrap()
});

/// Normalizes free-text dates to `YYYY-MM-DD`.
///
/// Handles ISO-8601 dates and timestamps (the calendar date as written, offsets are not
/// applied), "December 23, 2024", "Dec. 23, 2024", "23 December 2024", RFC 2822, numeric
/// forms with `/` or `.`, ordinals, a leading weekday and a trailing time of day.
/// Anything else is `None`; this never panics.
pub fn normalize_date(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.is_empty() {
        return None;
    }

    if let Some(prefix) = ISO_PREFIX_RE.find(&text) {
        return Date::parse(prefix.as_str(), &CANONICAL)
            .ok()
            .and_then(|date| date.format(&CANONICAL).ok());
    }

    let text = WEEKDAY_RE.replace(&text, "");
    let text = TRAILING_TIME_RE.replace(&text, "$1");
    let text = ORDINAL_RE.replace_all(&text, "$1");
    let text = MONTH_ABBR_RE.replace_all(&text, "$1");
    let text = SEPT_RE.replace_all(&text, "Sep");
    let text = text.trim_end_matches([',', '.']);

    FORMATS
        .iter()
        .find_map(|format| Date::parse(text, format).ok())
        .and_then(|date| date.format(&CANONICAL).ok())
}
