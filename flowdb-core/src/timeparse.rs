//! Parsing of time arguments (`--first`, `--last`, `admin clean`)
//!
//! Accepted forms:
//! - epoch seconds: `1357800683`
//! - relative to now: `-15d:04h:05m`, `-15d`, `-4h:05m`, ...
//! - RFC3339, RFC1123Z, RFC822Z, ANSIC and Ruby dates
//! - calendar formats such as `02.01.2006 15:04[:05]`, `2.1.06 15:04` or
//!   `2006-01-02 15:04[:05]`, optionally followed by a `+hhmm` offset
//! - plain dates such as `02.01.06`, also with an offset (`02.01.06 -0700`)

use crate::{FlowError, Result, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

const ZONED_FORMATS: &[&str] = &[
    // Ruby date
    "%a %b %d %H:%M:%S %z %Y",
    // RFC822 with numeric zone
    "%d %b %y %H:%M %z",
];

// Two-digit years are tried first; `%Y` would accept `06` as year 6.
const CALENDAR_FORMATS: &[&str] = &[
    "%d.%m.%y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%y %H:%M",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%d.%m.%y", "%d.%m.%Y", "%Y-%m-%d"];

const RELATIVE_PATTERN: &str = r"^-(\d+[dhm]:?)+$";
const RELATIVE_PART_PATTERN: &str = r"(\d+)([dhm])";

/// Parse a time argument relative to the current time
pub fn parse_time_argument(arg: &str) -> Result<Timestamp> {
    parse_time_argument_at(arg, Utc::now().timestamp())
}

/// Parse a time argument, evaluating relative forms against `now`
pub fn parse_time_argument_at(arg: &str, now: Timestamp) -> Result<Timestamp> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(FlowError::Validation("Empty time argument".into()));
    }

    if arg.bytes().all(|b| b.is_ascii_digit()) {
        return arg
            .parse::<Timestamp>()
            .map_err(|e| FlowError::Validation(format!("Invalid epoch {}: {}", arg, e)));
    }

    if arg.starts_with('-') {
        return parse_relative(arg, now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(arg) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(arg) {
        return Ok(dt.timestamp());
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(arg, format) {
            return Ok(dt.timestamp());
        }
    }

    // ANSIC pads single-digit days with a space
    let collapsed = arg.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Ok(dt) = NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y") {
        return Ok(dt.and_utc().timestamp());
    }

    for format in CALENDAR_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&collapsed, &format!("{} %z", format)) {
            return Ok(dt.timestamp());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(&collapsed, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&collapsed, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc().timestamp());
            }
        }
    }

    // `%z` needs a time of day to build a DateTime
    if let Some((date, zone)) = collapsed.rsplit_once(' ') {
        let midnight = format!("{} 00:00 {}", date, zone);
        for format in DATE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(&midnight, &format!("{} %H:%M %z", format)) {
                return Ok(dt.timestamp());
            }
        }
    }

    Err(FlowError::Validation(format!("Unrecognized time format: {}", arg)))
}

fn relative_patterns() -> Result<&'static (Regex, Regex)> {
    static PATTERNS: OnceLock<std::result::Result<(Regex, Regex), regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| Ok((Regex::new(RELATIVE_PATTERN)?, Regex::new(RELATIVE_PART_PATTERN)?)))
        .as_ref()
        .map_err(|e| FlowError::Validation(format!("Invalid pattern: {}", e)))
}

fn parse_relative(arg: &str, now: Timestamp) -> Result<Timestamp> {
    let (whole, parts) = relative_patterns()?;
    if !whole.is_match(arg) {
        return Err(FlowError::Validation(format!("Invalid relative time: {}", arg)));
    }

    let mut seen = [false; 3];
    let mut offset: Timestamp = 0;
    for caps in parts.captures_iter(arg) {
        let (slot, unit) = match &caps[2] {
            "d" => (0, 86_400),
            "h" => (1, 3_600),
            _ => (2, 60),
        };
        if seen[slot] {
            return Err(FlowError::Validation(format!(
                "Time unit {} given twice in {}",
                &caps[2], arg
            )));
        }
        seen[slot] = true;

        let value: Timestamp = caps[1]
            .parse()
            .map_err(|_| FlowError::Validation(format!("Invalid relative time: {}", arg)))?;
        offset = value
            .checked_mul(unit)
            .and_then(|v| offset.checked_add(v))
            .ok_or_else(|| FlowError::Validation(format!("Relative time out of range: {}", arg)))?;
    }

    now.checked_sub(offset)
        .ok_or_else(|| FlowError::Validation(format!("Relative time out of range: {}", arg)))
}
