// src/ingest/datetime.rs
//! Date/time normalization: free-text date and time fragments → UTC instants,
//! resolved in the source's own timezone.
//!
//! - `parse_when`: date fragment + optional time / time range, with all-day
//!   inference and meridiem inheritance (`"7 - 8:30 PM"`).
//! - `parse_iso`: machine formatted timestamps; all-day only when no time part.
//! - `parse_loose`: generic fallback over a list of human formats.
//!
//! Every entry point returns `None` instead of failing; callers drop the item.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

/// Resolved start/end of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct When {
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub all_day: bool,
}

impl When {
    fn all_day(starts_at: DateTime<Utc>) -> Self {
        Self {
            starts_at,
            ends_at: None,
            all_day: true,
        }
    }

    fn timed(starts_at: DateTime<Utc>, ends_at: Option<DateTime<Utc>>) -> Self {
        Self {
            starts_at,
            ends_at,
            all_day: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

static RE_WEEKDAY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)[a-z]*\.?,?\s+")
        .expect("weekday regex")
});
static RE_ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex"));
static RE_ABBREV_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z]{3,4})\.").expect("abbrev regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_MERIDIEM_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d\s*(?:am|pm|a\.m\.?|p\.m\.?)(?:\W|$)").expect("meridiem regex")
});
static RE_TIME_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d{1,2}(?::\d{2})?\s*(?:am|pm|a\.m\.?|p\.m\.?)(?:\W|$)|\b\d{1,2}:\d{2}|\bnoon\b")
        .expect("time start regex")
});
static RE_RANGE_SEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:-|\u{2013}|\u{2014}|\bto\b|\bthru\b|\buntil\b)\s*").expect("range regex")
});
static RE_TIME_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?(?::(\d{2}))?\s*(a\.?\s?m\.?|p\.?\s?m\.?|a|p)?")
        .expect("time token regex")
});
static RE_CLOCK_ONLY: Lazy<Regex> = Lazy::new(|| {
    let t = r"(?:\d{1,2}(?::\d{2})?\s*(?:am|pm|a\.m\.?|p\.m\.?)?|noon|midnight)";
    Regex::new(&format!(r"(?i)^{t}(?:\s*(?:-|\u{{2013}}|\bto\b)\s*{t})?$")).expect("clock regex")
});

const DATE_FORMATS: &[&str] = &[
    "%B %d %Y",
    "%d %B %Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%Y%m%d",
];

const YEARLESS_FORMATS: &[&str] = &["%B %d %Y", "%d %B %Y", "%m/%d %Y"];

/// Parse with the current year (in `tz`) as the reference for year-less dates.
pub fn parse_when(date: &str, time: Option<&str>, tz: Tz) -> Option<When> {
    let year = Utc::now().with_timezone(&tz).year();
    parse_when_with_year(date, time, tz, year)
}

/// `parse_when` with an explicit reference year (deterministic for tests).
pub fn parse_when_with_year(
    date: &str,
    time: Option<&str>,
    tz: Tz,
    reference_year: i32,
) -> Option<When> {
    let date = date.trim();
    let time = time.map(str::trim).filter(|t| !t.is_empty());

    if date.is_empty() {
        return time.and_then(|t| parse_loose(t, tz, reference_year));
    }

    match time {
        None if !has_time_marker(date) => parse_date(date, reference_year)
            .and_then(|d| compose(d, None, tz))
            .or_else(|| parse_iso(date, tz))
            .or_else(|| parse_loose(date, tz, reference_year)),
        None => parse_iso(date, tz).or_else(|| parse_loose(date, tz, reference_year)),
        Some(t) => parse_date(date, reference_year)
            .and_then(|d| compose(d, Some(t), tz))
            .or_else(|| parse_loose(&format!("{date} {t}"), tz, reference_year)),
    }
}

/// Machine formatted timestamps. All-day only when the value carries no time.
pub fn parse_iso(s: &str, tz: Tz) -> Option<When> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(When::timed(dt.with_timezone(&Utc), None));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(When::timed(dt.with_timezone(&Utc), None));
        }
    }
    if let Some(rest) = s.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(rest, "%Y%m%dT%H%M%S") {
            return Some(When::timed(Utc.from_utc_datetime(&naive), None));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y%m%dT%H%M%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return localize(naive, tz).map(|dt| When::timed(dt, None));
        }
    }
    for fmt in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return local_midnight(d, tz).map(When::all_day);
        }
    }
    None
}

/// Generic fallback: split the string at the first time-looking token, parse
/// the date half leniently and the time half as a time (range).
pub fn parse_loose(s: &str, tz: Tz, reference_year: i32) -> Option<When> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(w) = parse_iso(s, tz) {
        return Some(w);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(When::timed(dt.with_timezone(&Utc), None));
    }

    match RE_TIME_START.find(s) {
        Some(m) if m.start() > 0 => {
            let date_part = s[..m.start()]
                .trim()
                .trim_end_matches(|c: char| matches!(c, ',' | '@' | '|' | '-' | '\u{2013}'))
                .trim();
            let date_part = date_part
                .strip_suffix(" at")
                .or_else(|| date_part.strip_suffix(" from"))
                .unwrap_or(date_part);
            let d = parse_date(date_part, reference_year)?;
            compose(d, Some(&s[m.start()..]), tz)
        }
        Some(_) => None,
        None => parse_date(s, reference_year).and_then(|d| compose(d, None, tz)),
    }
}

/// Convert a local wall time to UTC. Ambiguous times (DST fall-back) take the
/// earlier instant; non-existent ones (spring-forward gap) move one hour ahead.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

pub fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    localize(date.and_time(NaiveTime::MIN), tz)
}

/// Unix seconds, or milliseconds when the magnitude says so.
pub fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.unsigned_abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// `:` or an AM/PM marker inside a date string means it carries a time.
pub fn has_time_marker(s: &str) -> bool {
    s.contains(':') || RE_MERIDIEM_MARKER.is_match(s)
}

/// A bare clock time or time range (`"6:30 PM"`, `"7 - 8:30 pm"`, `"noon"`)
/// with no calendar date in it.
pub fn is_time_of_day(s: &str) -> bool {
    let s = s.trim();
    let lower = s.to_ascii_lowercase();
    RE_CLOCK_ONLY.is_match(s)
        && (has_time_marker(s) || lower.contains("noon") || lower.contains("midnight"))
}

/// Lenient calendar-date parse: weekday prefixes, ordinals, abbreviations
/// with dots and commas are tolerated. Year-less dates use `reference_year`.
pub fn parse_date(s: &str, reference_year: i32) -> Option<NaiveDate> {
    let cleaned = clean_date_text(s);
    if cleaned.is_empty() {
        return None;
    }
    // ISO prefix, e.g. "2026-01-15T00:00:00" used as a date
    if cleaned.len() >= 10 {
        if let Some(prefix) = cleaned.get(..10) {
            if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(d);
            }
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Some(d);
        }
    }
    let with_year = format!("{cleaned} {reference_year}");
    for fmt in YEARLESS_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&with_year, fmt) {
            return Some(d);
        }
    }
    None
}

fn clean_date_text(s: &str) -> String {
    let mut out = s.trim().replace(',', " ");
    out = RE_WEEKDAY_PREFIX.replace(&out, "").to_string();
    out = RE_ORDINAL.replace_all(&out, "$1").to_string();
    out = RE_ABBREV_DOT.replace_all(&out, "$1").to_string();
    out = out.replace("Sept ", "Sep ").replace("sept ", "sep ");
    out = RE_WS.replace_all(&out, " ").to_string();
    out.trim().trim_end_matches('.').to_string()
}

/// Date + optional time (range) → `When`.
fn compose(date: NaiveDate, time: Option<&str>, tz: Tz) -> Option<When> {
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        None => return local_midnight(date, tz).map(When::all_day),
        Some(t) if is_all_day_text(t) => return local_midnight(date, tz).map(When::all_day),
        Some(t) => t,
    };

    let (first_raw, last_raw) = split_range(time);
    let last = last_raw.and_then(|t| parse_time_token(t, false));
    // "7 - 8:30 PM": a bare hour is only a time when the end carries a meridiem
    let bare_ok = matches!(last, Some((_, Some(_))));
    let (first_time, first_mer) = parse_time_token(first_raw, bare_ok)?;

    let mut start = first_time;
    if first_mer.is_none() {
        if let Some((end_time, Some(mer))) = last {
            start = inherit_meridiem(first_time, mer, end_time);
        }
    }

    let starts_at = localize(date.and_time(start), tz)?;
    let ends_at = match last {
        Some((end_time, _)) => {
            let mut end = localize(date.and_time(end_time), tz)?;
            if end <= starts_at {
                // "11 PM - 1 AM" ends on the next day
                end = localize((date + Duration::days(1)).and_time(end_time), tz)?;
            }
            Some(end)
        }
        None => None,
    };
    Some(When::timed(starts_at, ends_at))
}

fn is_all_day_text(t: &str) -> bool {
    let t = t.to_ascii_lowercase();
    let t = t.trim();
    t == "all day" || t == "all-day" || t == "allday" || t == "tbd" || t == "tba"
}

/// Split `"7:00 PM - 8:30 PM"` into its start and optional end token.
fn split_range(s: &str) -> (&str, Option<&str>) {
    match RE_RANGE_SEP.find(s) {
        Some(m) if m.start() > 0 => {
            let tail = s[m.end()..].trim();
            (s[..m.start()].trim(), (!tail.is_empty()).then_some(tail))
        }
        _ => (s.trim(), None),
    }
}

fn parse_time_token(raw: &str, allow_bare_hour: bool) -> Option<(NaiveTime, Option<Meridiem>)> {
    let t = raw.trim().to_ascii_lowercase();
    if t.starts_with("noon") {
        return Some((NaiveTime::from_hms_opt(12, 0, 0)?, Some(Meridiem::Pm)));
    }
    if t.starts_with("midnight") {
        return Some((NaiveTime::MIN, Some(Meridiem::Am)));
    }

    let caps = RE_TIME_TOKEN.captures(&t)?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .map_or(Some(0), |m| m.as_str().parse().ok())?;
    let second: u32 = caps
        .get(3)
        .map_or(Some(0), |m| m.as_str().parse().ok())?;
    let meridiem = caps.get(4).map(|m| {
        if m.as_str().starts_with('p') {
            Meridiem::Pm
        } else {
            Meridiem::Am
        }
    });

    // A bare number without minutes or meridiem is not a time ("2026").
    if caps.get(2).is_none() && meridiem.is_none() && !allow_bare_hour {
        return None;
    }

    let hour24 = match meridiem {
        Some(mer) => to_24h(hour, mer)?,
        None => hour,
    };
    NaiveTime::from_hms_opt(hour24, minute, second).map(|nt| (nt, meridiem))
}

fn to_24h(hour: u32, mer: Meridiem) -> Option<u32> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    Some(match (mer, hour) {
        (Meridiem::Am, 12) => 0,
        (Meridiem::Am, h) => h,
        (Meridiem::Pm, 12) => 12,
        (Meridiem::Pm, h) => h + 12,
    })
}

/// First token of a range without AM/PM takes the end token's meridiem,
/// unless that would put the start after the end ("11 - 1 PM").
fn inherit_meridiem(start: NaiveTime, end_mer: Meridiem, end: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    let h = start.hour();
    if !(1..=12).contains(&h) {
        return start;
    }
    let with = |mer| {
        to_24h(h, mer).and_then(|h24| NaiveTime::from_hms_opt(h24, start.minute(), start.second()))
    };
    match with(end_mer) {
        Some(candidate) if candidate <= end => candidate,
        Some(candidate) if end_mer == Meridiem::Pm => with(Meridiem::Am).unwrap_or(candidate),
        Some(candidate) => candidate,
        None => start,
    }
}
