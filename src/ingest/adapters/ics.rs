// src/ingest/adapters/ics.rs
//! iCalendar (RFC 5545) feeds. Only the VEVENT properties the pipeline
//! stores are read; recurrence rules are not expanded.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{EventAdapter, FetchContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::datetime::{local_midnight, localize};
use crate::ingest::normalize::{contains_markup, normalize_url, same_resource};
use crate::ingest::types::{NormalizedEvent, Protocol, Source, SourceKind};
use crate::ingest::{clean_opt, clean_text};

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("url regex"));

pub struct IcsAdapter;

#[async_trait]
impl EventAdapter for IcsAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Ics
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedEvent>> {
        source.ensure_handled_by(SourceKind::Event, Protocol::Ics)?;
        let t0 = std::time::Instant::now();
        let body = ctx.http.get_text(&source.base_url).await?;
        let prefer_description_url = source
            .config
            .get("ics")
            .and_then(|v| v.get("prefer_description_url"))
            .and_then(|v| v.as_bool())
            .unwrap_or(ctx.config.ics.prefer_description_url);
        let events = parse_calendar(&body, source, ctx.tz_for(source), prefer_description_url)?;
        histogram!("ingest_fetch_ms", "protocol" => "ics").record(t0.elapsed().as_millis() as f64);
        Ok(events)
    }
}

/// One content line: name, parameters, raw value.
#[derive(Debug, Clone)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a whole VCALENDAR document into events.
pub fn parse_calendar(
    body: &str,
    source: &Source,
    tz: Tz,
    prefer_description_url: bool,
) -> IngestResult<Vec<NormalizedEvent>> {
    let lines = unfold(body);
    if !lines
        .iter()
        .any(|l| l.trim().eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(IngestError::malformed(
            format!("ics feed {}", source.base_url),
            "no VCALENDAR block",
        ));
    }

    let mut out = Vec::new();
    let mut current: Option<Vec<Property>> = None;
    // depth of components nested inside the current VEVENT (VALARM, …)
    let mut nested = 0usize;

    for line in &lines {
        let Some(prop) = parse_line(line) else {
            continue;
        };
        let upper = prop.value.trim().to_ascii_uppercase();
        match (prop.name.as_str(), upper.as_str()) {
            ("BEGIN", "VEVENT") if current.is_none() => {
                current = Some(Vec::new());
                nested = 0;
            }
            ("END", "VEVENT") if nested == 0 => {
                if let Some(props) = current.take() {
                    match to_event(&props, source, tz, prefer_description_url) {
                        Some(e) => out.push(e),
                        None => {
                            counter!("ingest_items_dropped_total", "reason" => "unparseable_date")
                                .increment(1);
                            tracing::debug!(
                                target: "ingest",
                                source_id = source.id,
                                "ics event without summary or start"
                            );
                        }
                    }
                }
            }
            ("BEGIN", _) if current.is_some() => nested += 1,
            ("END", _) if current.is_some() && nested > 0 => nested -= 1,
            _ => {
                if let (Some(props), 0) = (current.as_mut(), nested) {
                    props.push(prop);
                }
            }
        }
    }
    Ok(out)
}

/// Undo RFC 5545 line folding (CRLF followed by a space or tab).
fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.lines() {
        let raw = raw.trim_end_matches('\r');
        match raw.chars().next() {
            Some(' ') | Some('\t') if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(&raw[1..]);
                }
            }
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

/// `NAME;P1=a;P2="b:c":value`
fn parse_line(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut colon = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.trim().to_ascii_uppercase(), v.trim().trim_matches('"').to_string()))
        })
        .collect();
    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// TEXT value escapes: `\n`, `\,`, `\;`, `\\`.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// DATE / DATE-TIME value → (instant, is all-day).
fn parse_ics_time(prop: &Property, tz: Tz) -> Option<(chrono::DateTime<Utc>, bool)> {
    let v = prop.value.trim();
    let is_date = prop
        .param("VALUE")
        .is_some_and(|p| p.eq_ignore_ascii_case("DATE"))
        || (v.len() == 8 && v.chars().all(|c| c.is_ascii_digit()));
    if is_date {
        let d = NaiveDate::parse_from_str(v.get(..8)?, "%Y%m%d").ok()?;
        return local_midnight(d, tz).map(|t| (t, true));
    }

    if let Some(utc) = v.strip_suffix('Z').or_else(|| v.strip_suffix('z')) {
        let naive = parse_naive(utc)?;
        return Some((Utc.from_utc_datetime(&naive), false));
    }
    let zone = prop
        .param("TZID")
        .and_then(|id| id.trim().trim_start_matches('/').parse::<Tz>().ok())
        .unwrap_or(tz);
    localize(parse_naive(v)?, zone).map(|t| (t, false))
}

fn parse_naive(v: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(v, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(v, "%Y%m%dT%H%M"))
        .ok()
}

fn to_event(
    props: &[Property],
    source: &Source,
    tz: Tz,
    prefer_description_url: bool,
) -> Option<NormalizedEvent> {
    let get = |name: &str| props.iter().find(|p| p.name == name);
    let text = |name: &str| get(name).map(|p| unescape(&p.value));

    let title = clean_text(&text("SUMMARY")?);
    if title.is_empty() {
        return None;
    }
    let (starts_at, all_day) = parse_ics_time(get("DTSTART")?, tz)?;
    let ends_at = get("DTEND")
        .and_then(|p| parse_ics_time(p, tz))
        .map(|(t, _)| t);

    let mut description = clean_opt(text("DESCRIPTION").as_deref());
    let raw_location = text("LOCATION").filter(|l| !l.trim().is_empty());
    let location_name = match raw_location {
        Some(loc) if contains_markup(&loc) => {
            // rich text pasted into LOCATION: keep it, but as description
            let folded = clean_text(&loc);
            if !folded.is_empty() {
                description = Some(match description.take() {
                    Some(d) if !d.contains(&folded) => format!("{d}\n\n{folded}"),
                    Some(d) => d,
                    None => folded,
                });
            }
            None
        }
        other => clean_opt(other.as_deref()),
    };

    let mut url = text("URL").and_then(|u| normalize_url(&u, &source.base_url));
    if prefer_description_url {
        if let Some(desc_url) = description.as_deref().and_then(single_url) {
            let points_at_feed = url
                .as_deref()
                .map_or(true, |u| same_resource(u, &source.base_url));
            if points_at_feed {
                url = Some(desc_url);
            }
        }
    }

    let raw: Map<String, Value> = props
        .iter()
        .map(|p| (p.name.clone(), Value::String(p.value.clone())))
        .collect();

    Some(NormalizedEvent {
        title,
        starts_at: Some(starts_at),
        ends_at,
        all_day,
        location_name,
        location_address: None,
        description,
        url,
        external_id: text("UID")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()),
        source_url: Some(source.base_url.clone()),
        identity_hash: None,
        raw: Value::Object(raw),
    })
}

/// The URL when the text holds exactly one.
fn single_url(text: &str) -> Option<String> {
    let mut found = RE_URL.find_iter(text);
    let first = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(
        first
            .as_str()
            .trim_end_matches(|c| matches!(c, '.' | ',' | ')' | ';'))
            .to_string(),
    )
}
