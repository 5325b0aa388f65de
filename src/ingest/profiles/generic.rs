// src/ingest/profiles/generic.rs
use metrics::counter;
use serde_json::Value;

use super::{JsonProfile, ProfileMapContext, ProfileRequestContext};
use crate::error::IngestResult;
use crate::ingest::datetime::{self, When};
use crate::ingest::http::HttpRequest;
use crate::ingest::normalize::normalize_url;
use crate::ingest::types::NormalizedEvent;
use crate::ingest::{clean_opt, clean_text, value_at_path};

pub static PROFILE: JsonProfile = JsonProfile {
    name: "generic",
    plan_requests: plan,
    map_events: map_events,
    next_page: None,
};

const TITLE_KEYS: &[&str] = &["title", "name", "event_name", "summary"];
const START_KEYS: &[&str] = &[
    "starts_at",
    "start",
    "start_time",
    "start_date",
    "startDate",
    "start_datetime",
    "date",
    "begin",
];
const END_KEYS: &[&str] = &[
    "ends_at",
    "end",
    "end_time",
    "end_date",
    "endDate",
    "end_datetime",
];
const TIME_KEYS: &[&str] = &["time", "start_time"];
const ALL_DAY_KEYS: &[&str] = &["all_day", "allDay", "is_all_day"];
const LOCATION_NAME_KEYS: &[&str] = &["location_name", "location", "venue", "place"];
const LOCATION_ADDRESS_KEYS: &[&str] = &["location_address", "address", "venue.address"];
const DESCRIPTION_KEYS: &[&str] = &["description", "details", "body", "content"];
const URL_KEYS: &[&str] = &["url", "link", "href", "permalink"];
const ID_KEYS: &[&str] = &["id", "uid", "guid", "event_id"];

/// One GET to the base URL with the static query.
pub(super) fn plan(ctx: &ProfileRequestContext<'_>) -> IngestResult<Vec<HttpRequest>> {
    let mut req = HttpRequest::get(ctx.source.base_url.clone());
    req.query = ctx.config.static_query();
    Ok(vec![req])
}

pub(super) fn map_events(ctx: &ProfileMapContext<'_>, items: &[Value]) -> Vec<NormalizedEvent> {
    items
        .iter()
        .filter_map(|item| {
            let mapped = map_item(ctx, item);
            if mapped.is_none() {
                counter!("ingest_items_dropped_total", "reason" => "unmapped").increment(1);
                tracing::debug!(target: "ingest", source_id = ctx.source.id, "json item without title or start");
            }
            mapped
        })
        .collect()
}

/// Map a single JSON object. `None` when no title or start can be found.
pub fn map_item(ctx: &ProfileMapContext<'_>, item: &Value) -> Option<NormalizedEvent> {
    let title = lookup(ctx, item, "title", TITLE_KEYS)
        .and_then(as_text)
        .map(|t| clean_text(&t))
        .filter(|t| !t.is_empty())?;

    let time = lookup(ctx, item, "time", TIME_KEYS).and_then(as_text);
    // "start_time": "6:30 PM" is the time slot, not a start candidate
    let start = candidates(ctx, item, "starts_at", START_KEYS)
        .into_iter()
        .filter(|v| !v.as_str().is_some_and(datetime::is_time_of_day))
        .find_map(|v| to_when(ctx, v, time.as_deref()))?;
    let end = candidates(ctx, item, "ends_at", END_KEYS)
        .into_iter()
        .find_map(|v| to_when(ctx, v, None));

    let all_day = lookup(ctx, item, "all_day", ALL_DAY_KEYS)
        .and_then(Value::as_bool)
        .unwrap_or(start.all_day);

    let (location_name, nested_address) = match lookup(ctx, item, "location_name", LOCATION_NAME_KEYS)
    {
        Some(Value::Object(obj)) => (
            obj.get("name").and_then(as_text),
            obj.get("address").and_then(as_text),
        ),
        Some(v) => (as_text(v), None),
        None => (None, None),
    };
    let location_address = lookup(ctx, item, "location_address", LOCATION_ADDRESS_KEYS)
        .and_then(as_text)
        .or(nested_address);

    let external_id = ctx
        .config
        .id_field
        .as_deref()
        .and_then(|path| value_at_path(item, path))
        .or_else(|| lookup(ctx, item, "external_id", ID_KEYS))
        .and_then(as_text);

    let url = lookup(ctx, item, "url", URL_KEYS)
        .and_then(as_text)
        .and_then(|u| normalize_url(&u, &ctx.source.base_url));

    Some(NormalizedEvent {
        title,
        starts_at: Some(start.starts_at),
        ends_at: end.map(|w| w.starts_at).or(start.ends_at),
        all_day,
        location_name: clean_opt(location_name.as_deref()),
        location_address: clean_opt(location_address.as_deref()),
        description: lookup(ctx, item, "description", DESCRIPTION_KEYS)
            .and_then(as_text)
            .and_then(|d| clean_opt(Some(&d))),
        url,
        external_id,
        source_url: Some(ctx.request_url.to_string()),
        identity_hash: None,
        raw: item.clone(),
    })
}

/// Explicit `mapping.<field>` path first, then the fallback keys in order.
fn lookup<'v>(
    ctx: &ProfileMapContext<'_>,
    item: &'v Value,
    field: &str,
    fallbacks: &[&str],
) -> Option<&'v Value> {
    candidates(ctx, item, field, fallbacks).into_iter().next()
}

/// Every non-blank value for `field`: just the mapped path when one is
/// configured, else each fallback key that is present.
fn candidates<'v>(
    ctx: &ProfileMapContext<'_>,
    item: &'v Value,
    field: &str,
    fallbacks: &[&str],
) -> Vec<&'v Value> {
    let present = |v: &&Value| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty());
    match ctx.config.mapping.get(field) {
        Some(path) => value_at_path(item, path).filter(present).into_iter().collect(),
        None => fallbacks
            .iter()
            .filter_map(|key| value_at_path(item, key))
            .filter(present)
            .collect(),
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// ISO strings, loose date strings, or epoch numbers.
fn to_when(ctx: &ProfileMapContext<'_>, v: &Value, time: Option<&str>) -> Option<When> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(float_epoch))
            .and_then(datetime::from_epoch)
            .map(|t| When {
                starts_at: t,
                ends_at: None,
                all_day: false,
            }),
        Value::String(s) => {
            let s = s.trim();
            if time.is_none() || datetime::has_time_marker(s) {
                if let Some(w) = datetime::parse_iso(s, ctx.tz) {
                    return Some(w);
                }
            }
            datetime::parse_when_with_year(s, time, ctx.tz, ctx.reference_year)
        }
        _ => None,
    }
}

/// Whole part of a float timestamp; `None` for NaN, infinities and
/// magnitudes no `i64` holds.
fn float_epoch(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9.2e18;
    (f.is_finite() && f.abs() < LIMIT).then(|| f.trunc() as i64)
}
