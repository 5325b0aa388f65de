// src/ingest/profiles/month_loop.rs
//! One request per calendar month, for list endpoints that only answer a
//! single month at a time.

use chrono::{Datelike, NaiveDate};

use super::{generic, JsonProfile, ProfileRequestContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::http::HttpRequest;

pub static PROFILE: JsonProfile = JsonProfile {
    name: "month_loop",
    plan_requests: plan,
    map_events: generic::map_events,
    next_page: None,
};

const DEFAULT_MONTHS_FORWARD: u32 = 3;
const MAX_MONTHS_FORWARD: u32 = 24;

fn plan(ctx: &ProfileRequestContext<'_>) -> IngestResult<Vec<HttpRequest>> {
    let cfg = ctx.config;
    let first = match cfg.start_month.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_month(s).ok_or_else(|| {
            IngestError::config(format!(
                "source {}: start_month {s:?} is not YYYY-MM",
                ctx.source.id
            ))
        })?,
        None => {
            let today = ctx.now.with_timezone(&ctx.tz).date_naive();
            NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
                .ok_or_else(|| IngestError::config("current month out of range"))?
        }
    };
    let months = cfg
        .months_forward
        .unwrap_or(DEFAULT_MONTHS_FORWARD)
        .clamp(1, MAX_MONTHS_FORWARD);

    let template = cfg.url_template.as_deref().map(str::trim).filter(|t| !t.is_empty());
    if template.is_none() && cfg.month_query.is_empty() {
        return Err(IngestError::config(format!(
            "source {}: month_loop needs url_template or month_query",
            ctx.source.id
        )));
    }

    let mut out = Vec::with_capacity(months as usize);
    let mut month = first;
    for _ in 0..months {
        let url = match template {
            Some(t) => fill(t, month),
            None => ctx.source.base_url.clone(),
        };
        let mut req = HttpRequest::get(url);
        req.query = cfg.static_query();
        for (key, value) in &cfg.month_query {
            req.query.push((key.clone(), fill(value, month)));
        }
        out.push(req);
        month = next_month(month)
            .ok_or_else(|| IngestError::config("month loop ran past the calendar"))?;
    }
    Ok(out)
}

fn parse_month(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()
}

fn next_month(d: NaiveDate) -> Option<NaiveDate> {
    if d.month() == 12 {
        NaiveDate::from_ymd_opt(d.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(d.year(), d.month() + 1, 1)
    }
}

/// `{year}`, `{month}` (two digits), `{start}`/`{end}` (first/last day,
/// `YYYY-MM-DD`).
fn fill(template: &str, month: NaiveDate) -> String {
    let last = next_month(month)
        .and_then(|n| n.pred_opt())
        .unwrap_or(month);
    template
        .replace("{year}", &month.year().to_string())
        .replace("{month}", &format!("{:02}", month.month()))
        .replace("{start}", &month.format("%Y-%m-%d").to_string())
        .replace("{end}", &last.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::profiles::JsonSourceConfig;
    use crate::ingest::test_support;
    use crate::ingest::types::{Protocol, SourceKind};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn plan_for(config: serde_json::Value) -> IngestResult<Vec<HttpRequest>> {
        let source = test_support::source(
            8,
            SourceKind::Event,
            Protocol::Json,
            "https://city.example.com/api/events",
            config.clone(),
        );
        let cfg: JsonSourceConfig = serde_json::from_value(config).unwrap();
        let ctx = ProfileRequestContext {
            source: &source,
            config: &cfg,
            tz: chrono_tz::America::Chicago,
            // still December locally
            now: Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap(),
        };
        plan(&ctx)
    }

    #[test]
    fn url_template_per_month_from_local_now() {
        let reqs = plan_for(json!({
            "months_forward": 2,
            "url_template": "https://city.example.com/api/{year}/{month}.json"
        }))
        .unwrap();
        let urls: Vec<_> = reqs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://city.example.com/api/2025/12.json",
                "https://city.example.com/api/2026/01.json"
            ]
        );
    }

    #[test]
    fn month_query_from_explicit_start() {
        let reqs = plan_for(json!({
            "months_forward": 2,
            "start_month": "2026-02",
            "month_query": { "from": "{start}", "to": "{end}" }
        }))
        .unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].url, "https://city.example.com/api/events");
        assert!(reqs[0].query.contains(&("from".into(), "2026-02-01".into())));
        assert!(reqs[0].query.contains(&("to".into(), "2026-02-28".into())));
        assert!(reqs[1].query.contains(&("to".into(), "2026-03-31".into())));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(plan_for(json!({ "months_forward": 2 })).unwrap_err().is_config());
        assert!(plan_for(json!({ "start_month": "Feb", "url_template": "x/{month}" }))
            .unwrap_err()
            .is_config());
    }
}
