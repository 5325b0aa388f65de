// src/ingest/profiles/filtered_query.rs
//! APIs that take a JSON filter document in a query parameter and page
//! through results.

use serde_json::Value;

use super::{generic, synthesize_identity, JsonProfile, ProfileMapContext, ProfileRequestContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::http::HttpRequest;
use crate::ingest::types::NormalizedEvent;

pub static PROFILE: JsonProfile = JsonProfile {
    name: "filtered_query",
    plan_requests: plan,
    map_events,
    next_page: Some(next_page),
};

const DEFAULT_FILTER_PARAM: &str = "filter";
const DEFAULT_PAGE_PARAM: &str = "page";
const DEFAULT_MAX_PAGES: u32 = 5;
const MAX_PAGES_CAP: u32 = 50;

fn page_param(ctx: &ProfileRequestContext<'_>) -> String {
    ctx.config
        .page_param
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PAGE_PARAM)
        .to_string()
}

fn max_pages(ctx: &ProfileRequestContext<'_>) -> u32 {
    ctx.config
        .max_pages
        .unwrap_or(DEFAULT_MAX_PAGES)
        .clamp(1, MAX_PAGES_CAP)
}

/// First page only; later pages come from `next_page`.
fn plan(ctx: &ProfileRequestContext<'_>) -> IngestResult<Vec<HttpRequest>> {
    let mut req = HttpRequest::get(ctx.source.base_url.clone());
    req.query = ctx.config.static_query();

    if let Some(filter) = ctx.config.filter.as_ref().filter(|f| !f.is_null()) {
        let encoded = serde_json::to_string(filter).map_err(|e| {
            IngestError::config(format!("source {}: unusable filter: {e}", ctx.source.id))
        })?;
        let param = ctx
            .config
            .filter_param
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_FILTER_PARAM);
        req.query.push((param.to_string(), encoded));
    }
    req.query.push((page_param(ctx), "1".to_string()));
    Ok(vec![req])
}

fn next_page(
    ctx: &ProfileRequestContext<'_>,
    previous: &HttpRequest,
    page: u32,
) -> Option<HttpRequest> {
    if page >= max_pages(ctx) {
        return None;
    }
    let param = page_param(ctx);
    let mut req = previous.clone();
    req.query.retain(|(k, _)| *k != param);
    req.query.push((param, (page + 1).to_string()));
    Some(req)
}

fn map_events(ctx: &ProfileMapContext<'_>, items: &[Value]) -> Vec<NormalizedEvent> {
    synthesize_identity(
        PROFILE.name,
        ctx.source.id,
        generic::map_events(ctx, items),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::profiles::JsonSourceConfig;
    use crate::ingest::test_support;
    use crate::ingest::types::{Protocol, SourceKind};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn filter_serialized_and_pages_bounded() {
        let config = json!({
            "filter": { "category": "council", "public": true },
            "filter_param": "q",
            "page_param": "p",
            "max_pages": 2
        });
        let source = test_support::source(
            6,
            SourceKind::Event,
            Protocol::Json,
            "https://api.example.com/search",
            config.clone(),
        );
        let cfg: JsonSourceConfig = serde_json::from_value(config).unwrap();
        let ctx = ProfileRequestContext {
            source: &source,
            config: &cfg,
            tz: chrono_tz::UTC,
            now: Utc::now(),
        };

        let first = plan(&ctx).unwrap().remove(0);
        assert!(first
            .query
            .contains(&("q".to_string(), r#"{"category":"council","public":true}"#.to_string())));
        assert!(first.query.contains(&("p".to_string(), "1".to_string())));

        let second = next_page(&ctx, &first, 1).unwrap();
        assert!(second.query.contains(&("p".to_string(), "2".to_string())));
        assert!(!second.query.contains(&("p".to_string(), "1".to_string())));
        assert!(next_page(&ctx, &second, 2).is_none());
    }
}
