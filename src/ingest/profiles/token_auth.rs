// src/ingest/profiles/token_auth.rs
//! Feeds behind an API token, sent either as a header or a query parameter.

use serde_json::Value;
use std::env;

use super::{generic, synthesize_identity, JsonProfile, ProfileMapContext, ProfileRequestContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::http::HttpRequest;
use crate::ingest::types::NormalizedEvent;

pub static PROFILE: JsonProfile = JsonProfile {
    name: "token_auth",
    plan_requests: plan,
    map_events,
    next_page: None,
};

const DEFAULT_HEADER: &str = "Authorization";
const DEFAULT_SCHEME: &str = "Bearer";

fn plan(ctx: &ProfileRequestContext<'_>) -> IngestResult<Vec<HttpRequest>> {
    let auth = ctx.config.auth.clone().unwrap_or_default();
    let token = auth
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .or_else(|| {
            auth.token_env
                .as_deref()
                .and_then(|name| env::var(name.trim()).ok())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
        .ok_or_else(|| {
            IngestError::config(format!(
                "source {}: token_auth needs auth.token or a set auth.token_env",
                ctx.source.id
            ))
        })?;

    let mut reqs = generic::plan(ctx)?;
    for req in &mut reqs {
        match auth.query_param.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(param) => req.query.push((param.to_string(), token.clone())),
            None => {
                let header = auth
                    .header
                    .as_deref()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .unwrap_or(DEFAULT_HEADER);
                // custom headers carry the bare token unless a scheme is given
                let scheme = match (&auth.scheme, header.eq_ignore_ascii_case(DEFAULT_HEADER)) {
                    (Some(s), _) => s.trim().to_string(),
                    (None, true) => DEFAULT_SCHEME.to_string(),
                    (None, false) => String::new(),
                };
                let value = if scheme.is_empty() {
                    token.clone()
                } else {
                    format!("{scheme} {token}")
                };
                req.headers.push((header.to_string(), value));
            }
        }
    }
    Ok(reqs)
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
    use serial_test::serial;

    fn plan_for(config: Value) -> IngestResult<Vec<HttpRequest>> {
        let source = test_support::source(
            4,
            SourceKind::Event,
            Protocol::Json,
            "https://api.example.com/v1/events",
            config.clone(),
        );
        let cfg: JsonSourceConfig = serde_json::from_value(config).unwrap();
        plan(&ProfileRequestContext {
            source: &source,
            config: &cfg,
            tz: chrono_tz::UTC,
            now: Utc::now(),
        })
    }

    #[test]
    fn bearer_header_by_default() {
        let reqs = plan_for(json!({ "auth": { "token": "abc" } })).unwrap();
        assert_eq!(
            reqs[0].headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn custom_header_and_query_param() {
        let reqs = plan_for(json!({ "auth": { "token": "abc", "header": "X-Api-Key" } })).unwrap();
        assert_eq!(reqs[0].headers, vec![("X-Api-Key".to_string(), "abc".to_string())]);

        let reqs = plan_for(json!({
            "query": { "limit": 50 },
            "auth": { "token": "abc", "query_param": "api_key" }
        }))
        .unwrap();
        assert!(reqs[0].headers.is_empty());
        assert!(reqs[0].query.contains(&("api_key".to_string(), "abc".to_string())));
        assert!(reqs[0].query.contains(&("limit".to_string(), "50".to_string())));
    }

    #[test]
    #[serial]
    fn token_from_env_or_config_error() {
        env::set_var("CIVIC_TEST_TOKEN", "from-env");
        let reqs = plan_for(json!({ "auth": { "token_env": "CIVIC_TEST_TOKEN" } })).unwrap();
        assert_eq!(reqs[0].headers[0].1, "Bearer from-env");
        env::remove_var("CIVIC_TEST_TOKEN");

        let err = plan_for(json!({ "auth": { "token_env": "CIVIC_TEST_TOKEN" } })).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn identity_synthesized_from_external_id() {
        let source = test_support::source(
            4,
            SourceKind::Event,
            Protocol::Json,
            "https://api.example.com/v1/events",
            json!({}),
        );
        let cfg = JsonSourceConfig::default();
        let ctx = ProfileMapContext {
            source: &source,
            config: &cfg,
            tz: chrono_tz::UTC,
            reference_year: 2026,
            request_url: "https://api.example.com/v1/events",
        };
        let events = map_events(
            &ctx,
            &[
                json!({ "id": "e-1", "title": "A", "start": "2026-03-01T10:00:00Z" }),
                json!({ "title": "B", "start": "2026-03-01T10:00:00Z" }),
            ],
        );
        assert_eq!(
            events[0].identity_hash.as_deref(),
            Some(crate::ingest::identity::profile_identity("token_auth", 4, "e-1").as_str())
        );
        assert!(events[1].identity_hash.is_none());
    }
}
