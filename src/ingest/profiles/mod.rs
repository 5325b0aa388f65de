// src/ingest/profiles/mod.rs
//! Named request/mapping strategies for JSON event feeds.
//!
//! A profile is a pair of plain functions: one plans the upstream GETs for a
//! source, the other turns the extracted item list into events. Pagination
//! that depends on the previous answer goes through `next_page`.

pub mod filtered_query;
pub mod generic;
pub mod month_loop;
pub mod token_auth;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::IngestResult;
use crate::ingest::http::HttpRequest;
use crate::ingest::types::{NormalizedEvent, Source};

pub const DEFAULT_PROFILE: &str = "generic";

/// JSON source configuration (the subset of `Source::config` the JSON adapter
/// and its profiles read).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonSourceConfig {
    pub profile: Option<String>,
    pub list_path: Option<String>,
    pub root_path: Option<String>,
    /// Field → dot path overrides.
    pub mapping: BTreeMap<String, String>,
    /// Static query parameters sent with every request.
    pub query: BTreeMap<String, Value>,
    pub id_field: Option<String>,
    pub months_forward: Option<u32>,
    /// `YYYY-MM`
    pub start_month: Option<String>,
    pub url_template: Option<String>,
    pub month_query: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
    pub filter: Option<Value>,
    pub filter_param: Option<String>,
    pub page_param: Option<String>,
    pub max_pages: Option<u32>,
}

impl JsonSourceConfig {
    /// `list_path`, else `root_path`, else the document root.
    pub fn items_path(&self) -> &str {
        self.list_path
            .as_deref()
            .or(self.root_path.as_deref())
            .unwrap_or("")
    }

    pub fn static_query(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub header: Option<String>,
    pub scheme: Option<String>,
    pub query_param: Option<String>,
}

pub struct ProfileRequestContext<'a> {
    pub source: &'a Source,
    pub config: &'a JsonSourceConfig,
    pub tz: Tz,
    pub now: DateTime<Utc>,
}

pub struct ProfileMapContext<'a> {
    pub source: &'a Source,
    pub config: &'a JsonSourceConfig,
    pub tz: Tz,
    pub reference_year: i32,
    /// URL of the request that produced the items.
    pub request_url: &'a str,
}

pub type PlanFn = fn(&ProfileRequestContext<'_>) -> IngestResult<Vec<HttpRequest>>;
pub type MapFn = fn(&ProfileMapContext<'_>, &[Value]) -> Vec<NormalizedEvent>;
/// Given the request that just returned a non-empty page and its 1-based page
/// number, plan the following page (or stop).
pub type NextPageFn = fn(&ProfileRequestContext<'_>, &HttpRequest, u32) -> Option<HttpRequest>;

pub struct JsonProfile {
    pub name: &'static str,
    pub plan_requests: PlanFn,
    pub map_events: MapFn,
    pub next_page: Option<NextPageFn>,
}

impl std::fmt::Debug for JsonProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProfile")
            .field("name", &self.name)
            .field("paginated", &self.next_page.is_some())
            .finish()
    }
}

static REGISTRY: &[&JsonProfile] = &[
    &generic::PROFILE,
    &month_loop::PROFILE,
    &token_auth::PROFILE,
    &filtered_query::PROFILE,
];

/// Look a profile up by name. Blank means the default; unknown names fall
/// back to it with a warning.
pub fn resolve(name: Option<&str>) -> &'static JsonProfile {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    match name {
        None => &generic::PROFILE,
        Some(n) => REGISTRY
            .iter()
            .copied()
            .find(|p| p.name.eq_ignore_ascii_case(n))
            .unwrap_or_else(|| {
                tracing::warn!(
                    target: "ingest",
                    profile = n,
                    fallback = DEFAULT_PROFILE,
                    "unknown json profile"
                );
                &generic::PROFILE
            }),
    }
}

/// Query parameter rendering for JSON scalars.
pub(crate) fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace the profile's generic identity with one derived from the upstream id.
pub(crate) fn synthesize_identity(
    profile: &str,
    source_id: i64,
    events: Vec<NormalizedEvent>,
) -> Vec<NormalizedEvent> {
    events
        .into_iter()
        .map(|mut e| {
            if let Some(ext) = e.external_id.as_deref().filter(|x| !x.trim().is_empty()) {
                e.identity_hash = Some(crate::ingest::identity::profile_identity(
                    profile, source_id, ext,
                ));
            }
            e
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_by_name_with_default() {
        assert_eq!(resolve(None).name, "generic");
        assert_eq!(resolve(Some("  ")).name, "generic");
        assert_eq!(resolve(Some("month_loop")).name, "month_loop");
        assert_eq!(resolve(Some("Token_Auth")).name, "token_auth");
        assert_eq!(resolve(Some("does-not-exist")).name, "generic");
        assert_eq!(REGISTRY.len(), 4);
    }

    #[test]
    fn items_path_prefers_list_path() {
        let cfg = JsonSourceConfig {
            list_path: Some("data.items".into()),
            root_path: Some("ignored".into()),
            ..Default::default()
        };
        assert_eq!(cfg.items_path(), "data.items");
        assert_eq!(JsonSourceConfig::default().items_path(), "");
    }
}
