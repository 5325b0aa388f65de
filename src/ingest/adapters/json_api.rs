// src/ingest/adapters/json_api.rs
use async_trait::async_trait;
use metrics::histogram;
use serde_json::Value;

use super::{EventAdapter, FetchContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::profiles::{self, JsonSourceConfig, ProfileMapContext, ProfileRequestContext};
use crate::ingest::types::{NormalizedEvent, Protocol, Source, SourceKind};
use crate::ingest::value_at_path;

/// Keys tried when no list path is configured and the document is an object.
const LIST_KEYS: &[&str] = &["events", "items", "data", "results"];

pub struct JsonApiAdapter;

#[async_trait]
impl EventAdapter for JsonApiAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Json
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedEvent>> {
        source.ensure_handled_by(SourceKind::Event, Protocol::Json)?;
        let cfg: JsonSourceConfig = source.config_section(None)?;
        let profile = profiles::resolve(cfg.profile.as_deref());
        let tz = ctx.tz_for(source);
        let req_ctx = ProfileRequestContext {
            source,
            config: &cfg,
            tz,
            now: ctx.now,
        };
        let planned = (profile.plan_requests)(&req_ctx)?;
        tracing::debug!(
            target: "ingest",
            source_id = source.id,
            profile = profile.name,
            requests = planned.len(),
            "json requests planned"
        );

        let t0 = std::time::Instant::now();
        let mut out = Vec::new();
        for first in planned {
            let mut req = first;
            let mut page = 1u32;
            loop {
                let body = ctx.http.fetch(&req).await?;
                let doc: Value = serde_json::from_str(&body)
                    .map_err(|e| IngestError::malformed(format!("json from {}", req.url), e))?;
                let items = extract_items(&doc, cfg.items_path())
                    .map_err(|msg| IngestError::malformed(format!("json from {}", req.url), msg))?;

                let map_ctx = ProfileMapContext {
                    source,
                    config: &cfg,
                    tz,
                    reference_year: ctx.reference_year(source),
                    request_url: &req.url,
                };
                out.extend((profile.map_events)(&map_ctx, items));

                let next = match profile.next_page {
                    Some(next_page) if !items.is_empty() => next_page(&req_ctx, &req, page),
                    _ => None,
                };
                match next {
                    Some(r) => {
                        req = r;
                        page += 1;
                    }
                    None => break,
                }
            }
        }
        histogram!("ingest_fetch_ms", "protocol" => "json").record(t0.elapsed().as_millis() as f64);
        Ok(out)
    }
}

/// The item array at `path`. With no path, a top-level array or the first
/// array under a conventional key.
pub fn extract_items<'a>(doc: &'a Value, path: &str) -> Result<&'a [Value], String> {
    if !path.trim().is_empty() {
        return match value_at_path(doc, path) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Err(format!("nothing at list path {path:?}")),
            Some(_) => Err(format!("list path {path:?} is not an array")),
        };
    }
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .ok_or_else(|| "no item array in document; set list_path".to_string()),
        _ => Err("document is not an object or array".to_string()),
    }
}
