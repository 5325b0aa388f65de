// tests/common/mod.rs
#![allow(dead_code)]

use civic_ingest::config::{HttpSettings, IngestConfig};
use civic_ingest::ingest::http::HttpClient;
use civic_ingest::ingest::store::MemoryStore;
use civic_ingest::ingest::types::{Frequency, Locality, Protocol, Source, SourceKind};
use civic_ingest::Orchestrator;
use std::sync::Arc;

pub fn springfield() -> Locality {
    Locality {
        id: 1,
        name: "Springfield".into(),
        timezone: "America/Chicago".into(),
    }
}

pub fn source(
    id: i64,
    kind: SourceKind,
    protocol: Protocol,
    base_url: String,
    config: serde_json::Value,
) -> Source {
    Source {
        id,
        kind,
        name: format!("test source {id}"),
        protocol,
        base_url,
        config,
        locality: springfield(),
        frequency: Frequency::Daily,
        enabled: true,
        last_run_at: None,
    }
}

/// No retries, tiny backoff: mock servers answer deterministically.
pub fn http() -> HttpClient {
    let settings = HttpSettings {
        timeout_secs: 5,
        retries: 0,
        backoff_ms: 1,
        ..HttpSettings::default()
    };
    HttpClient::new(&settings).unwrap()
}

pub fn orchestrator(store: Arc<MemoryStore>, config: IngestConfig) -> Orchestrator {
    Orchestrator::new(store, http(), Arc::new(config))
}
