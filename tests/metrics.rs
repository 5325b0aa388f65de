// tests/metrics.rs
mod common;

use civic_ingest::config::IngestConfig;
use civic_ingest::ingest::store::MemoryStore;
use civic_ingest::ingest::types::{Protocol, SourceKind};
use civic_ingest::metrics::Metrics;
use mockito::Server;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn run_outcomes_show_up_in_exposition() {
    // first thing in this binary so descriptions land on the real recorder
    let metrics = Metrics::recorder().expect("recorder installs once per process");

    let mut server = Server::new_async().await;
    let _ok = server
        .mock("GET", "/ok.ics")
        .with_status(200)
        .with_body(include_str!("fixtures/city_calendar.ics"))
        .create_async()
        .await;
    let _down = server
        .mock("GET", "/down.ics")
        .with_status(404)
        .create_async()
        .await;

    let ok = common::source(
        71,
        SourceKind::Event,
        Protocol::Ics,
        format!("{}/ok.ics", server.url()),
        json!({}),
    );
    let down = common::source(
        72,
        SourceKind::Event,
        Protocol::Ics,
        format!("{}/down.ics", server.url()),
        json!({}),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![ok.clone(), down.clone()]));
    let orch = common::orchestrator(store, IngestConfig::default());
    orch.trigger(&ok).await.unwrap();
    orch.trigger(&down).await.unwrap();

    let text = metrics.render();
    for needle in [
        r#"ingest_runs_total{status="success"} 1"#,
        r#"ingest_runs_total{status="failed"} 1"#,
        "ingest_items_written_total",
        "ingest_http_requests_total",
        "# HELP ingest_runs_total",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
    }
}
