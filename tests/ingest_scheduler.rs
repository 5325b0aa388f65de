// tests/ingest_scheduler.rs
mod common;

use chrono::{Duration, Utc};
use civic_ingest::config::IngestConfig;
use civic_ingest::ingest::run::RunStatus;
use civic_ingest::ingest::store::{EventStore, MemoryStore, RunStore};
use civic_ingest::ingest::types::{Frequency, Protocol, SourceKind};
use civic_ingest::Scheduler;
use mockito::Server;
use serde_json::json;
use std::sync::Arc;

const CALENDAR: &str = include_str!("fixtures/city_calendar.ics");

#[tokio::test]
async fn tick_runs_due_sources_once_and_snapshot_survives_reload() {
    let mut server = Server::new_async().await;
    let feed = server
        .mock("GET", "/calendar.ics")
        .with_status(200)
        .with_body(CALENDAR)
        .expect(1)
        .create_async()
        .await;

    let mut hourly = common::source(
        61,
        SourceKind::Event,
        Protocol::Ics,
        format!("{}/calendar.ics", server.url()),
        json!({}),
    );
    hourly.frequency = Frequency::Hourly;
    let mut paused = hourly.clone();
    paused.id = 62;
    paused.enabled = false;

    let store = Arc::new(MemoryStore::with_sources(vec![hourly, paused]));
    let scheduler = Scheduler::new(common::orchestrator(store.clone(), IngestConfig::default()));

    let now = Utc::now();
    let runs = scheduler.tick(now).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].source_id, 61);
    assert_eq!(runs[0].status, RunStatus::Success, "{:?}", runs[0].error_message);

    // a second pass inside the hour triggers nothing
    assert!(scheduler.tick(now + Duration::minutes(5)).await.unwrap().is_empty());
    feed.assert_async().await;

    let later = scheduler
        .evaluate_all(now + Duration::minutes(61))
        .await
        .unwrap();
    let reasons: Vec<_> = later
        .iter()
        .map(|d| (d.source.id, d.decision.due, d.decision.reason))
        .collect();
    assert!(reasons.contains(&(61, true, "hour elapsed")));
    assert!(reasons.contains(&(62, false, "disabled")));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("store.json");
    store.persist(&path).unwrap();
    let reloaded = MemoryStore::load(&path).unwrap();
    assert_eq!(reloaded.events().await.unwrap().len(), 3);
    assert!(reloaded.last_success(61).await.unwrap().is_some());
    // ids keep counting from where the snapshot left off
    let next = reloaded.create_run(61, Utc::now()).await.unwrap();
    assert!(next.id > runs[0].id);
}
