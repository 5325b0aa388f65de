// tests/ingest_json.rs
mod common;

use chrono::{TimeZone, Utc};
use civic_ingest::config::IngestConfig;
use civic_ingest::ingest::run::RunStatus;
use civic_ingest::ingest::store::{EventStore, MemoryStore};
use civic_ingest::ingest::types::{Protocol, SourceKind};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn month_loop_issues_one_request_per_month() {
    let mut server = Server::new_async().await;
    let january = server
        .mock("GET", "/api/2026/01/events.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "data": { "events": [
                { "id": 101, "name": "Planning Commission", "start": "2026-01-20T18:00:00",
                  "venue": { "name": "Council Chambers", "address": "100 Main St" } },
                { "id": 102, "name": "No start here" }
            ] } })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let february = server
        .mock("GET", "/api/2026/02/events.json")
        .with_status(200)
        .with_body(
            json!({ "data": { "events": [
                { "id": 201, "name": "Park Board", "start_date": "February 9, 2026",
                  "start_time": "6:30 PM" }
            ] } })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let source = common::source(
        31,
        SourceKind::Event,
        Protocol::Json,
        format!("{}/api/events", server.url()),
        json!({
            "profile": "month_loop",
            "list_path": "data.events",
            "months_forward": 2,
            "start_month": "2026-01",
            "url_template": format!("{}/api/{{year}}/{{month}}/events.json", server.url()),
        }),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let run = common::orchestrator(store.clone(), IngestConfig::default())
        .trigger(&source)
        .await
        .unwrap();

    january.assert_async().await;
    february.assert_async().await;
    assert_eq!(run.status, RunStatus::Success, "{:?}", run.error_message);
    // the item without a start is dropped by the mapper
    assert_eq!(run.items_found, 2);
    assert_eq!(run.items_written, 2);

    let events = store.events().await.unwrap();
    let planning = events.iter().find(|e| e.title == "Planning Commission").unwrap();
    assert_eq!(
        planning.starts_at,
        Utc.with_ymd_and_hms(2026, 1, 21, 0, 0, 0).unwrap()
    );
    assert_eq!(planning.location_name.as_deref(), Some("Council Chambers"));
    let park = events.iter().find(|e| e.title == "Park Board").unwrap();
    assert_eq!(
        park.starts_at,
        Utc.with_ymd_and_hms(2026, 2, 10, 0, 30, 0).unwrap()
    );
}

#[serial_test::serial]
#[tokio::test]
async fn token_auth_sends_bearer_header_from_env() {
    std::env::set_var("CIVIC_TEST_API_TOKEN", "s3cret");
    let mut server = Server::new_async().await;
    let api = server
        .mock("GET", "/v1/events")
        .match_header("authorization", "Bearer s3cret")
        .match_query(Matcher::UrlEncoded("city".into(), "springfield".into()))
        .with_status(200)
        .with_body(
            json!([{ "id": "ev-9", "title": "Budget Hearing", "starts_at": 1_768_521_600 }])
                .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let source = common::source(
        32,
        SourceKind::Event,
        Protocol::Json,
        format!("{}/v1/events", server.url()),
        json!({
            "profile": "token_auth",
            "query": { "city": "springfield" },
            "auth": { "token_env": "CIVIC_TEST_API_TOKEN" }
        }),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let orch = common::orchestrator(store.clone(), IngestConfig::default());
    let first = orch.trigger(&source).await.unwrap();
    let second = orch.trigger(&source).await.unwrap();
    std::env::remove_var("CIVIC_TEST_API_TOKEN");

    api.assert_async().await;
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error_message);
    assert_eq!(second.items_written, 1);
    let events = store.events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].starts_at,
        Utc.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn filtered_query_stops_on_empty_page() {
    let mut server = Server::new_async().await;
    let page1 = server
        .mock("GET", "/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "1".into()),
            Matcher::UrlEncoded("filter".into(), r#"{"type":"meeting"}"#.into()),
        ]))
        .with_status(200)
        .with_body(
            json!({ "results": [
                { "event_id": "m-1", "title": "Zoning Board", "date": "2026-03-02", "time": "7 PM" }
            ] })
            .to_string(),
        )
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/search")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body(json!({ "results": [] }).to_string())
        .create_async()
        .await;

    let source = common::source(
        33,
        SourceKind::Event,
        Protocol::Json,
        format!("{}/search", server.url()),
        json!({ "profile": "filtered_query", "filter": { "type": "meeting" } }),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let run = common::orchestrator(store.clone(), IngestConfig::default())
        .trigger(&source)
        .await
        .unwrap();

    page1.assert_async().await;
    page2.assert_async().await;
    assert_eq!(run.status, RunStatus::Success, "{:?}", run.error_message);
    assert_eq!(run.items_written, 1);
}
