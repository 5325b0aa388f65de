// tests/ingest_html_events.rs
mod common;

use chrono::{TimeZone, Utc};
use civic_ingest::config::IngestConfig;
use civic_ingest::ingest::run::RunStatus;
use civic_ingest::ingest::store::{EventStore, MemoryStore};
use civic_ingest::ingest::types::{Protocol, SourceKind};
use mockito::Server;
use serde_json::json;
use std::sync::Arc;

const LISTING: &str = r#"<!doctype html>
<html><body>
  <div class="calendar">
    <div class="event">
      <a class="title" href="/events/1">Planning Commission</a>
      <span class="date">March 3, 2026</span>
      <span class="time">6:00 PM</span>
    </div>
    <div class="event">
      <a class="title" href="/events/2">Parks Advisory Board</a>
      <span class="date">March 5, 2026</span>
      <span class="time">5:30 PM</span>
      <span class="where">Rec Center</span>
    </div>
    <div class="event">
      <a class="title" href="/events/3">Library Story Time</a>
      <span class="date">March 7, 2026</span>
      <span class="time">10:00 AM</span>
    </div>
  </div>
</body></html>"#;

const DETAIL_ONE: &str = r#"<html><body>
  <h1>Planning Commission</h1>
  <p class="venue">Council Chambers</p>
  <div class="body"><p>Public hearing on the Oak Street rezoning.</p></div>
</body></html>"#;

#[tokio::test]
async fn listing_is_enriched_from_detail_pages_within_budget() {
    let mut server = Server::new_async().await;
    let _listing = server
        .mock("GET", "/calendar")
        .with_status(200)
        .with_body(LISTING)
        .create_async()
        .await;
    let one = server
        .mock("GET", "/events/1")
        .with_status(200)
        .with_body(DETAIL_ONE)
        .expect(1)
        .create_async()
        .await;
    let two = server
        .mock("GET", "/events/2")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let three = server
        .mock("GET", "/events/3")
        .with_status(200)
        .with_body(DETAIL_ONE)
        .expect(0)
        .create_async()
        .await;

    let source = common::source(
        51,
        SourceKind::Event,
        Protocol::Html,
        format!("{}/calendar", server.url()),
        json!({
            "list": {
                "item_selector": "div.event",
                "title_selector": "a.title",
                "date_selector": ".date",
                "time_selector": ".time",
                "location_selector": ".where",
                "link_selector": "a.title"
            },
            "detail": {
                "enabled": true,
                "max_detail_fetches": 2,
                "location_selector": ".venue",
                "description_selector": ".body"
            }
        }),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let run = common::orchestrator(store.clone(), IngestConfig::default())
        .trigger(&source)
        .await
        .unwrap();

    one.assert_async().await;
    two.assert_async().await;
    three.assert_async().await;
    assert_eq!(run.status, RunStatus::Success, "{:?}", run.error_message);
    assert_eq!(run.items_written, 3);

    let events = store.events().await.unwrap();
    let by_title = |t: &str| events.iter().find(|e| e.title == t).unwrap();

    let planning = by_title("Planning Commission");
    assert_eq!(
        planning.starts_at,
        Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap()
    );
    assert_eq!(planning.location_name.as_deref(), Some("Council Chambers"));
    assert!(planning
        .description
        .as_deref()
        .is_some_and(|d| d.contains("Oak Street rezoning")));
    assert_eq!(
        planning.url,
        Some(format!("{}/events/1", server.url()))
    );

    // failed detail keeps what the listing had
    let parks = by_title("Parks Advisory Board");
    assert_eq!(parks.location_name.as_deref(), Some("Rec Center"));
    assert_eq!(parks.description, None);

    let story = by_title("Library Story Time");
    assert_eq!(
        story.starts_at,
        Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn bad_selector_fails_before_fetching() {
    let mut server = Server::new_async().await;
    let listing = server
        .mock("GET", "/calendar")
        .with_status(200)
        .with_body(LISTING)
        .expect(0)
        .create_async()
        .await;

    let source = common::source(
        52,
        SourceKind::Event,
        Protocol::Html,
        format!("{}/calendar", server.url()),
        json!({ "list": { "item_selector": "div[" } }),
    );
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let run = common::orchestrator(store, IngestConfig::default())
        .trigger(&source)
        .await
        .unwrap();

    listing.assert_async().await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_class.as_deref(), Some("ConfigurationError"));
}
