// src/ingest/orchestrator.rs
//! One Run end to end: create, start, fetch, write, finish.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::ingest::adapters::{self, FetchContext};
use crate::ingest::http::HttpClient;
use crate::ingest::run::{Run, RunStatus, RunTransition};
use crate::ingest::store::{IngestStore, RunStore, SourceStore};
use crate::ingest::types::{NormalizedArticle, NormalizedEvent, Source, SourceKind};
use crate::ingest::writer::Writer;

/// What one adapter fetch produced.
#[derive(Debug)]
enum Fetched {
    Events(Vec<NormalizedEvent>),
    Articles(Vec<NormalizedArticle>),
}

impl Fetched {
    fn len(&self) -> usize {
        match self {
            Fetched::Events(v) => v.len(),
            Fetched::Articles(v) => v.len(),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn IngestStore>,
    writer: Writer,
    http: HttpClient,
    config: Arc<IngestConfig>,
    pinned_now: Option<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn IngestStore>, http: HttpClient, config: Arc<IngestConfig>) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            writer: Writer::new(store.clone()),
            store,
            http,
            config,
            pinned_now: None,
        }
    }

    /// Freeze the clock adapters see (month loops, year-less dates).
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.pinned_now = Some(now);
        self
    }

    pub fn store(&self) -> &Arc<dyn IngestStore> {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn fetch_context(&self) -> FetchContext {
        let ctx = FetchContext::new(self.http.clone(), self.config.clone());
        match self.pinned_now {
            Some(now) => ctx.at(now),
            None => ctx,
        }
    }

    /// Manual or scheduled trigger. Disabled sources are refused before any
    /// Run exists; so is a source that already has one outstanding.
    pub async fn trigger(&self, source: &Source) -> IngestResult<Run> {
        if !source.enabled {
            return Err(IngestError::config(format!(
                "source {} ({}) is disabled",
                source.id, source.name
            )));
        }
        let run = self.store.create_run(source.id, Utc::now()).await?;
        self.execute(source, run).await
    }

    /// Drive a queued Run to a terminal state. Fetch and write failures end
    /// up on the Run; only store and transition errors come back as `Err`.
    pub async fn execute(&self, source: &Source, run: Run) -> IngestResult<Run> {
        let span = tracing::info_span!(
            "ingest_run",
            source_id = source.id,
            run_id = run.id,
            protocol = %source.protocol,
        );
        self.execute_inner(source, run).instrument(span).await
    }

    async fn execute_inner(&self, source: &Source, run: Run) -> IngestResult<Run> {
        let result = self.drive(source, run).await;
        let at = match &result {
            Ok(run) => run.finished_at.unwrap_or_else(Utc::now),
            Err(_) => Utc::now(),
        };
        // last_run_at moves whatever happened to the run itself
        if let Err(e) = self.store.mark_source_run(source.id, at).await {
            if result.is_ok() {
                return Err(e);
            }
            tracing::warn!(target: "ingest", error = %e, "could not mark source run");
        }
        result
    }

    async fn drive(&self, source: &Source, run: Run) -> IngestResult<Run> {
        let mut run = run.transition(RunTransition::Start, Utc::now())?;
        if let Err(e) = self.store.save_run(&run).await {
            self.abandon(&run, &e).await;
            return Err(e);
        }

        let outcome = self.fetch_and_write(source, &mut run).await;
        let transition = match &outcome {
            Ok(()) => RunTransition::Succeed,
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    error_class = e.class(),
                    error = %e,
                    found = run.items_found,
                    written = run.items_written,
                    "run failed"
                );
                RunTransition::fail_with(e)
            }
        };
        let finished = run.transition(transition, Utc::now())?;
        if let Err(e) = self.store.save_run(&finished).await {
            self.abandon(&run, &e).await;
            return Err(e);
        }

        counter!("ingest_runs_total", "status" => finished.status.as_str()).increment(1);
        if finished.status == RunStatus::Success {
            tracing::info!(
                target: "ingest",
                found = finished.items_found,
                written = finished.items_written,
                "run finished"
            );
        }
        Ok(finished)
    }

    /// A running run whose save failed: record it as failed with the storage
    /// error so it does not stay outstanding.
    async fn abandon(&self, running: &Run, err: &IngestError) {
        counter!("ingest_runs_total", "status" => RunStatus::Failed.as_str()).increment(1);
        let failed = match running.transition(RunTransition::fail_with(err), Utc::now()) {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "cannot fail run");
                return;
            }
        };
        if let Err(e) = self.store.save_run(&failed).await {
            tracing::error!(
                target: "ingest",
                error = %e,
                cause = %err,
                "run left outstanding after storage failure"
            );
        }
    }

    /// Counts land on `run` as they happen so a failure keeps them.
    async fn fetch_and_write(&self, source: &Source, run: &mut Run) -> IngestResult<()> {
        let fetched = self.fetch(source).await?;
        run.items_found = fetched.len() as u64;
        counter!("ingest_items_found_total").increment(run.items_found);

        match fetched {
            Fetched::Events(items) => {
                for item in items.iter().filter(|i| event_is_writable(source, i)) {
                    self.writer.write_event(source, item).await?;
                    run.items_written += 1;
                    counter!("ingest_items_written_total").increment(1);
                }
            }
            Fetched::Articles(items) => {
                for item in items.iter().filter(|i| article_is_writable(source, i)) {
                    self.writer.write_article(source, item).await?;
                    run.items_written += 1;
                    counter!("ingest_items_written_total").increment(1);
                }
            }
        }
        Ok(())
    }

    async fn fetch(&self, source: &Source) -> IngestResult<Fetched> {
        let ctx = self.fetch_context();
        match source.kind {
            SourceKind::Event => {
                let adapter = adapters::event_adapter_for(source.protocol);
                adapter.fetch(&ctx, source).await.map(Fetched::Events)
            }
            SourceKind::Article => {
                let adapter = adapters::article_adapter_for(source.protocol)?;
                adapter.fetch(&ctx, source).await.map(Fetched::Articles)
            }
        }
    }
}

fn event_is_writable(source: &Source, item: &NormalizedEvent) -> bool {
    let ok = !item.title.trim().is_empty() && item.starts_at.is_some();
    if !ok {
        counter!("ingest_items_dropped_total", "reason" => "invalid").increment(1);
        tracing::debug!(target: "ingest", source_id = source.id, title = %item.title, "event skipped before write");
    }
    ok
}

fn article_is_writable(source: &Source, item: &NormalizedArticle) -> bool {
    let ok = !item.title.trim().is_empty();
    if !ok {
        counter!("ingest_items_dropped_total", "reason" => "invalid").increment(1);
        tracing::debug!(target: "ingest", source_id = source.id, url = %item.source_url, "article skipped before write");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::ingest::store::MemoryStore;
    use crate::ingest::test_support;
    use crate::ingest::types::Protocol;
    use serde_json::json;

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        let http = HttpClient::new(&HttpSettings::default()).unwrap();
        Orchestrator::new(store, http, Arc::new(IngestConfig::default()))
    }

    #[tokio::test]
    async fn disabled_source_is_refused_without_a_run() {
        let mut source = test_support::source(
            4,
            SourceKind::Event,
            Protocol::Ics,
            "https://example.invalid/cal.ics",
            json!({}),
        );
        source.enabled = false;
        let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
        let err = orchestrator(store.clone()).trigger(&source).await.unwrap_err();
        assert!(err.is_config());
        assert!(store.runs_for(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adapter_config_error_fails_the_run() {
        // article kind over ICS has no adapter
        let source = test_support::source(
            5,
            SourceKind::Article,
            Protocol::Ics,
            "https://example.invalid/feed.ics",
            json!({}),
        );
        let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
        let run = orchestrator(store.clone()).trigger(&source).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_class.as_deref(), Some("ConfigurationError"));
        assert_eq!(run.items_found, 0);
        assert!(store.outstanding_run(5).await.unwrap().is_none());
        assert!(store.get_source(5).await.unwrap().unwrap().last_run_at.is_some());
    }

    #[test]
    fn validity_filter() {
        let source = test_support::source(
            1,
            SourceKind::Event,
            Protocol::Json,
            "https://x.test",
            json!({}),
        );
        let mut ev = NormalizedEvent {
            title: "Board meeting".into(),
            ..NormalizedEvent::default()
        };
        assert!(!event_is_writable(&source, &ev));
        ev.starts_at = Some(Utc::now());
        assert!(event_is_writable(&source, &ev));
        ev.title = "  ".into();
        assert!(!event_is_writable(&source, &ev));
    }
}
