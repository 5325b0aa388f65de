// src/ingest/store.rs
//! Plain records plus one store trait per entity. `MemoryStore` implements all
//! of them behind a single lock; its unique indexes (identity key, linkage
//! key, one outstanding run per source) play the role of database constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{IngestError, IngestResult};
use crate::ingest::run::{Run, RunStatus};
use crate::ingest::types::{ContentQuality, Source};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: i64,
    pub identity_key: String,
    pub locality_id: i64,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub identity_key: String,
    pub locality_id: i64,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSourceItem {
    pub id: i64,
    pub event_id: i64,
    pub source_id: i64,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEventSourceItem {
    pub event_id: i64,
    pub source_id: i64,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleRecord {
    pub id: i64,
    /// Content hash at first insert; stays put when the record is merged.
    pub identity_key: String,
    pub locality_id: i64,
    pub title: String,
    pub canonical_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub body: String,
    pub content_quality: ContentQuality,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub identity_key: String,
    pub locality_id: i64,
    pub title: String,
    pub canonical_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub body: String,
    pub content_quality: ContentQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleSource {
    pub id: i64,
    pub article_id: i64,
    pub source_id: i64,
    pub source_url: String,
    pub external_id: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArticleSource {
    pub article_id: i64,
    pub source_id: i64,
    pub source_url: String,
    pub external_id: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn list_sources(&self) -> IngestResult<Vec<Source>>;
    async fn get_source(&self, id: i64) -> IngestResult<Option<Source>>;
    async fn mark_source_run(&self, id: i64, at: DateTime<Utc>) -> IngestResult<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Queue a run. Refused when the source already has a non-terminal run.
    async fn create_run(&self, source_id: i64, now: DateTime<Utc>) -> IngestResult<Run>;
    async fn save_run(&self, run: &Run) -> IngestResult<()>;
    async fn outstanding_run(&self, source_id: i64) -> IngestResult<Option<Run>>;
    /// Most recent successful run by finish time.
    async fn last_success(&self, source_id: i64) -> IngestResult<Option<Run>>;
    async fn runs_for(&self, source_id: i64) -> IngestResult<Vec<Run>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert or update keyed by `identity_key`; `true` when inserted.
    async fn upsert_event(
        &self,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> IngestResult<(EventRecord, bool)>;
    /// Insert or refresh keyed by `(event, source, source url, external id)`.
    async fn upsert_event_source_item(
        &self,
        item: NewEventSourceItem,
    ) -> IngestResult<EventSourceItem>;
    async fn event_by_identity(&self, identity_key: &str) -> IngestResult<Option<EventRecord>>;
    async fn events(&self) -> IngestResult<Vec<EventRecord>>;
    async fn event_source_items(&self, event_id: i64) -> IngestResult<Vec<EventSourceItem>>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn article_by_canonical_url(
        &self,
        locality_id: i64,
        url: &str,
    ) -> IngestResult<Option<ArticleRecord>>;
    async fn article_by_source_url(&self, source_url: &str) -> IngestResult<Option<ArticleRecord>>;
    async fn article_by_external_id(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> IngestResult<Option<ArticleRecord>>;
    async fn article_by_identity(&self, identity_key: &str)
        -> IngestResult<Option<ArticleRecord>>;
    /// Insert unless the identity key exists; then return the existing row
    /// (`false`).
    async fn insert_article(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> IngestResult<(ArticleRecord, bool)>;
    async fn update_article(&self, article: &ArticleRecord) -> IngestResult<()>;
    async fn upsert_article_source(&self, link: NewArticleSource) -> IngestResult<ArticleSource>;
    async fn articles(&self) -> IngestResult<Vec<ArticleRecord>>;
    async fn article_sources(&self, article_id: i64) -> IngestResult<Vec<ArticleSource>>;
}

/// Everything the orchestrator and scheduler need.
pub trait IngestStore: SourceStore + RunStore + EventStore + ArticleStore {}

impl<T: SourceStore + RunStore + EventStore + ArticleStore> IngestStore for T {}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryState {
    next_id: i64,
    sources: BTreeMap<i64, Source>,
    runs: BTreeMap<i64, Run>,
    events: BTreeMap<i64, EventRecord>,
    event_keys: HashMap<String, i64>,
    event_items: BTreeMap<i64, EventSourceItem>,
    articles: BTreeMap<i64, ArticleRecord>,
    article_keys: HashMap<String, i64>,
    article_sources: BTreeMap<i64, ArticleSource>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store with optional JSON snapshots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<Source>) -> Self {
        let store = Self::new();
        if let Ok(mut st) = store.inner.lock() {
            st.sources = sources.into_iter().map(|s| (s.id, s)).collect();
        }
        store
    }

    /// Replace source definitions (e.g. after reloading the catalog), keeping
    /// the `last_run_at` bookkeeping of sources that survive.
    pub fn replace_sources(&self, sources: Vec<Source>) -> IngestResult<()> {
        let mut st = self.lock()?;
        let mut next = BTreeMap::new();
        for mut s in sources {
            if let Some(prev) = st.sources.get(&s.id) {
                s.last_run_at = s.last_run_at.or(prev.last_run_at);
            }
            next.insert(s.id, s);
        }
        st.sources = next;
        Ok(())
    }

    /// Load a snapshot written by `persist`. A missing file is an empty store.
    pub fn load(path: &Path) -> IngestResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Storage(format!("reading {}: {e}", path.display())))?;
        let state: MemoryState = serde_json::from_str(&data)
            .map_err(|e| IngestError::Storage(format!("parsing {}: {e}", path.display())))?;
        Ok(Self {
            inner: Mutex::new(state),
        })
    }

    /// Write the whole state to `path` (via a temp file + rename).
    pub fn persist(&self, path: &Path) -> IngestResult<()> {
        let data = {
            let st = self.lock()?;
            serde_json::to_string_pretty(&*st)
                .map_err(|e| IngestError::Storage(format!("serializing snapshot: {e}")))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| IngestError::Storage(format!("creating {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| IngestError::Storage(format!("writing {}: {e}", path.display())))
    }

    fn lock(&self) -> IngestResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| IngestError::Storage("memory store mutex poisoned".into()))
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn list_sources(&self) -> IngestResult<Vec<Source>> {
        Ok(self.lock()?.sources.values().cloned().collect())
    }

    async fn get_source(&self, id: i64) -> IngestResult<Option<Source>> {
        Ok(self.lock()?.sources.get(&id).cloned())
    }

    async fn mark_source_run(&self, id: i64, at: DateTime<Utc>) -> IngestResult<()> {
        let mut st = self.lock()?;
        match st.sources.get_mut(&id) {
            Some(s) => {
                s.last_run_at = Some(at);
                Ok(())
            }
            None => Err(IngestError::Storage(format!("unknown source {id}"))),
        }
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, source_id: i64, now: DateTime<Utc>) -> IngestResult<Run> {
        let mut st = self.lock()?;
        if let Some(open) = st
            .runs
            .values()
            .find(|r| r.source_id == source_id && r.is_outstanding())
        {
            return Err(IngestError::config(format!(
                "source {source_id} already has run {} {}",
                open.id,
                open.status.as_str()
            )));
        }
        let id = st.next_id();
        let run = Run::queued(id, source_id, now);
        st.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn save_run(&self, run: &Run) -> IngestResult<()> {
        let mut st = self.lock()?;
        if !st.runs.contains_key(&run.id) {
            return Err(IngestError::Storage(format!("unknown run {}", run.id)));
        }
        st.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn outstanding_run(&self, source_id: i64) -> IngestResult<Option<Run>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .find(|r| r.source_id == source_id && r.is_outstanding())
            .cloned())
    }

    async fn last_success(&self, source_id: i64) -> IngestResult<Option<Run>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|r| r.source_id == source_id && r.status == RunStatus::Success)
            .max_by_key(|r| r.finished_at)
            .cloned())
    }

    async fn runs_for(&self, source_id: i64) -> IngestResult<Vec<Run>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn upsert_event(
        &self,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> IngestResult<(EventRecord, bool)> {
        let mut st = self.lock()?;
        if let Some(&id) = st.event_keys.get(&event.identity_key) {
            let rec = st
                .events
                .get_mut(&id)
                .ok_or_else(|| IngestError::Storage(format!("dangling event key {id}")))?;
            rec.title = event.title;
            rec.starts_at = event.starts_at;
            rec.ends_at = event.ends_at;
            rec.all_day = event.all_day;
            rec.location_name = event.location_name;
            rec.location_address = event.location_address;
            rec.description = event.description;
            rec.url = event.url;
            rec.updated_at = now;
            return Ok((rec.clone(), false));
        }

        let id = st.next_id();
        let rec = EventRecord {
            id,
            identity_key: event.identity_key.clone(),
            locality_id: event.locality_id,
            title: event.title,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            all_day: event.all_day,
            location_name: event.location_name,
            location_address: event.location_address,
            description: event.description,
            url: event.url,
            created_at: now,
            updated_at: now,
        };
        st.event_keys.insert(event.identity_key, id);
        st.events.insert(id, rec.clone());
        Ok((rec, true))
    }

    async fn upsert_event_source_item(
        &self,
        item: NewEventSourceItem,
    ) -> IngestResult<EventSourceItem> {
        let mut st = self.lock()?;
        if let Some(existing) = st.event_items.values_mut().find(|e| {
            e.event_id == item.event_id
                && e.source_id == item.source_id
                && e.source_url == item.source_url
                && e.external_id == item.external_id
        }) {
            existing.raw = item.raw;
            existing.fetched_at = item.fetched_at;
            return Ok(existing.clone());
        }
        let id = st.next_id();
        let row = EventSourceItem {
            id,
            event_id: item.event_id,
            source_id: item.source_id,
            source_url: item.source_url,
            external_id: item.external_id,
            raw: item.raw,
            fetched_at: item.fetched_at,
        };
        st.event_items.insert(id, row.clone());
        Ok(row)
    }

    async fn event_by_identity(&self, identity_key: &str) -> IngestResult<Option<EventRecord>> {
        let st = self.lock()?;
        Ok(st
            .event_keys
            .get(identity_key)
            .and_then(|id| st.events.get(id))
            .cloned())
    }

    async fn events(&self) -> IngestResult<Vec<EventRecord>> {
        Ok(self.lock()?.events.values().cloned().collect())
    }

    async fn event_source_items(&self, event_id: i64) -> IngestResult<Vec<EventSourceItem>> {
        Ok(self
            .lock()?
            .event_items
            .values()
            .filter(|i| i.event_id == event_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn article_by_canonical_url(
        &self,
        locality_id: i64,
        url: &str,
    ) -> IngestResult<Option<ArticleRecord>> {
        Ok(self
            .lock()?
            .articles
            .values()
            .find(|a| a.locality_id == locality_id && a.canonical_url.as_deref() == Some(url))
            .cloned())
    }

    async fn article_by_source_url(&self, source_url: &str) -> IngestResult<Option<ArticleRecord>> {
        let st = self.lock()?;
        Ok(st
            .article_sources
            .values()
            .find(|l| l.source_url == source_url)
            .and_then(|l| st.articles.get(&l.article_id))
            .cloned())
    }

    async fn article_by_external_id(
        &self,
        source_id: i64,
        external_id: &str,
    ) -> IngestResult<Option<ArticleRecord>> {
        let st = self.lock()?;
        Ok(st
            .article_sources
            .values()
            .find(|l| l.source_id == source_id && l.external_id.as_deref() == Some(external_id))
            .and_then(|l| st.articles.get(&l.article_id))
            .cloned())
    }

    async fn article_by_identity(
        &self,
        identity_key: &str,
    ) -> IngestResult<Option<ArticleRecord>> {
        let st = self.lock()?;
        Ok(st
            .article_keys
            .get(identity_key)
            .and_then(|id| st.articles.get(id))
            .cloned())
    }

    async fn insert_article(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> IngestResult<(ArticleRecord, bool)> {
        let mut st = self.lock()?;
        if let Some(existing) = st
            .article_keys
            .get(&article.identity_key)
            .and_then(|id| st.articles.get(id))
        {
            return Ok((existing.clone(), false));
        }
        let id = st.next_id();
        let rec = ArticleRecord {
            id,
            identity_key: article.identity_key.clone(),
            locality_id: article.locality_id,
            title: article.title,
            canonical_url: article.canonical_url,
            published_at: article.published_at,
            summary: article.summary,
            body: article.body,
            content_quality: article.content_quality,
            created_at: now,
            updated_at: now,
        };
        st.article_keys.insert(article.identity_key, id);
        st.articles.insert(id, rec.clone());
        Ok((rec, true))
    }

    async fn update_article(&self, article: &ArticleRecord) -> IngestResult<()> {
        let mut st = self.lock()?;
        match st.articles.get_mut(&article.id) {
            Some(slot) => {
                // identity key is immutable once assigned
                let key = slot.identity_key.clone();
                *slot = article.clone();
                slot.identity_key = key;
                Ok(())
            }
            None => Err(IngestError::Storage(format!("unknown article {}", article.id))),
        }
    }

    async fn upsert_article_source(&self, link: NewArticleSource) -> IngestResult<ArticleSource> {
        let mut st = self.lock()?;
        if let Some(existing) = st.article_sources.values_mut().find(|l| {
            l.article_id == link.article_id
                && l.source_id == link.source_id
                && l.source_url == link.source_url
                && l.external_id == link.external_id
        }) {
            existing.raw = link.raw;
            existing.fetched_at = link.fetched_at;
            return Ok(existing.clone());
        }
        let id = st.next_id();
        let row = ArticleSource {
            id,
            article_id: link.article_id,
            source_id: link.source_id,
            source_url: link.source_url,
            external_id: link.external_id,
            raw: link.raw,
            fetched_at: link.fetched_at,
        };
        st.article_sources.insert(id, row.clone());
        Ok(row)
    }

    async fn articles(&self) -> IngestResult<Vec<ArticleRecord>> {
        Ok(self.lock()?.articles.values().cloned().collect())
    }

    async fn article_sources(&self, article_id: i64) -> IngestResult<Vec<ArticleSource>> {
        Ok(self
            .lock()?
            .article_sources
            .values()
            .filter(|l| l.article_id == article_id)
            .cloned()
            .collect())
    }
}
