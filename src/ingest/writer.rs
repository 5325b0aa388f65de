// src/ingest/writer.rs
use chrono::Utc;
use std::sync::Arc;

use crate::error::{IngestError, IngestResult};
use crate::ingest::identity::{article_content_hash, event_identity, resolve_article};
use crate::ingest::store::{
    ArticleRecord, ArticleStore, EventStore, IngestStore, NewArticle, NewArticleSource, NewEvent,
    NewEventSourceItem,
};
use crate::ingest::types::{ContentQuality, NormalizedArticle, NormalizedEvent, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub record_id: i64,
    pub created: bool,
}

/// Idempotent upserts of normalized items plus their linkage rows.
#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn IngestStore>,
}

impl Writer {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    pub async fn write_event(
        &self,
        source: &Source,
        item: &NormalizedEvent,
    ) -> IngestResult<WriteOutcome> {
        let title = item.title.trim();
        if title.is_empty() {
            return Err(IngestError::config(format!(
                "source {}: event without title",
                source.id
            )));
        }
        let starts_at = item.starts_at.ok_or_else(|| {
            IngestError::config(format!("source {}: event {title:?} without start", source.id))
        })?;

        let now = Utc::now();
        let (record, created) = self
            .store
            .upsert_event(
                NewEvent {
                    identity_key: event_identity(source.locality.id, item),
                    locality_id: source.locality.id,
                    title: title.to_string(),
                    starts_at,
                    ends_at: item.ends_at,
                    all_day: item.all_day,
                    location_name: item.location_name.clone(),
                    location_address: item.location_address.clone(),
                    description: item.description.clone(),
                    url: item.url.clone(),
                },
                now,
            )
            .await?;

        self.store
            .upsert_event_source_item(NewEventSourceItem {
                event_id: record.id,
                source_id: source.id,
                source_url: item.source_url.clone(),
                external_id: item.external_id.clone(),
                raw: item.raw.clone(),
                fetched_at: now,
            })
            .await?;

        Ok(WriteOutcome {
            record_id: record.id,
            created,
        })
    }

    pub async fn write_article(
        &self,
        source: &Source,
        item: &NormalizedArticle,
    ) -> IngestResult<WriteOutcome> {
        if source.locality.id <= 0 {
            return Err(IngestError::config(format!(
                "source {}: article without locality",
                source.id
            )));
        }
        let title = item.title.trim();
        if title.is_empty() {
            return Err(IngestError::config(format!(
                "source {}: article without title",
                source.id
            )));
        }
        if item.source_url.trim().is_empty() {
            return Err(IngestError::config(format!(
                "source {}: article {title:?} without source url",
                source.id
            )));
        }

        let now = Utc::now();
        let (record, created) = match resolve_article(self.store.as_ref(), source, item).await? {
            Some((existing, how)) => {
                tracing::debug!(
                    target: "ingest",
                    source_id = source.id,
                    article_id = existing.id,
                    matched = ?how,
                    "article already known"
                );
                (self.apply_merge(existing, item, now).await?, false)
            }
            None => {
                let (rec, created) = self
                    .store
                    .insert_article(
                        NewArticle {
                            identity_key: article_content_hash(
                                source.locality.id,
                                title,
                                &item.body,
                            ),
                            locality_id: source.locality.id,
                            title: title.to_string(),
                            canonical_url: item.url.clone(),
                            published_at: item.published_at,
                            summary: item.summary.clone(),
                            body: item.body.clone(),
                            content_quality: item.content_quality,
                        },
                        now,
                    )
                    .await?;
                if created {
                    (rec, true)
                } else {
                    // lost a race on the content hash; treat as a match
                    (self.apply_merge(rec, item, now).await?, false)
                }
            }
        };

        self.store
            .upsert_article_source(NewArticleSource {
                article_id: record.id,
                source_id: source.id,
                source_url: item.source_url.clone(),
                external_id: item.external_id.clone(),
                raw: item.raw.clone(),
                fetched_at: now,
            })
            .await?;

        Ok(WriteOutcome {
            record_id: record.id,
            created,
        })
    }

    async fn apply_merge(
        &self,
        existing: ArticleRecord,
        item: &NormalizedArticle,
        now: chrono::DateTime<Utc>,
    ) -> IngestResult<ArticleRecord> {
        let mut merged = merge_article(existing.clone(), item);
        if merged == existing {
            return Ok(existing);
        }
        merged.updated_at = now;
        self.store.update_article(&merged).await?;
        Ok(merged)
    }
}

/// Fill blanks, upgrade snippet bodies to full ones, prefer longer full bodies.
pub fn merge_article(mut rec: ArticleRecord, item: &NormalizedArticle) -> ArticleRecord {
    if rec.canonical_url.is_none() {
        rec.canonical_url = item.url.clone();
    }
    if rec.published_at.is_none() {
        rec.published_at = item.published_at;
    }
    if rec.summary.as_deref().map_or(true, |s| s.trim().is_empty()) {
        if let Some(summary) = item.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            rec.summary = Some(summary.to_string());
        }
    }

    let incoming = item.body.trim();
    let replace_body = match (rec.content_quality, item.content_quality) {
        _ if incoming.is_empty() => false,
        _ if rec.body.trim().is_empty() => true,
        (ContentQuality::Snippet, ContentQuality::Full) => true,
        (ContentQuality::Full, ContentQuality::Full) => {
            incoming.chars().count() > rec.body.trim().chars().count()
        }
        _ => false,
    };
    if replace_body {
        rec.body = item.body.clone();
        if item.content_quality == ContentQuality::Full {
            rec.content_quality = ContentQuality::Full;
        }
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemoryStore;
    use crate::ingest::test_support;
    use crate::ingest::types::{Protocol, SourceKind};
    use chrono::TimeZone;
    use serde_json::json;

    fn setup() -> (Writer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Writer::new(store.clone()), store)
    }

    fn event_source() -> Source {
        test_support::source(
            1,
            SourceKind::Event,
            Protocol::Ics,
            "https://example.com/cal.ics",
            json!({}),
        )
    }

    fn article_source(id: i64) -> Source {
        test_support::source(
            id,
            SourceKind::Article,
            Protocol::Html,
            "https://news.example.com/",
            json!({}),
        )
    }

    fn event(title: &str) -> NormalizedEvent {
        NormalizedEvent {
            title: title.into(),
            starts_at: Some(Utc.with_ymd_and_hms(2026, 1, 16, 1, 0, 0).unwrap()),
            source_url: Some("https://example.com/cal.ics".into()),
            external_id: Some("uid-1".into()),
            ..Default::default()
        }
    }

    fn article(source_url: &str, body: &str, quality: ContentQuality) -> NormalizedArticle {
        NormalizedArticle {
            title: "Budget approved".into(),
            url: Some(source_url.into()),
            source_url: source_url.into(),
            body: body.into(),
            content_quality: quality,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repeated_event_write_is_idempotent() {
        let (writer, store) = setup();
        let src = event_source();
        let first = writer.write_event(&src, &event("Council")).await.unwrap();
        let second = writer.write_event(&src, &event("Council")).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record_id, second.record_id);
        assert_eq!(store.events().await.unwrap().len(), 1);
        assert_eq!(
            store.event_source_items(first.record_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_items_are_rejected() {
        let (writer, _) = setup();
        let mut no_start = event("Council");
        no_start.starts_at = None;
        assert!(writer
            .write_event(&event_source(), &no_start)
            .await
            .unwrap_err()
            .is_config());
        assert!(writer
            .write_event(&event_source(), &event("   "))
            .await
            .unwrap_err()
            .is_config());
        let no_url = article("", "body", ContentQuality::Full);
        assert!(writer
            .write_article(&article_source(2), &no_url)
            .await
            .unwrap_err()
            .is_config());
    }

    #[tokio::test]
    async fn snippet_upgrades_to_full_and_links_both_sources() {
        let (writer, store) = setup();
        let url = "https://news.example.com/budget";
        let a = writer
            .write_article(&article_source(2), &article(url, "short", ContentQuality::Snippet))
            .await
            .unwrap();
        let full_body = "long body ".repeat(80);
        let b = writer
            .write_article(&article_source(3), &article(url, &full_body, ContentQuality::Full))
            .await
            .unwrap();
        assert_eq!(a.record_id, b.record_id);
        assert!(!b.created);

        let rec = &store.articles().await.unwrap()[0];
        assert_eq!(rec.content_quality, ContentQuality::Full);
        assert_eq!(rec.body, full_body);
        assert_eq!(store.article_sources(rec.id).await.unwrap().len(), 2);
    }

    #[test]
    fn merge_keeps_longer_full_body() {
        let now = Utc::now();
        let rec = ArticleRecord {
            id: 1,
            identity_key: "k".into(),
            locality_id: 1,
            title: "T".into(),
            canonical_url: None,
            published_at: None,
            summary: None,
            body: "a much longer existing full body".into(),
            content_quality: ContentQuality::Full,
            created_at: now,
            updated_at: now,
        };
        let mut item = article("https://x.test/a", "shorter", ContentQuality::Full);
        item.summary = Some("Meta".into());
        let merged = merge_article(rec.clone(), &item);
        assert_eq!(merged.body, rec.body);
        assert_eq!(merged.summary.as_deref(), Some("Meta"));
        assert_eq!(merged.canonical_url.as_deref(), Some("https://x.test/a"));
    }
}
