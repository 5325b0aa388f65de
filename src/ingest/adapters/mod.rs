// src/ingest/adapters/mod.rs
//! Protocol adapters: fetch a source and hand back normalized items.
//!
//! Every adapter checks the source's kind and protocol before any network
//! call and fails with a configuration error on mismatch.

mod dom;
pub mod html_articles;
pub mod html_events;
pub mod ics;
pub mod json_api;
pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::ingest::http::HttpClient;
use crate::ingest::types::{NormalizedArticle, NormalizedEvent, Protocol, Source};

/// What an adapter needs besides the source itself.
#[derive(Clone)]
pub struct FetchContext {
    pub http: HttpClient,
    pub config: Arc<IngestConfig>,
    pub now: DateTime<Utc>,
}

impl FetchContext {
    pub fn new(http: HttpClient, config: Arc<IngestConfig>) -> Self {
        Self {
            http,
            config,
            now: Utc::now(),
        }
    }

    /// Pin "now" (month loops, year-less dates).
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn tz_for(&self, source: &Source) -> chrono_tz::Tz {
        source.timezone(self.config.default_tz())
    }

    /// Year that year-less dates belong to, in the source's zone.
    pub fn reference_year(&self, source: &Source) -> i32 {
        self.now.with_timezone(&self.tz_for(source)).year()
    }
}

#[async_trait]
pub trait EventAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;
    async fn fetch(&self, ctx: &FetchContext, source: &Source)
        -> IngestResult<Vec<NormalizedEvent>>;
}

#[async_trait]
pub trait ArticleAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;
    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedArticle>>;
}

static ICS: ics::IcsAdapter = ics::IcsAdapter;
static RSS: rss::RssAdapter = rss::RssAdapter;
static JSON: json_api::JsonApiAdapter = json_api::JsonApiAdapter;
static HTML_EVENTS: html_events::HtmlEventsAdapter = html_events::HtmlEventsAdapter;
static HTML_ARTICLES: html_articles::HtmlArticlesAdapter = html_articles::HtmlArticlesAdapter;
static RSS_ARTICLES: html_articles::RssArticlesAdapter = html_articles::RssArticlesAdapter;

pub fn event_adapter_for(protocol: Protocol) -> &'static dyn EventAdapter {
    match protocol {
        Protocol::Ics => &ICS,
        Protocol::Rss => &RSS,
        Protocol::Json => &JSON,
        Protocol::Html => &HTML_EVENTS,
    }
}

pub fn article_adapter_for(protocol: Protocol) -> IngestResult<&'static dyn ArticleAdapter> {
    match protocol {
        Protocol::Html => Ok(&HTML_ARTICLES),
        Protocol::Rss => Ok(&RSS_ARTICLES),
        other => Err(IngestError::config(format!(
            "no article adapter for protocol {other}"
        ))),
    }
}
