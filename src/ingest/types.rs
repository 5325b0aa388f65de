// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ics,
    Rss,
    Json,
    Html,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Ics => "ics",
            Protocol::Rss => "rss",
            Protocol::Json => "json",
            Protocol::Html => "html",
        };
        f.write_str(s)
    }
}

/// What a source produces: calendar events or news articles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Event,
    Article,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locality {
    pub id: i64,
    pub name: String,
    /// IANA zone name, e.g. "America/Chicago".
    pub timezone: String,
}

/// One configured external feed or site. Read-only to the pipeline apart from
/// `last_run_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    #[serde(default)]
    pub kind: SourceKind,
    pub name: String,
    pub protocol: Protocol,
    pub base_url: String,
    /// Free-form protocol specific configuration.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    pub locality: Locality,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_enabled() -> bool {
    true
}

impl Source {
    /// Effective timezone: `config.timezone` → locality → `fallback`.
    pub fn timezone(&self, fallback: chrono_tz::Tz) -> chrono_tz::Tz {
        self.config
            .get("timezone")
            .and_then(|v| v.as_str())
            .and_then(|s| s.trim().parse().ok())
            .or_else(|| self.locality.timezone.trim().parse().ok())
            .unwrap_or(fallback)
    }

    /// String value at a dot path inside `config`, blank values ignored.
    pub fn config_str(&self, path: &str) -> Option<&str> {
        crate::ingest::value_at_path(&self.config, path)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Deserialize the whole config (or a section of it) into a typed struct.
    /// A missing section yields `T::default()`.
    pub fn config_section<T>(&self, section: Option<&str>) -> IngestResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let value = match section {
            Some(key) => match self.config.get(key) {
                Some(v) if !v.is_null() => v.clone(),
                _ => return Ok(T::default()),
            },
            None if self.config.is_null() => return Ok(T::default()),
            None => self.config.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            IngestError::config(format!(
                "source {} has invalid {} config: {e}",
                self.id,
                section.unwrap_or("root")
            ))
        })
    }

    /// Adapters call this before touching the network.
    pub fn ensure_handled_by(&self, kind: SourceKind, protocol: Protocol) -> IngestResult<()> {
        if self.kind != kind || self.protocol != protocol {
            return Err(IngestError::config(format!(
                "source {} ({:?}/{}) cannot be handled by the {:?}/{} adapter",
                self.id, self.kind, self.protocol, kind, protocol
            )));
        }
        Ok(())
    }
}

/// One fetched calendar event before identity resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedEvent {
    pub title: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location_name: Option<String>,
    pub location_address: Option<String>,
    pub description: Option<String>,
    /// Canonical item URL.
    pub url: Option<String>,
    pub external_id: Option<String>,
    /// Where the item was fetched from.
    pub source_url: Option<String>,
    /// Pre-computed identity, bypasses the content hash when present.
    pub identity_hash: Option<String>,
    /// Upstream payload kept for diagnostics.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentQuality {
    Full,
    #[default]
    Snippet,
}

/// One fetched article before identity resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedArticle {
    pub title: String,
    /// Canonical URL (rel=canonical when present, else the fetched URL).
    pub url: Option<String>,
    /// The URL the article was fetched from.
    pub source_url: String,
    pub external_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Meta description.
    pub summary: Option<String>,
    pub body: String,
    pub content_quality: ContentQuality,
    pub raw: serde_json::Value,
}
