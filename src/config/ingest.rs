// src/config/ingest.rs
use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const ENV_CONFIG_PATH: &str = "CIVIC_INGEST_CONFIG";
pub const DEFAULT_CONFIG_TOML: &str = "config/ingest.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/ingest.json";

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_retries() -> u8 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    concat!("civic-ingest/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_run_at() -> String {
    "06:00".to_string()
}
fn default_tick_secs() -> u64 {
    60
}
fn default_max_concurrent_runs() -> usize {
    4
}
fn default_max_items() -> usize {
    200
}
fn default_max_detail_fetches() -> usize {
    25
}
fn default_max_links() -> usize {
    20
}
fn default_min_words() -> usize {
    120
}
fn default_min_chars() -> usize {
    600
}
fn default_strict_min_chars() -> usize {
    200
}
fn default_true() -> bool {
    true
}

/// Immutable runtime configuration, built once and threaded (as
/// `Arc<IngestConfig>`) through adapters, writer, orchestrator and scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Used when neither the source nor its locality carry a valid IANA zone.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub html: HtmlSettings,
    #[serde(default)]
    pub articles: ArticleSettings,
    #[serde(default)]
    pub ics: IcsSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after the first one, transport failures and 5xx only.
    #[serde(default = "default_retries")]
    pub retries: u8,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// `HH:MM`, local to each source's timezone.
    #[serde(default = "default_run_at")]
    pub default_run_at: String,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlSettings {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_detail_fetches")]
    pub max_detail_fetches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSettings {
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    /// Word floor below which a body is a snippet.
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    /// Character floor below which a body is a snippet.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Hard floor for non best-effort scrapers.
    #[serde(default = "default_strict_min_chars")]
    pub strict_min_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcsSettings {
    /// Prefer a lone URL found in DESCRIPTION when the event URL is missing
    /// or points back at the feed.
    #[serde(default = "default_true")]
    pub prefer_description_url: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON snapshot of the in-memory store, reloaded on start.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            default_run_at: default_run_at(),
            tick_secs: default_tick_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl Default for HtmlSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_detail_fetches: default_max_detail_fetches(),
        }
    }
}

impl Default for ArticleSettings {
    fn default() -> Self {
        Self {
            max_links: default_max_links(),
            min_words: default_min_words(),
            min_chars: default_min_chars(),
            strict_min_chars: default_strict_min_chars(),
        }
    }
}

impl Default for IcsSettings {
    fn default() -> Self {
        Self {
            prefer_description_url: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            http: HttpSettings::default(),
            schedule: ScheduleSettings::default(),
            html: HtmlSettings::default(),
            articles: ArticleSettings::default(),
            ics: IcsSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl IngestConfig {
    /// Load from an explicit path. TOML or JSON, picked by extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: IngestConfig = if ext == "json" {
            serde_json::from_str(&data).context("parsing ingest config json")?
        } else {
            toml::from_str(&data).context("parsing ingest config toml")?
        };
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks:
    /// 1) $CIVIC_INGEST_CONFIG
    /// 2) config/ingest.toml
    /// 3) config/ingest.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from_file(&pb);
        }
        for candidate in [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_JSON] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
        }
        Ok(Self::default())
    }

    /// Clamp values that would make the pipeline misbehave back to defaults.
    pub fn sanitized(mut self) -> Self {
        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            tracing::warn!(
                timezone = %self.default_timezone,
                "invalid default_timezone, falling back to UTC"
            );
            self.default_timezone = default_timezone();
        }
        if self.http.timeout_secs == 0 {
            self.http.timeout_secs = default_timeout_secs();
        }
        // Small fixed retry budget; anything larger hides upstream outages.
        self.http.retries = self.http.retries.min(5);
        if NaiveTime::parse_from_str(&self.schedule.default_run_at, "%H:%M").is_err() {
            self.schedule.default_run_at = default_run_at();
        }
        if self.schedule.tick_secs == 0 {
            self.schedule.tick_secs = default_tick_secs();
        }
        self.schedule.max_concurrent_runs = self.schedule.max_concurrent_runs.clamp(1, 64);
        if self.html.max_items == 0 {
            self.html.max_items = default_max_items();
        }
        if self.articles.max_links == 0 {
            self.articles.max_links = default_max_links();
        }
        self
    }

    pub fn default_tz(&self) -> chrono_tz::Tz {
        self.default_timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    pub fn default_run_at(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.schedule.default_run_at, "%H:%M")
            .unwrap_or_else(|_| NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: IngestConfig = toml::from_str(
            r#"
default_timezone = "America/Chicago"
[http]
retries = 9
[schedule]
default_run_at = "25:99"
"#,
        )
        .unwrap();
        let cfg = cfg.sanitized();
        assert_eq!(cfg.default_timezone, "America/Chicago");
        assert_eq!(cfg.http.retries, 5);
        assert_eq!(cfg.http.timeout_secs, 20);
        assert_eq!(cfg.schedule.default_run_at, "06:00");
        assert_eq!(cfg.html.max_detail_fetches, 25);
        assert!(cfg.ics.prefer_description_url);
    }

    #[test]
    fn bad_timezone_falls_back_to_utc() {
        let cfg = IngestConfig {
            default_timezone: "Mars/Olympus".into(),
            ..IngestConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.default_tz(), chrono_tz::UTC);
    }
}
