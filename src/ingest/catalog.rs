// src/ingest/catalog.rs
//! Localities and sources from a TOML or JSON file.
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::{Frequency, Locality, Protocol, Source, SourceKind};

pub const ENV_SOURCES_PATH: &str = "CIVIC_INGEST_SOURCES";

#[derive(Debug, Clone, Deserialize)]
struct SourceEntry {
    id: i64,
    locality_id: i64,
    name: String,
    #[serde(default)]
    kind: SourceKind,
    protocol: Protocol,
    base_url: String,
    #[serde(default)]
    frequency: Frequency,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    localities: Vec<Locality>,
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

/// Validated catalog, sources already joined to their locality.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub localities: Vec<Locality>,
    pub sources: Vec<Source>,
}

/// Load a catalog from an explicit path. TOML or JSON, picked by extension.
pub fn load_catalog_from(path: &Path) -> Result<Catalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file: CatalogFile = if ext == "json" {
        serde_json::from_str(&content).context("parsing source catalog json")?
    } else {
        toml::from_str(&content).context("parsing source catalog toml")?
    };
    build(file).with_context(|| format!("validating source catalog {}", path.display()))
}

/// Load the catalog using env var + fallbacks:
/// 1) $CIVIC_INGEST_SOURCES
/// 2) config/sources.toml
/// 3) config/sources.json
///
/// No file at all is an empty catalog.
pub fn load_catalog_default() -> Result<Catalog> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
        }
        return load_catalog_from(&pb);
    }
    for candidate in ["config/sources.toml", "config/sources.json"] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_catalog_from(&pb);
        }
    }
    Ok(Catalog::default())
}

fn build(file: CatalogFile) -> Result<Catalog> {
    let mut localities = BTreeMap::new();
    for loc in file.localities {
        if loc.timezone.parse::<chrono_tz::Tz>().is_err() {
            tracing::warn!(
                locality_id = loc.id,
                timezone = %loc.timezone,
                "locality timezone is not an IANA zone; default timezone will apply"
            );
        }
        if localities.insert(loc.id, loc.clone()).is_some() {
            bail!("duplicate locality id {}", loc.id);
        }
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(file.sources.len());
    for entry in file.sources {
        if !seen.insert(entry.id) {
            bail!("duplicate source id {}", entry.id);
        }
        let locality = localities
            .get(&entry.locality_id)
            .cloned()
            .ok_or_else(|| anyhow!("source {} names unknown locality {}", entry.id, entry.locality_id))?;
        let base_url = entry.base_url.trim().to_string();
        url::Url::parse(&base_url)
            .with_context(|| format!("source {} has an invalid base_url {base_url:?}", entry.id))?;
        let config = match entry.config {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(v @ serde_json::Value::Object(_)) => v,
            Some(_) => bail!("source {} config must be a table/object", entry.id),
        };
        sources.push(Source {
            id: entry.id,
            kind: entry.kind,
            name: entry.name.trim().to_string(),
            protocol: entry.protocol,
            base_url,
            config,
            locality,
            frequency: entry.frequency,
            enabled: entry.enabled,
            last_run_at: None,
        });
    }

    Ok(Catalog {
        localities: localities.into_values().collect(),
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const TOML: &str = r#"
[[localities]]
id = 1
name = "Springfield"
timezone = "America/Chicago"

[[sources]]
id = 10
locality_id = 1
name = "City calendar"
protocol = "ics"
base_url = "https://city.example.com/calendar.ics"
frequency = "hourly"

[[sources]]
id = 11
locality_id = 1
name = "Library"
protocol = "html"
base_url = "https://lib.example.com/events"
[sources.config.list]
item_selector = "li.event"
"#;

    #[test]
    fn toml_catalog_joins_localities() {
        let file: CatalogFile = toml::from_str(TOML).unwrap();
        let cat = build(file).unwrap();
        assert_eq!(cat.sources.len(), 2);
        let by_id = |id: i64| cat.sources.iter().find(|s| s.id == id).unwrap();
        let lib = by_id(11);
        assert_eq!(lib.locality.timezone, "America/Chicago");
        assert_eq!(lib.kind, SourceKind::Event);
        assert_eq!(lib.frequency, Frequency::Daily);
        assert_eq!(lib.config_str("list.item_selector"), Some("li.event"));
        assert_eq!(by_id(10).frequency, Frequency::Hourly);
    }

    #[test]
    fn validation_errors() {
        let dup = TOML.replace("id = 11", "id = 10");
        assert!(build(toml::from_str(&dup).unwrap()).is_err());

        let unknown = TOML.replace("locality_id = 1\nname = \"Library\"", "locality_id = 9\nname = \"Library\"");
        let err = build(toml::from_str(&unknown).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown locality 9"));

        let bad_url = TOML.replace("https://lib.example.com/events", "not a url");
        assert!(build(toml::from_str(&bad_url).unwrap()).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_SOURCES_PATH);

        assert!(load_catalog_default().unwrap().sources.is_empty());

        let cfg_dir = tmp.path().join("config");
        fs::create_dir_all(&cfg_dir).unwrap();
        fs::write(cfg_dir.join("sources.toml"), TOML).unwrap();
        assert_eq!(load_catalog_default().unwrap().sources.len(), 2);

        let p_env = tmp.path().join("other.json");
        fs::write(
            &p_env,
            r#"{"localities":[{"id":2,"name":"Shelbyville","timezone":"America/New_York"}],
                "sources":[{"id":1,"locality_id":2,"name":"News","kind":"article",
                            "protocol":"rss","base_url":"https://news.example.com/feed"}]}"#,
        )
        .unwrap();
        env::set_var(ENV_SOURCES_PATH, p_env.display().to_string());
        let cat = load_catalog_default().unwrap();
        assert_eq!(cat.sources[0].kind, SourceKind::Article);
        env::remove_var(ENV_SOURCES_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
