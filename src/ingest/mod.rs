// src/ingest/mod.rs
pub mod adapters;
pub mod catalog;
pub mod datetime;
pub mod http;
pub mod identity;
pub mod normalize;
pub mod orchestrator;
pub mod profiles;
pub mod run;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod writer;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

pub use orchestrator::Orchestrator;
pub use scheduler::Scheduler;
pub use types::{NormalizedArticle, NormalizedEvent, Source};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Runs finished, labelled by status.");
        describe_counter!(
            "ingest_items_found_total",
            "Items returned by adapters before filtering."
        );
        describe_counter!(
            "ingest_items_written_total",
            "Items upserted by the writer."
        );
        describe_counter!(
            "ingest_items_dropped_total",
            "Items skipped, labelled by reason."
        );
        describe_counter!("ingest_http_requests_total", "Upstream HTTP requests.");
        describe_counter!(
            "ingest_http_retries_total",
            "Upstream HTTP requests retried after a transport error or 5xx."
        );
        describe_counter!(
            "ingest_detail_fetches_total",
            "Detail pages fetched by the HTML listing adapter."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Document parse time in milliseconds.");
        describe_gauge!(
            "ingest_scheduler_last_tick_ts",
            "Unix ts when the scheduler last evaluated sources."
        );
    });
}

/// Display cleanup for scraped text: decode entities, strip tags, fold smart
/// quotes, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Block-level tags become line breaks, everything else is dropped
    static RE_BREAKS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)<\s*(?:br|/p|/div|/li|/h[1-6])\s*/?>").expect("breaks regex")
    });
    static RE_TAGS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)</?[a-z!][^>]*>").expect("tags regex"));
    out = RE_BREAKS.replace_all(&out, "\n").to_string();
    out = RE_TAGS.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    // 4) Collapse whitespace per line, drop blank runs
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("ws regex"));
    let lines: Vec<String> = out
        .lines()
        .map(|l| RE_WS.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

/// `clean_text` that maps blank results to `None`.
pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(clean_text).filter(|t| !t.is_empty())
}

/// Walk a dot path (`data.events`, `items.0.venue`) through a JSON value.
/// An empty path returns the value itself.
pub fn value_at_path<'a>(v: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(v);
    }
    path.split('.').try_fold(v, |cur, seg| match cur {
        serde_json::Value::Object(map) => map.get(seg),
        serde_json::Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::types::{Frequency, Locality, Protocol, Source, SourceKind};

    pub fn locality() -> Locality {
        Locality {
            id: 1,
            name: "Springfield".into(),
            timezone: "America/Chicago".into(),
        }
    }

    pub fn source(
        id: i64,
        kind: SourceKind,
        protocol: Protocol,
        base_url: &str,
        config: serde_json::Value,
    ) -> Source {
        Source {
            id,
            kind,
            name: format!("source-{id}"),
            protocol,
            base_url: base_url.to_string(),
            config,
            locality: locality(),
            frequency: Frequency::Daily,
            enabled: true,
            last_run_at: None,
        }
    }
}
