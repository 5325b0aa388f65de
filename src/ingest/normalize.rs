// src/ingest/normalize.rs
//! Canonical forms used for identity hashing and URL resolution.
//! Nothing here is meant for display.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\s*/?\s*[a-z][a-z0-9]*(?:\s[^>]*)?/?\s*>").expect("markup regex"));
static RE_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("scheme regex"));

/// Trim, collapse internal whitespace, lower-case.
pub fn normalize_title(s: &str) -> String {
    RE_WS.replace_all(s.trim(), " ").to_lowercase()
}

/// Non-empty name and address joined, then title-normalized.
pub fn normalize_location(name: Option<&str>, address: Option<&str>) -> String {
    let joined = [name, address]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    normalize_title(&joined)
}

/// Resolve `url` against `base`:
/// - absolute URLs pass through,
/// - `//host/x` inherits the base scheme,
/// - `/path` inherits scheme, host and port,
/// - bare relative paths resolve against the base's directory.
///
/// Empty input, or a relative URL with an unusable base, yields `None`.
pub fn normalize_url(url: &str, base: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if RE_SCHEME.is_match(url) && !url.starts_with("//") {
        return Some(url.to_string());
    }

    let base = Url::parse(base.trim()).ok()?;
    if !base.has_host() {
        return None;
    }

    if let Some(rest) = url.strip_prefix("//") {
        return Some(format!("{}://{}", base.scheme(), rest));
    }

    let origin = origin_of(&base)?;
    if url.starts_with('/') {
        return Some(format!("{origin}{url}"));
    }
    if url.starts_with('?') || url.starts_with('#') {
        return base.join(url).ok().map(String::from);
    }

    // "event-1" against "/calendar/list" → "/calendar/event-1"
    let path = base.path();
    let dir = match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    };
    Some(format!("{origin}{dir}{url}"))
}

fn origin_of(base: &Url) -> Option<String> {
    let host = base.host_str()?;
    Some(match base.port() {
        Some(port) => format!("{}://{}:{}", base.scheme(), host, port),
        None => format!("{}://{}", base.scheme(), host),
    })
}

/// True when the text carries HTML tags.
pub fn contains_markup(s: &str) -> bool {
    RE_MARKUP.is_match(s)
}

/// Scheme + host + path (trailing slash ignored) + sorted query equality.
/// Approximate by nature; used only for the ICS "URL points back at the feed"
/// heuristic.
pub fn same_resource(a: &str, b: &str) -> bool {
    match (Url::parse(a.trim()), Url::parse(b.trim())) {
        (Ok(a), Ok(b)) => resource_key(&a) == resource_key(&b),
        _ => false,
    }
}

fn resource_key(u: &Url) -> (String, String, String, Vec<(String, String)>) {
    let mut query: Vec<(String, String)> = u
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    query.sort();
    (
        u.scheme().to_ascii_lowercase(),
        u.host_str().unwrap_or_default().to_ascii_lowercase(),
        u.path().trim_end_matches('/').to_string(),
        query,
    )
}
