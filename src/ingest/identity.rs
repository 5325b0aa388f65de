// src/ingest/identity.rs
//! Identity keys for events and articles, and the article match order.

use sha2::{Digest, Sha256};

use crate::error::IngestResult;
use crate::ingest::normalize::{normalize_location, normalize_title};
use crate::ingest::store::{ArticleRecord, ArticleStore};
use crate::ingest::types::{NormalizedArticle, NormalizedEvent, Source};

/// Hex characters kept from the SHA-256 digest (160 bits).
pub const KEY_LEN: usize = 40;

/// Body prefix (in chars) that feeds the article content hash.
const ARTICLE_BODY_PREFIX: usize = 2000;

/// SHA-256 over the parts joined with a unit separator, truncated.
pub fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(KEY_LEN);
    hex
}

fn is_key(s: &str) -> bool {
    s.len() == KEY_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Identity of an event within a locality. An explicit hash wins (used
/// verbatim when it already looks like a key); otherwise the key comes from
/// title, start and location.
pub fn event_identity(locality_id: i64, event: &NormalizedEvent) -> String {
    if let Some(explicit) = event
        .identity_hash
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return if is_key(explicit) {
            explicit.to_ascii_lowercase()
        } else {
            digest(&["explicit", explicit])
        };
    }

    let start = event
        .starts_at
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default();
    let location = normalize_location(
        event.location_name.as_deref(),
        event.location_address.as_deref(),
    );
    digest(&[
        &locality_id.to_string(),
        &normalize_title(&event.title),
        &start,
        &location,
    ])
}

/// Hash a profile derives from a stable upstream id.
pub fn profile_identity(profile: &str, source_id: i64, external_id: &str) -> String {
    digest(&[profile, &source_id.to_string(), external_id.trim()])
}

pub fn article_content_hash(locality_id: i64, title: &str, body: &str) -> String {
    let prefix: String = body.chars().take(ARTICLE_BODY_PREFIX).collect();
    digest(&[
        &locality_id.to_string(),
        &normalize_title(title),
        &normalize_title(&prefix),
    ])
}

/// Which rule found an existing article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    CanonicalUrl,
    SourceUrl,
    ExternalId,
    ContentHash,
}

/// Find the stored article a fetched one refers to. First match wins:
/// canonical URL in the locality, fetched URL, upstream id from the same
/// source, content hash.
pub async fn resolve_article<S>(
    store: &S,
    source: &Source,
    article: &NormalizedArticle,
) -> IngestResult<Option<(ArticleRecord, MatchKind)>>
where
    S: ArticleStore + ?Sized,
{
    let locality_id = source.locality.id;

    if let Some(url) = article.url.as_deref().filter(|u| !u.trim().is_empty()) {
        if let Some(rec) = store.article_by_canonical_url(locality_id, url).await? {
            return Ok(Some((rec, MatchKind::CanonicalUrl)));
        }
    }
    if !article.source_url.trim().is_empty() {
        if let Some(rec) = store.article_by_source_url(&article.source_url).await? {
            return Ok(Some((rec, MatchKind::SourceUrl)));
        }
    }
    if let Some(ext) = article.external_id.as_deref().filter(|e| !e.trim().is_empty()) {
        if let Some(rec) = store.article_by_external_id(source.id, ext).await? {
            return Ok(Some((rec, MatchKind::ExternalId)));
        }
    }
    let hash = article_content_hash(locality_id, &article.title, &article.body);
    Ok(store
        .article_by_identity(&hash)
        .await?
        .map(|rec| (rec, MatchKind::ContentHash)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(title: &str, location: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            title: title.into(),
            starts_at: Some(Utc.with_ymd_and_hms(2026, 1, 16, 1, 0, 0).unwrap()),
            location_name: location.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn digest_is_truncated_hex() {
        let d = digest(&["a", "b"]);
        assert_eq!(d.len(), KEY_LEN);
        assert!(is_key(&d));
        assert_ne!(d, digest(&["ab"]));
    }

    #[test]
    fn event_identity_ignores_cosmetic_differences() {
        let a = event_identity(1, &event("City Council  Meeting", Some("City Hall")));
        let b = event_identity(1, &event(" city council meeting ", Some("CITY HALL")));
        assert_eq!(a, b);
        assert_ne!(a, event_identity(2, &event("City Council Meeting", Some("City Hall"))));
        assert_ne!(a, event_identity(1, &event("City Council Meeting", None)));
    }

    #[test]
    fn explicit_hash_used_verbatim_or_rehashed() {
        let key = "ABCDEF0123456789abcdef0123456789ABCDEF01";
        let mut e = event("x", None);
        e.identity_hash = Some(key.into());
        assert_eq!(event_identity(1, &e), key.to_ascii_lowercase());

        e.identity_hash = Some("upstream-42".into());
        let rehashed = event_identity(1, &e);
        assert!(is_key(&rehashed));
        assert_eq!(rehashed, event_identity(9, &e));
    }

    #[test]
    fn article_hash_uses_only_body_prefix() {
        let base = "word ".repeat(500);
        let longer = format!("{base}{}", "tail ".repeat(100));
        assert_eq!(
            article_content_hash(1, "Title", &base),
            article_content_hash(1, "title", &longer)
        );
        assert_ne!(
            article_content_hash(1, "Title", "short"),
            article_content_hash(1, "Title", "other")
        );
    }

    #[test]
    fn profile_identity_is_scoped_by_source() {
        assert_eq!(
            profile_identity("token_auth", 3, "e-1"),
            profile_identity("token_auth", 3, " e-1 ")
        );
        assert_ne!(
            profile_identity("token_auth", 3, "e-1"),
            profile_identity("token_auth", 4, "e-1")
        );
    }
}
