// src/ingest/adapters/html_articles.rs
//! News articles: a listing (HTML page or feed) yields links, each link is
//! fetched and its main content extracted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;

use super::rss::{parse_feed, parse_feed_date};
use super::{dom, ArticleAdapter, FetchContext};
use crate::config::ArticleSettings;
use crate::error::{IngestError, IngestResult};
use crate::ingest::clean_opt;
use crate::ingest::datetime;
use crate::ingest::normalize::normalize_url;
use crate::ingest::types::{ContentQuality, NormalizedArticle, Protocol, Source, SourceKind};

const DEFAULT_CONTENT_SELECTOR: &str = "article, main, [role=main]";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub link_selector: Option<String>,
    pub link_attr: Option<String>,
    pub max_links: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArticleConfig {
    pub content_selector: Option<String>,
    pub remove_selectors: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArticleSourceConfig {
    pub list: ListConfig,
    pub article: ArticleConfig,
    pub best_effort: bool,
}

impl ArticleSourceConfig {
    fn from_source(source: &Source) -> IngestResult<Self> {
        let cfg: Self = source.config_section(None)?;
        // compile once up front so a typo fails before any fetch
        Extraction::compile(source.id, &cfg)?;
        Ok(cfg)
    }
}

/// Compiled article-page selectors.
struct Extraction {
    content: Selector,
    removed: Vec<Selector>,
}

impl Extraction {
    fn compile(source_id: i64, cfg: &ArticleSourceConfig) -> IngestResult<Self> {
        let css = cfg
            .article
            .content_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTENT_SELECTOR);
        let content = Selector::parse(css).map_err(|e| {
            IngestError::config(format!(
                "source {source_id}: invalid selector article.content_selector {css:?}: {e}"
            ))
        })?;
        let removed = cfg
            .article
            .remove_selectors
            .iter()
            .filter_map(|css| dom::selector(source_id, "article.remove_selectors", Some(css)).transpose())
            .collect::<IngestResult<Vec<_>>>()?;
        Ok(Self { content, removed })
    }
}

macro_rules! selectors {
    ($($css:expr),+ $(,)?) => {
        vec![$(Selector::parse($css).expect("static selector")),+]
    };
}

static META_TITLE: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors![
        r#"meta[property="og:title"]"#,
        r#"meta[name="twitter:title"]"#,
    ]
});
static META_PUBLISHED: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors![
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="pubdate"]"#,
        r#"meta[name="publish-date"]"#,
        r#"meta[name="date"]"#,
        r#"meta[itemprop="datePublished"]"#,
    ]
});
static META_DESCRIPTION: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors![
        r#"meta[name="description"]"#,
        r#"meta[property="og:description"]"#,
    ]
});
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("h1 selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("title selector"));
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time").expect("time selector"));
static CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).expect("canonical selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Resolved links on a listing page, de-duplicated, in document order.
pub fn extract_links(
    html: &str,
    page_url: &str,
    source_id: i64,
    list: &ListConfig,
    max_links: usize,
) -> IngestResult<Vec<String>> {
    let sel = dom::selector(source_id, "list.link_selector", list.link_selector.as_deref())?;
    let attr = list
        .link_attr
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or("href");
    let doc = Html::parse_document(html);
    let sel = sel.as_ref().unwrap_or(&*ANCHOR);

    let mut out: Vec<String> = Vec::new();
    for href in doc.select(sel).filter_map(|el| el.value().attr(attr)) {
        if out.len() >= max_links {
            break;
        }
        let href = href.trim();
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
            continue;
        }
        if let Some(url) = normalize_url(href, page_url) {
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }
    Ok(out)
}

/// Everything pulled from one article page before quality grading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtract {
    pub title: Option<String>,
    pub published: Option<String>,
    pub summary: Option<String>,
    pub canonical: Option<String>,
    /// Text under the content selector, `None` when it matched nothing.
    pub body: Option<String>,
}

fn extract_page(html: &str, page_url: &str, ex: &Extraction) -> PageExtract {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let title = dom::meta_content(&doc, &META_TITLE)
        .or_else(|| dom::first_text(root, Some(&*H1)))
        .or_else(|| dom::first_text(root, Some(&*TITLE)));
    let published = dom::meta_content(&doc, &META_PUBLISHED)
        .or_else(|| dom::first_attr(root, Some(&*TIME), "datetime"))
        .or_else(|| dom::first_text(root, Some(&*TIME)));
    let summary = dom::meta_content(&doc, &META_DESCRIPTION);
    let canonical = dom::first_attr(root, Some(&*CANONICAL), "href")
        .and_then(|href| normalize_url(&href, page_url));
    let body = doc
        .select(&ex.content)
        .next()
        .map(|el| dom::block_text(el, &ex.removed))
        .filter(|b| !b.is_empty());

    PageExtract {
        title,
        published,
        summary,
        canonical,
        body,
    }
}

/// Snippet unless the body clears both the word and character floors.
pub fn grade(body: &str, settings: &ArticleSettings) -> ContentQuality {
    if dom::word_count(body) >= settings.min_words && body.chars().count() >= settings.min_chars {
        ContentQuality::Full
    } else {
        ContentQuality::Snippet
    }
}

/// Hints from the listing (feed) that fill blanks on the page.
#[derive(Debug, Clone, Default)]
struct ListingHints {
    title: Option<String>,
    summary: Option<String>,
    published: Option<DateTime<Utc>>,
    external_id: Option<String>,
}

/// Turn a fetched page into an article, or explain why not.
#[allow(clippy::too_many_arguments)]
fn build_article(
    url: &str,
    html: &str,
    ex: &Extraction,
    hints: ListingHints,
    best_effort: bool,
    settings: &ArticleSettings,
    tz: Tz,
    year: i32,
) -> Result<NormalizedArticle, String> {
    let page = extract_page(html, url, ex);

    let body = match (page.body.clone(), best_effort) {
        (Some(b), false) if b.chars().count() >= settings.strict_min_chars => b,
        (Some(b), false) => {
            return Err(format!(
                "content too short ({} chars, need {})",
                b.chars().count(),
                settings.strict_min_chars
            ))
        }
        (None, false) => return Err("content selector matched nothing".into()),
        (Some(b), true) => b,
        (None, true) => page
            .summary
            .clone()
            .or_else(|| hints.summary.clone())
            .ok_or_else(|| "no content and no description".to_string())?,
    };

    let title = page
        .title
        .clone()
        .or(hints.title)
        .ok_or_else(|| "no title".to_string())?;
    let published_at = page
        .published
        .as_deref()
        .and_then(|p| parse_feed_date(p, tz, year).or_else(|| datetime::parse_iso(p, tz).map(|w| w.starts_at)))
        .or(hints.published);

    Ok(NormalizedArticle {
        title,
        url: page.canonical.clone().or_else(|| Some(url.to_string())),
        source_url: url.to_string(),
        external_id: hints.external_id,
        published_at,
        summary: page.summary.clone().or(hints.summary),
        content_quality: grade(&body, settings),
        body,
        raw: json!({
            "title": page.title,
            "published": page.published,
            "canonical": page.canonical,
            "has_content": page.body.is_some(),
        }),
    })
}

/// Fetch and extract each link; failures are logged and skipped.
async fn fetch_articles(
    ctx: &FetchContext,
    source: &Source,
    cfg: &ArticleSourceConfig,
    links: Vec<(String, ListingHints)>,
) -> IngestResult<Vec<NormalizedArticle>> {
    let ex = Extraction::compile(source.id, cfg)?;
    let tz = ctx.tz_for(source);
    let year = ctx.reference_year(source);
    let mut out = Vec::with_capacity(links.len());
    for (url, hints) in links {
        let html = match ctx.http.get_text(&url).await {
            Ok(html) => html,
            Err(e) => {
                counter!("ingest_items_dropped_total", "reason" => "article_fetch").increment(1);
                tracing::warn!(target: "ingest", source_id = source.id, url = %url, error = %e, "article fetch failed");
                continue;
            }
        };
        match build_article(
            &url,
            &html,
            &ex,
            hints,
            cfg.best_effort,
            &ctx.config.articles,
            tz,
            year,
        ) {
            Ok(a) => out.push(a),
            Err(reason) => {
                counter!("ingest_items_dropped_total", "reason" => "article_extract").increment(1);
                tracing::warn!(target: "ingest", source_id = source.id, url = %url, %reason, "article skipped");
            }
        }
    }
    Ok(out)
}

pub struct HtmlArticlesAdapter;

#[async_trait]
impl ArticleAdapter for HtmlArticlesAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Html
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedArticle>> {
        source.ensure_handled_by(SourceKind::Article, Protocol::Html)?;
        let cfg = ArticleSourceConfig::from_source(source)?;
        let t0 = std::time::Instant::now();

        let listing = ctx.http.get_text(&source.base_url).await?;
        let max_links = cfg.list.max_links.unwrap_or(ctx.config.articles.max_links);
        let links = extract_links(&listing, &source.base_url, source.id, &cfg.list, max_links)?;
        tracing::debug!(target: "ingest", source_id = source.id, links = links.len(), "article links found");

        let links = links
            .into_iter()
            .map(|u| (u, ListingHints::default()))
            .collect();
        let out = fetch_articles(ctx, source, &cfg, links).await?;
        histogram!("ingest_fetch_ms", "protocol" => "html_articles")
            .record(t0.elapsed().as_millis() as f64);
        Ok(out)
    }
}

/// Article source whose listing is an RSS/Atom feed.
pub struct RssArticlesAdapter;

#[async_trait]
impl ArticleAdapter for RssArticlesAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Rss
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedArticle>> {
        source.ensure_handled_by(SourceKind::Article, Protocol::Rss)?;
        let cfg = ArticleSourceConfig::from_source(source)?;
        let t0 = std::time::Instant::now();
        let tz = ctx.tz_for(source);
        let year = ctx.reference_year(source);

        let feed = ctx.http.get_text(&source.base_url).await?;
        let max_links = cfg.list.max_links.unwrap_or(ctx.config.articles.max_links);
        let mut links: Vec<(String, ListingHints)> = Vec::new();
        for item in parse_feed(&feed)? {
            if links.len() >= max_links {
                break;
            }
            let Some(url) = item
                .link
                .as_deref()
                .and_then(|l| normalize_url(l, &source.base_url))
            else {
                continue;
            };
            if links.iter().any(|(u, _)| *u == url) {
                continue;
            }
            let hints = ListingHints {
                title: clean_opt(item.title.as_deref()),
                summary: clean_opt(item.description.as_deref()),
                published: item
                    .published
                    .as_deref()
                    .and_then(|p| parse_feed_date(p, tz, year)),
                external_id: item.guid.clone(),
            };
            links.push((url, hints));
        }

        let out = fetch_articles(ctx, source, &cfg, links).await?;
        histogram!("ingest_fetch_ms", "protocol" => "rss_articles")
            .record(t0.elapsed().as_millis() as f64);
        Ok(out)
    }
}
