// src/ingest/adapters/rss.rs
//! RSS 2.0 / Atom feeds. `parse_feed` is shared with the RSS article adapter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{EventAdapter, FetchContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::datetime::{self, local_midnight, localize};
use crate::ingest::normalize::normalize_url;
use crate::ingest::types::{NormalizedEvent, Protocol, Source, SourceKind};
use crate::ingest::{clean_opt, clean_text};

/// One `<item>` / `<entry>` with the fields the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// First non-empty of description, summary, content:encoded, content.
    pub description: Option<String>,
    /// pubDate / published / updated / dc:date, unparsed.
    pub published: Option<String>,
    /// guid / id
    pub guid: Option<String>,
    pub raw: Map<String, Value>,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    item: FeedItem,
    link_rel: Option<String>,
    description: Option<String>,
    summary: Option<String>,
    encoded: Option<String>,
    content: Option<String>,
}

impl ItemBuilder {
    fn set_field(&mut self, name: &str, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.item
            .raw
            .entry(name.to_string())
            .or_insert_with(|| Value::String(text.clone()));
        let slot = match name {
            "title" => &mut self.item.title,
            "link" => &mut self.item.link,
            "description" => &mut self.description,
            "summary" => &mut self.summary,
            "encoded" => &mut self.encoded,
            "content" => &mut self.content,
            "pubDate" | "published" | "updated" | "date" => &mut self.item.published,
            "guid" | "id" => &mut self.item.guid,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    /// Atom `<link href=… rel=…/>`: `alternate` (or no rel) wins.
    fn set_link_attr(&mut self, href: String, rel: Option<String>) {
        let is_alternate = rel.as_deref().map_or(true, |r| r == "alternate");
        let have_alternate = self
            .link_rel
            .as_deref()
            .map_or(self.item.link.is_some(), |r| r == "alternate");
        if self.item.link.is_none() || (is_alternate && !have_alternate) {
            self.item.link = Some(href.trim().to_string());
            self.link_rel = Some(rel.unwrap_or_else(|| "alternate".into()));
        }
    }

    fn finish(mut self) -> FeedItem {
        self.item.description = [self.description, self.summary, self.encoded, self.content]
            .into_iter()
            .flatten()
            .find(|d| !d.trim().is_empty());
        self.item
    }
}

/// Parse an RSS or Atom document into its items.
pub fn parse_feed(xml: &str) -> IngestResult<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let cleaned = scrub_html_entities_for_xml(xml);
    let mut reader = Reader::from_str(&cleaned);

    let mut items = Vec::new();
    let mut saw_root = false;
    let mut current: Option<ItemBuilder> = None;
    // direct child of the current item and its accumulated text
    let mut field: Option<(String, String)> = None;
    let mut depth_in_item = 0usize;

    loop {
        let ev = reader
            .read_event()
            .map_err(|e| IngestError::malformed("feed xml", e))?;
        match ev {
            Event::Start(ref e) => {
                let name = local_name(e);
                if !saw_root && matches!(name.as_str(), "rss" | "feed" | "RDF") {
                    saw_root = true;
                }
                match current.as_mut() {
                    None if name == "item" || name == "entry" => {
                        current = Some(ItemBuilder::default());
                        depth_in_item = 0;
                    }
                    Some(b) => {
                        depth_in_item += 1;
                        if depth_in_item == 1 {
                            if name == "link" {
                                if let Some(href) = attr(e, "href") {
                                    b.set_link_attr(href, attr(e, "rel"));
                                }
                            }
                            field = Some((name, String::new()));
                        }
                    }
                    None => {}
                }
            }
            Event::Empty(ref e) => {
                let name = local_name(e);
                if let (Some(b), 0) = (current.as_mut(), depth_in_item) {
                    if name == "link" {
                        if let Some(href) = attr(e, "href") {
                            b.set_link_attr(href, attr(e, "rel"));
                        }
                    }
                }
            }
            Event::Text(ref t) => {
                if let Some((_, buf)) = field.as_mut() {
                    match t.unescape() {
                        Ok(s) => buf.push_str(&s),
                        Err(_) => buf.push_str(&String::from_utf8_lossy(t)),
                    }
                }
            }
            Event::CData(ref c) => {
                if let Some((_, buf)) = field.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(c));
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match current.as_mut() {
                    Some(_) if depth_in_item == 0 && (name == "item" || name == "entry") => {
                        if let Some(b) = current.take() {
                            items.push(b.finish());
                        }
                    }
                    Some(b) => {
                        if depth_in_item == 1 {
                            if let Some((fname, text)) = field.take() {
                                b.set_field(&fname, text);
                            }
                        }
                        depth_in_item = depth_in_item.saturating_sub(1);
                    }
                    None => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(IngestError::malformed(
            "feed xml",
            "no rss, feed or RDF root element",
        ));
    }
    histogram!("ingest_parse_ms", "format" => "feed").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(items)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// HTML entities that are not XML entities show up in real feeds.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Feed publish dates: RFC 2822, RFC 3339, then the loose parser.
pub fn parse_feed_date(s: &str, tz: Tz, reference_year: i32) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| datetime::parse_loose(s, tz, reference_year).map(|w| w.starts_at))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DateExtraction {
    /// Must contain a `datetime` named group.
    pub regex: Option<String>,
    /// chrono format for the captured text.
    pub format: Option<String>,
    pub all_day: Option<bool>,
}

struct Extractor {
    regex: Option<Regex>,
    format: Option<String>,
    all_day: Option<bool>,
}

impl Extractor {
    fn from_source(source: &Source) -> IngestResult<Self> {
        let cfg: DateExtraction = source.config_section(Some("date_extraction"))?;
        let regex = match cfg.regex.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|e| {
                    IngestError::config(format!(
                        "source {}: invalid date_extraction.regex: {e}",
                        source.id
                    ))
                })?;
                if !re.capture_names().flatten().any(|n| n == "datetime") {
                    return Err(IngestError::config(format!(
                        "source {}: date_extraction.regex needs a (?P<datetime>…) group",
                        source.id
                    )));
                }
                Some(re)
            }
            None => None,
        };
        Ok(Self {
            regex,
            format: cfg.format.filter(|f| !f.trim().is_empty()),
            all_day: cfg.all_day,
        })
    }

    /// Date named inside the item text, if the source configured a pattern.
    fn extract(&self, text: &str, tz: Tz, year: i32) -> Option<datetime::When> {
        let caps = self.regex.as_ref()?.captures(text)?;
        let raw = caps.name("datetime")?.as_str().trim();
        let when = match self.format.as_deref() {
            Some(fmt) => NaiveDateTime::parse_from_str(raw, fmt)
                .ok()
                .and_then(|naive| localize(naive, tz))
                .map(|t| datetime::When {
                    starts_at: t,
                    ends_at: None,
                    all_day: false,
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(raw, fmt)
                        .ok()
                        .and_then(|d| local_midnight(d, tz))
                        .map(|t| datetime::When {
                            starts_at: t,
                            ends_at: None,
                            all_day: true,
                        })
                }),
            None => datetime::parse_when_with_year(raw, None, tz, year),
        }?;
        Some(match self.all_day {
            Some(true) if !when.all_day => {
                let day = when.starts_at.with_timezone(&tz).date_naive();
                datetime::When {
                    starts_at: local_midnight(day, tz)?,
                    ends_at: None,
                    all_day: true,
                }
            }
            _ => when,
        })
    }
}

pub struct RssAdapter;

#[async_trait]
impl EventAdapter for RssAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Rss
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedEvent>> {
        source.ensure_handled_by(SourceKind::Event, Protocol::Rss)?;
        let extractor = Extractor::from_source(source)?;
        let t0 = std::time::Instant::now();
        let body = ctx.http.get_text(&source.base_url).await?;
        let items = parse_feed(&body)?;
        let events = map_feed_events(
            source,
            items,
            &extractor,
            ctx.tz_for(source),
            ctx.reference_year(source),
        );
        histogram!("ingest_fetch_ms", "protocol" => "rss").record(t0.elapsed().as_millis() as f64);
        Ok(events)
    }
}

fn map_feed_events(
    source: &Source,
    items: Vec<FeedItem>,
    extractor: &Extractor,
    tz: Tz,
    year: i32,
) -> Vec<NormalizedEvent> {
    items
        .into_iter()
        .filter_map(|item| {
            let title = clean_text(item.title.as_deref().unwrap_or_default());
            let description = clean_opt(item.description.as_deref());
            let haystack = format!("{title}\n{}", description.as_deref().unwrap_or_default());

            let when = extractor.extract(&haystack, tz, year).or_else(|| {
                // publish date as an all-day event on its local date
                let published = parse_feed_date(item.published.as_deref()?, tz, year)?;
                let day = published.with_timezone(&tz).date_naive();
                Some(datetime::When {
                    starts_at: local_midnight(day, tz)?,
                    ends_at: None,
                    all_day: true,
                })
            });
            let Some(when) = when else {
                counter!("ingest_items_dropped_total", "reason" => "unparseable_date").increment(1);
                tracing::debug!(target: "ingest", source_id = source.id, title = %title, "feed item without date");
                return None;
            };

            Some(NormalizedEvent {
                title,
                starts_at: Some(when.starts_at),
                ends_at: when.ends_at,
                all_day: when.all_day,
                location_name: None,
                location_address: None,
                description,
                url: item
                    .link
                    .as_deref()
                    .and_then(|l| normalize_url(l, &source.base_url)),
                external_id: item.guid.clone(),
                source_url: Some(source.base_url.clone()),
                identity_hash: None,
                raw: Value::Object(item.raw),
            })
        })
        .collect()
}
