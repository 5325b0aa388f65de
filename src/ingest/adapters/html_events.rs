// src/ingest/adapters/html_events.rs
//! Event listings scraped from HTML pages, with an optional per-item detail
//! page fetch that fills fields the listing leaves blank.

use async_trait::async_trait;
use chrono_tz::Tz;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::dom;
use super::{EventAdapter, FetchContext};
use crate::error::{IngestError, IngestResult};
use crate::ingest::datetime::{self, When};
use crate::ingest::normalize::normalize_url;
use crate::ingest::types::{NormalizedEvent, Protocol, Source, SourceKind};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub item_selector: Option<String>,
    pub title_selector: Option<String>,
    pub date_selector: Option<String>,
    pub time_selector: Option<String>,
    pub location_selector: Option<String>,
    pub description_selector: Option<String>,
    pub link_selector: Option<String>,
    pub link_attr: Option<String>,
    pub datetime_selector: Option<String>,
    pub datetime_attr: Option<String>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    pub enabled: bool,
    pub max_detail_fetches: Option<usize>,
    #[serde(flatten)]
    pub selectors: SelectorConfig,
}

/// Compiled form of a `SelectorConfig`.
struct Selectors {
    item: Option<Selector>,
    title: Option<Selector>,
    date: Option<Selector>,
    time: Option<Selector>,
    location: Option<Selector>,
    description: Option<Selector>,
    link: Option<Selector>,
    link_attr: String,
    datetime: Option<Selector>,
    datetime_attr: String,
}

impl Selectors {
    fn compile(source_id: i64, prefix: &str, cfg: &SelectorConfig) -> IngestResult<Self> {
        let sel = |key: &str, css: &Option<String>| {
            dom::selector(source_id, &format!("{prefix}.{key}"), css.as_deref())
        };
        Ok(Self {
            item: sel("item_selector", &cfg.item_selector)?,
            title: sel("title_selector", &cfg.title_selector)?,
            date: sel("date_selector", &cfg.date_selector)?,
            time: sel("time_selector", &cfg.time_selector)?,
            location: sel("location_selector", &cfg.location_selector)?,
            description: sel("description_selector", &cfg.description_selector)?,
            link: sel("link_selector", &cfg.link_selector)?,
            link_attr: non_blank(&cfg.link_attr).unwrap_or("href").to_string(),
            datetime: sel("datetime_selector", &cfg.datetime_selector)?,
            datetime_attr: non_blank(&cfg.datetime_attr)
                .unwrap_or("datetime")
                .to_string(),
        })
    }

    /// Field values below `scope`.
    fn extract(&self, scope: ElementRef<'_>) -> RawFields {
        let link = match &self.link {
            Some(sel) => dom::first_attr(scope, Some(sel), &self.link_attr),
            // no link selector: the item itself or its first anchor
            None => scope
                .value()
                .attr(&self.link_attr)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| dom::first_attr(scope, Some(&*ANCHOR), "href")),
        };
        let datetime = dom::first_attr(scope, self.datetime.as_ref(), &self.datetime_attr)
            .or_else(|| dom::first_text(scope, self.datetime.as_ref()));
        RawFields {
            title: dom::first_text(scope, self.title.as_ref()),
            date: dom::first_text(scope, self.date.as_ref()),
            time: dom::first_text(scope, self.time.as_ref()),
            location: dom::first_text(scope, self.location.as_ref()),
            description: dom::first_text(scope, self.description.as_ref()),
            link,
            datetime,
        }
    }
}

static ANCHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Text pulled from one listing item (or its detail page).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawFields {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub datetime: Option<String>,
}

impl RawFields {
    /// Fill blank fields from `other`.
    fn fill_from(&mut self, other: RawFields) {
        fn fill(slot: &mut Option<String>, v: Option<String>) {
            if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
                if let Some(v) = v.filter(|v| !v.trim().is_empty()) {
                    *slot = Some(v);
                }
            }
        }
        fill(&mut self.title, other.title);
        fill(&mut self.date, other.date);
        fill(&mut self.time, other.time);
        fill(&mut self.location, other.location);
        fill(&mut self.description, other.description);
        fill(&mut self.link, other.link);
        fill(&mut self.datetime, other.datetime);
    }

    fn when(&self, tz: Tz, year: i32) -> Option<When> {
        if let Some(dt) = self.datetime.as_deref() {
            if let Some(w) = datetime::parse_iso(dt, tz)
                .or_else(|| datetime::parse_when_with_year(dt, self.time.as_deref(), tz, year))
            {
                return Some(w);
            }
        }
        datetime::parse_when_with_year(self.date.as_deref()?, self.time.as_deref(), tz, year)
    }
}

/// Items on a listing page, capped at `max_items`.
pub fn parse_listing(
    html: &str,
    source_id: i64,
    cfg: &SelectorConfig,
    max_items: usize,
) -> IngestResult<Vec<RawFields>> {
    let sels = Selectors::compile(source_id, "list", cfg)?;
    let Some(item_sel) = sels.item.as_ref() else {
        return Err(IngestError::config(format!(
            "source {source_id}: list.item_selector is required"
        )));
    };
    let doc = Html::parse_document(html);
    Ok(doc
        .select(item_sel)
        .take(max_items)
        .map(|el| sels.extract(el))
        .collect())
}

/// Fields from a detail page; selectors apply to the whole document (or to
/// the first `item_selector` match when one is set).
pub fn parse_detail(html: &str, source_id: i64, cfg: &SelectorConfig) -> IngestResult<RawFields> {
    let sels = Selectors::compile(source_id, "detail", cfg)?;
    let doc = Html::parse_document(html);
    let scope = match sels.item.as_ref() {
        Some(sel) => doc.select(sel).next().unwrap_or_else(|| doc.root_element()),
        None => doc.root_element(),
    };
    Ok(sels.extract(scope))
}

pub struct HtmlEventsAdapter;

#[async_trait]
impl EventAdapter for HtmlEventsAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Html
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        source: &Source,
    ) -> IngestResult<Vec<NormalizedEvent>> {
        source.ensure_handled_by(SourceKind::Event, Protocol::Html)?;
        let list_cfg: SelectorConfig = source.config_section(Some("list"))?;
        let detail_cfg: DetailConfig = source.config_section(Some("detail"))?;
        // validate selectors before touching the network
        Selectors::compile(source.id, "list", &list_cfg)?;
        if detail_cfg.enabled {
            Selectors::compile(source.id, "detail", &detail_cfg.selectors)?;
        }

        let t0 = std::time::Instant::now();
        let max_items = list_cfg.max_items.unwrap_or(ctx.config.html.max_items);
        let page = ctx.http.get_text(&source.base_url).await?;
        let mut rows = parse_listing(&page, source.id, &list_cfg, max_items)?;

        if detail_cfg.enabled {
            let budget = detail_cfg
                .max_detail_fetches
                .unwrap_or(ctx.config.html.max_detail_fetches);
            let mut fetched = 0usize;
            for row in rows.iter_mut() {
                if fetched >= budget {
                    break;
                }
                let Some(url) = row
                    .link
                    .as_deref()
                    .and_then(|l| normalize_url(l, &source.base_url))
                else {
                    continue;
                };
                fetched += 1;
                counter!("ingest_detail_fetches_total").increment(1);
                let detail = match ctx.http.get_text(&url).await {
                    Ok(body) => parse_detail(&body, source.id, &detail_cfg.selectors),
                    Err(e) => Err(e),
                };
                match detail {
                    Ok(fields) => row.fill_from(fields),
                    Err(e) => tracing::warn!(
                        target: "ingest",
                        source_id = source.id,
                        url = %url,
                        error = %e,
                        "detail fetch failed; keeping listing fields"
                    ),
                }
            }
        }

        let tz = ctx.tz_for(source);
        let year = ctx.reference_year(source);
        let events = rows
            .into_iter()
            .filter_map(|row| to_event(source, row, tz, year))
            .collect();
        histogram!("ingest_fetch_ms", "protocol" => "html").record(t0.elapsed().as_millis() as f64);
        Ok(events)
    }
}

fn to_event(source: &Source, row: RawFields, tz: Tz, year: i32) -> Option<NormalizedEvent> {
    let title = row.title.clone().filter(|t| !t.is_empty());
    let when = row.when(tz, year);
    let (Some(title), Some(when)) = (title, when) else {
        counter!("ingest_items_dropped_total", "reason" => "unparseable_date").increment(1);
        tracing::debug!(
            target: "ingest",
            source_id = source.id,
            title = ?row.title,
            date = ?row.date,
            "html item without title or resolvable start"
        );
        return None;
    };
    let url = row
        .link
        .as_deref()
        .and_then(|l| normalize_url(l, &source.base_url));
    let raw = serde_json::to_value(&row).unwrap_or_default();
    Some(NormalizedEvent {
        title,
        starts_at: Some(when.starts_at),
        ends_at: when.ends_at,
        all_day: when.all_day,
        location_name: row.location,
        location_address: None,
        description: row.description,
        url,
        external_id: None,
        source_url: Some(source.base_url.clone()),
        identity_hash: None,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const LISTING: &str = r#"
      <ul class="events">
        <li class="event">
          <h3><a href="/events/council">City Council</a></h3>
          <span class="date">January 15, 2026</span>
          <span class="time">7:00 PM - 8:30 PM</span>
          <span class="where">City Hall</span>
        </li>
        <li class="event">
          <h3><a href="/events/fair">Spring Fair</a></h3>
          <time datetime="2026-04-18">April 18</time>
        </li>
        <li class="event"><h3>No date</h3></li>
      </ul>"#;

    fn list_cfg() -> SelectorConfig {
        serde_json::from_value(json!({
            "item_selector": "li.event",
            "title_selector": "h3",
            "date_selector": ".date",
            "time_selector": ".time",
            "location_selector": ".where",
            "link_selector": "h3 a",
            "datetime_selector": "time"
        }))
        .unwrap()
    }

    #[test]
    fn listing_rows_and_event_mapping() {
        let rows = parse_listing(LISTING, 3, &list_cfg(), 200).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].link.as_deref(), Some("/events/council"));
        assert_eq!(rows[1].datetime.as_deref(), Some("2026-04-18"));

        let source = test_support::source(
            3,
            SourceKind::Event,
            Protocol::Html,
            "https://city.example.com/calendar",
            json!({}),
        );
        let events: Vec<_> = rows
            .into_iter()
            .filter_map(|r| to_event(&source, r, chrono_tz::America::Chicago, 2026))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].starts_at, Some(Utc.with_ymd_and_hms(2026, 1, 16, 1, 0, 0).unwrap()));
        assert_eq!(events[0].location_name.as_deref(), Some("City Hall"));
        assert_eq!(events[0].url.as_deref(), Some("https://city.example.com/events/council"));
        assert!(events[1].all_day);
    }

    #[test]
    fn max_items_caps_listing() {
        assert_eq!(parse_listing(LISTING, 3, &list_cfg(), 1).unwrap().len(), 1);
    }

    #[test]
    fn missing_item_selector_is_config_error() {
        let err = parse_listing(LISTING, 3, &SelectorConfig::default(), 10).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn detail_fills_only_blank_fields() {
        let mut row = RawFields {
            title: Some("Listing title".into()),
            ..Default::default()
        };
        let cfg: SelectorConfig = serde_json::from_value(json!({
            "title_selector": "h1",
            "date_selector": ".when",
            "description_selector": ".body"
        }))
        .unwrap();
        let detail = parse_detail(
            r#"<h1>Detail title</h1><p class="when">Feb 2, 2026</p><div class="body">Bring a chair.</div>"#,
            3,
            &cfg,
        )
        .unwrap();
        row.fill_from(detail);
        assert_eq!(row.title.as_deref(), Some("Listing title"));
        assert_eq!(row.date.as_deref(), Some("Feb 2, 2026"));
        assert_eq!(row.description.as_deref(), Some("Bring a chair."));
    }
}
