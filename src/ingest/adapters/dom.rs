// src/ingest/adapters/dom.rs
//! Small helpers over `scraper`. `Html` is not `Send`, so documents are parsed
//! and dropped inside synchronous functions; nothing here crosses an await.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use crate::error::{IngestError, IngestResult};
use crate::ingest::clean_text;

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "br", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "tr",
    "section", "article", "figcaption",
];

/// Compile a configured selector; blank means "not configured".
pub fn selector(source_id: i64, key: &str, css: Option<&str>) -> IngestResult<Option<Selector>> {
    match css.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(css) => Selector::parse(css).map(Some).map_err(|e| {
            IngestError::config(format!("source {source_id}: invalid selector {key} {css:?}: {e}"))
        }),
    }
}

/// Cleaned text of an element.
pub fn text_of(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Cleaned text of the first match below `scope`.
pub fn first_text(scope: ElementRef<'_>, sel: Option<&Selector>) -> Option<String> {
    let el = scope.select(sel?).next()?;
    Some(text_of(el)).filter(|t| !t.is_empty())
}

/// Attribute of the first match below `scope`.
pub fn first_attr(scope: ElementRef<'_>, sel: Option<&Selector>, attr: &str) -> Option<String> {
    scope
        .select(sel?)
        .find_map(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// `content` attribute of the first matching `<meta>` tag.
pub fn meta_content(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        doc.select(sel)
            .find_map(|el| el.value().attr("content"))
            .map(clean_text)
            .filter(|v| !v.is_empty())
    })
}

/// Text below `root` with `removed` subtrees and script/style skipped; block
/// elements start new lines.
pub fn block_text(root: ElementRef<'_>, removed: &[Selector]) -> String {
    let skip: HashSet<_> = removed
        .iter()
        .flat_map(|sel| root.select(sel).map(|el| el.id()))
        .collect();

    let mut buf = String::new();
    for node in root.descendants() {
        let skipped = std::iter::successors(Some(node), |n| n.parent())
            .take_while(|n| n.id() != root.id())
            .any(|n| skip.contains(&n.id()) || is_skipped_tag(n.value()));
        if skipped {
            continue;
        }
        if let Some(el) = node.value().as_element() {
            if BLOCK_TAGS.contains(&el.name()) {
                buf.push('\n');
            }
        } else if let Some(text) = node.value().as_text() {
            buf.push_str(text);
        }
    }
    collapse_lines(&buf)
}

fn is_skipped_tag(node: &scraper::Node) -> bool {
    node.as_element()
        .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
}

/// Collapse whitespace inside lines and drop blank lines.
pub fn collapse_lines(s: &str) -> String {
    s.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}
