//! Link extraction from page markup
//!
//! The orchestrator only sees the [`LinkExtractor`] trait; the markup engine
//! that really understands the wiki syntax plugs in behind it.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::model::{ExtractedLink, PageName};

/// Characters of context kept on each side of a link
const EXCERPT_RADIUS: usize = 25;

static BRACKET_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]|]+)(?:\|[^\[\]]*)?\]").expect("valid link pattern"));

/// Extracts the set of (target, excerpt) pairs a markup text links to
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, markup: &str) -> BTreeSet<ExtractedLink>;
}

/// Default extractor for `[Target]` and `[Target|label]` tokens.
///
/// External URLs, in-page anchors (`#...`), module invocations
/// (`module:...`) and site-relative links (`=...`) are not page links and are
/// skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketLinkExtractor;

impl BracketLinkExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn is_page_target(target: &str) -> bool {
    !(target.is_empty()
        || target.contains("://")
        || target.starts_with('#')
        || target.starts_with('=')
        || target.to_ascii_lowercase().starts_with("module:"))
}

/// Up to `EXCERPT_RADIUS` characters around `start..end`, on char boundaries
fn excerpt(markup: &str, start: usize, end: usize) -> String {
    let before: String = markup[..start]
        .chars()
        .rev()
        .take(EXCERPT_RADIUS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let after: String = markup[end..].chars().take(EXCERPT_RADIUS).collect();
    format!("{}{}{}", before, &markup[start..end], after)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl LinkExtractor for BracketLinkExtractor {
    fn extract_links(&self, markup: &str) -> BTreeSet<ExtractedLink> {
        BRACKET_LINK
            .captures_iter(markup)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let target = PageName::new(caps.get(1)?.as_str().trim());
                if !is_page_target(target.as_str()) {
                    return None;
                }
                Some(ExtractedLink::new(
                    target.as_str(),
                    excerpt(markup, whole.start(), whole.end()),
                ))
            })
            .collect()
    }
}
