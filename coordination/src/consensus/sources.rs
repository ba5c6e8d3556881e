//! Reference extraction from agent outputs
//!
//! Agents cite URLs and file paths; both are collected as stage sources.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'`)\]]+"#).expect("URL_PATTERN regex should compile")
});

static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s(\["'`])((?:\.{1,2}/|/)?(?:[A-Za-z0-9_.-]+/)+[A-Za-z0-9_-][A-Za-z0-9_.-]*\.[A-Za-z0-9]{1,10})"#)
        .expect("PATH_PATTERN regex should compile")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// URLs and file paths mentioned in `text`, in order of appearance.
pub fn extract_sources(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    // Paths inside URLs are not separate references, so URLs are blanked
    // out (same length, offsets preserved) before scanning for paths.
    let mut masked = text.to_string();
    for m in URL_PATTERN.find_iter(text) {
        found.push((
            m.start(),
            m.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string(),
        ));
        masked.replace_range(m.range(), &" ".repeat(m.len()));
    }

    for caps in PATH_PATTERN.captures_iter(&masked) {
        if let Some(path) = caps.get(1) {
            found.push((
                path.start(),
                path.as_str().trim_end_matches(TRAILING_PUNCTUATION).to_string(),
            ));
        }
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, source)| source).collect()
}

/// Deduplicate while keeping the first occurrence of each entry.
pub fn dedupe_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Sources across several outputs, deduplicated in first-seen order.
pub fn collect_sources<'a, I>(texts: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    dedupe_preserving_order(texts.into_iter().flat_map(extract_sources))
}
