//! In-book text search.
//!
//! Text nodes are flattened into a list of strings ([`TextWalk`]), matched
//! there ([`matcher`]) and mapped back to document ranges. Book-wide search
//! is an iterator so callers can show results section by section.

pub mod matcher;
pub mod walker;

use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use matcher::{Excerpt, Granularity, Sensitivity, TextMatch, TextRange};
pub use walker::{Filter, NodeFilter, Scope, TextWalk, accept_text};

use crate::book::Book;
use crate::dom::{Document, Range};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub match_case: bool,
    pub match_diacritics: bool,
    pub match_whole_words: bool,
    /// Used when a document declares no language.
    pub default_locale: Option<String>,
}

impl SearchOptions {
    pub fn granularity(&self) -> Granularity {
        if self.match_whole_words {
            Granularity::Word
        } else {
            Granularity::Grapheme
        }
    }

    pub fn sensitivity(&self) -> Sensitivity {
        Sensitivity::from_flags(self.match_case, self.match_diacritics)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub range: Range,
    pub excerpt: Excerpt,
}

/// Runs queries against section documents.
#[derive(Clone, Debug)]
pub struct SearchMatcher {
    options: SearchOptions,
    filter: NodeFilter,
}

impl SearchMatcher {
    pub fn new(options: SearchOptions) -> Self {
        Self {
            options,
            filter: accept_text,
        }
    }

    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Body language, then root language, then the configured default.
    pub fn locale(&self, doc: &Document) -> String {
        doc.body()
            .and_then(|body| doc.attr(body, "lang"))
            .filter(|lang| !lang.is_empty())
            .or_else(|| doc.lang())
            .or(self.options.default_locale.as_deref())
            .unwrap_or("en")
            .to_string()
    }

    pub fn find(&self, doc: &Document, query: &str) -> Vec<SearchResult> {
        self.find_in(doc, Scope::Document, query)
    }

    pub fn find_in(&self, doc: &Document, scope: Scope<'_>, query: &str) -> Vec<SearchResult> {
        let walk = TextWalk::new(doc, scope, self.filter);
        let locale = self.locale(doc);
        matcher::search(
            &walk.strings,
            query,
            &locale,
            self.options.granularity(),
            self.options.sensitivity(),
        )
        .into_iter()
        .filter_map(|m| {
            let r = m.range;
            let range = walk.make_range(r.start_index, r.start_offset, r.end_index, r.end_offset)?;
            Some(SearchResult {
                range,
                excerpt: m.excerpt,
            })
        })
        .collect()
    }
}

/// A match addressed by CFI, ready to be persisted or navigated to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub cfi: String,
    pub excerpt: Excerpt,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchEvent {
    /// Share of sections searched so far.
    Progress { progress: f64 },
    /// All matches of one section.
    Section { index: usize, subitems: Vec<SearchHit> },
    /// One match of a single-section search.
    Hit(SearchHit),
}

/// Lazy search over a whole book, or over one section.
///
/// Each section document is created only when the iterator reaches it.
pub struct BookSearch {
    book: Rc<Book>,
    matcher: SearchMatcher,
    query: String,
    next_index: usize,
    end: usize,
    single_section: bool,
    pending: std::collections::VecDeque<SearchEvent>,
}

impl BookSearch {
    pub fn new(book: Rc<Book>, matcher: SearchMatcher, query: &str) -> Self {
        let end = book.sections.len();
        Self {
            book,
            matcher,
            query: query.to_string(),
            next_index: 0,
            end,
            single_section: false,
            pending: Default::default(),
        }
    }

    pub fn section(book: Rc<Book>, matcher: SearchMatcher, query: &str, index: usize) -> Self {
        let end = if index < book.sections.len() { index + 1 } else { index };
        Self {
            book,
            matcher,
            query: query.to_string(),
            next_index: index,
            end,
            single_section: true,
            pending: Default::default(),
        }
    }

    fn search_section(&self, index: usize) -> Option<Vec<SearchHit>> {
        let doc = match self.book.sections[index].create_document() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping section {index} in search: {e}");
                return None;
            }
        };
        let hits: Vec<SearchHit> = self
            .matcher
            .find(&doc, &self.query)
            .into_iter()
            .map(|result| SearchHit {
                cfi: self.book.cfi_of(index, Some((&doc, &result.range))),
                excerpt: result.excerpt,
            })
            .collect();
        debug!("Section {index}: {} matches for {:?}", hits.len(), self.query);
        Some(hits)
    }
}

impl Iterator for BookSearch {
    type Item = SearchEvent;

    fn next(&mut self) -> Option<SearchEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.next_index >= self.end {
                return None;
            }
            let index = self.next_index;
            self.next_index += 1;
            let hits = self.search_section(index);

            if self.single_section {
                self.pending
                    .extend(hits.into_iter().flatten().map(SearchEvent::Hit));
                continue;
            }
            let progress = (index + 1) as f64 / self.book.sections.len() as f64;
            self.pending.push_back(SearchEvent::Progress { progress });
            if let Some(subitems) = hits.filter(|h| !h.is_empty()) {
                self.pending.push_back(SearchEvent::Section { index, subitems });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    #[test]
    fn test_locale_precedence() {
        let matcher = SearchMatcher::new(SearchOptions {
            default_locale: Some("de".into()),
            ..Default::default()
        });
        let doc = parse_html(r#"<html lang="fr"><body lang="tr"><p>x</p></body></html>"#).unwrap();
        assert_eq!(matcher.locale(&doc), "tr");
        let doc = parse_html(r#"<html lang="fr"><body><p>x</p></body></html>"#).unwrap();
        assert_eq!(matcher.locale(&doc), "fr");
        let doc = parse_html("<p>x</p>").unwrap();
        assert_eq!(matcher.locale(&doc), "de");
        assert_eq!(SearchMatcher::new(SearchOptions::default()).locale(&doc), "en");
    }

    #[test]
    fn test_find_maps_to_document_ranges() {
        let doc = parse_html("<body><p>The quick <b>brown</b> fox</p><p>Another fox.</p></body>").unwrap();
        let matcher = SearchMatcher::new(SearchOptions::default());
        let results = matcher.find(&doc, "FOX");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].range.to_text(&doc), "fox");
        assert_eq!(results[1].excerpt.pre, "Another ");

        let across = matcher.find(&doc, "quick brown");
        assert_eq!(across.len(), 1);
        assert_eq!(across[0].range.to_text(&doc), "quick brown");
    }

    #[test]
    fn test_options_pick_strategy() {
        let options = SearchOptions {
            match_case: true,
            match_diacritics: true,
            ..Default::default()
        };
        assert_eq!(options.sensitivity(), Sensitivity::Variant);
        assert_eq!(options.granularity(), Granularity::Grapheme);
        let options = SearchOptions {
            match_whole_words: true,
            ..Default::default()
        };
        assert_eq!(options.sensitivity(), Sensitivity::Base);
        assert_eq!(options.granularity(), Granularity::Word);
    }
}
