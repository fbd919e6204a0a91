//! Navigation targets, their resolution into `(section, anchor)` pairs, and
//! the single-flight guard that keeps superseded navigations from landing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cfi::{self, Cfi};
use crate::dom::{Document, NodeId, Point, Range};

/// Anything the reader can be asked to go to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// A section index.
    Index(usize),
    /// A whole-book fraction.
    Fraction { fraction: f64 },
    /// A CFI or an href, told apart by [`cfi::is_cfi`].
    Link(String),
}

impl Target {
    pub fn fraction(fraction: f64) -> Self {
        Self::Fraction { fraction }
    }

    pub fn link(value: impl Into<String>) -> Self {
        Self::Link(value.into())
    }

    /// Parses user input: a CFI, a fraction such as `0.25` or `25%`, a
    /// section number, or an href.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if cfi::is_cfi(input) {
            return Self::Link(input.to_string());
        }
        if let Some(percent) = input.strip_suffix('%') {
            if let Ok(value) = percent.trim().parse::<f64>() {
                return Self::fraction(value / 100.0);
            }
        }
        if let Ok(index) = input.parse::<usize>() {
            return Self::Index(index);
        }
        match input.parse::<f64>() {
            Ok(value) if (0.0..=1.0).contains(&value) => Self::fraction(value),
            _ => Self::Link(input.to_string()),
        }
    }

    pub fn as_fraction(&self) -> Option<f64> {
        match self {
            Self::Fraction { fraction } => Some(*fraction),
            _ => None,
        }
    }

    /// Stable key identifying the destination, for single-flight checks.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "section {index}"),
            Self::Fraction { fraction } => write!(f, "{:.2}%", fraction * 100.0),
            Self::Link(value) => f.write_str(value),
        }
    }
}

impl From<usize> for Target {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::Link(value.to_string())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::Link(value)
    }
}

/// Persisted location, as stored in bookmarks and saved progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum BookmarkTarget {
    Cfi(String),
    Href(String),
    /// Page of a fixed-layout book, which is its section index.
    Page(usize),
    Fraction(f64),
}

impl From<&BookmarkTarget> for Target {
    fn from(target: &BookmarkTarget) -> Self {
        match target {
            BookmarkTarget::Cfi(value) | BookmarkTarget::Href(value) => Self::Link(value.clone()),
            BookmarkTarget::Page(page) => Self::Index(*page),
            BookmarkTarget::Fraction(fraction) => Self::fraction(*fraction),
        }
    }
}

/// Where inside a section to land.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Anchor {
    #[default]
    Start,
    /// Fraction of the section's pages.
    Fraction(f64),
    Range(Range),
    Node(NodeId),
    /// A CFI relative to the section document.
    Cfi(Cfi),
    /// An element id (or `name`) in the section document.
    Fragment(String),
}

/// An anchor evaluated against a loaded document.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnchorPosition {
    Fraction(f64),
    Range(Range),
}

impl Anchor {
    pub fn resolve(&self, doc: &Document) -> Option<AnchorPosition> {
        match self {
            Self::Start => Some(AnchorPosition::Fraction(0.0)),
            Self::Fraction(fraction) => Some(AnchorPosition::Fraction(*fraction)),
            Self::Range(range) => Some(AnchorPosition::Range(*range)),
            Self::Node(node) => node_range(doc, *node),
            Self::Cfi(cfi) => cfi.to_range(doc).map(AnchorPosition::Range),
            Self::Fragment(id) => fragment_element(doc, id).and_then(|el| node_range(doc, el)),
        }
    }

    /// The anchor as a range, when it points at content.
    pub fn to_range(&self, doc: &Document) -> Option<Range> {
        match self.resolve(doc)? {
            AnchorPosition::Range(range) => Some(range),
            AnchorPosition::Fraction(_) => None,
        }
    }
}

fn node_range(doc: &Document, node: NodeId) -> Option<AnchorPosition> {
    let range = if doc.is_text(node) {
        Range::collapsed(Point::new(node, 0))
    } else {
        Range::select_node(doc, node)?
    };
    Some(AnchorPosition::Range(range))
}

/// Element by id, falling back to a `name` attribute.
pub fn fragment_element(doc: &Document, fragment: &str) -> Option<NodeId> {
    if fragment.is_empty() {
        return None;
    }
    doc.element_by_id(fragment).or_else(|| {
        doc.descendants(doc.root())
            .find(|&n| doc.attr(n, "name") == Some(fragment))
    })
}

/// A navigation target mapped onto the book.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolved {
    pub index: usize,
    pub anchor: Anchor,
    /// Select the anchor range once it is shown.
    pub select: bool,
}

impl Resolved {
    pub fn new(index: usize, anchor: Anchor) -> Self {
        Self {
            index,
            anchor,
            select: false,
        }
    }

    pub fn section(index: usize) -> Self {
        Self::new(index, Anchor::Start)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    Next,
    Prev,
}

/// Page turn for a left arrow: backwards in left-to-right books.
pub fn go_left(rtl: bool) -> Turn {
    if rtl { Turn::Next } else { Turn::Prev }
}

pub fn go_right(rtl: bool) -> Turn {
    if rtl { Turn::Prev } else { Turn::Next }
}

/// Proof that a navigation was started; redeemed with [`NavGuard::finish`].
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    key: String,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Serializes navigations: the newest ticket wins, and a request for the
/// destination already pending is dropped.
///
/// [`View`](crate::view::View) begins and finishes a ticket within one
/// `&mut self` call, and event listeners receive only the event, never the
/// view. A second navigation therefore cannot start while one is in flight
/// there, and the guard is always released by the time `go_to` returns.
/// Hosts that resolve sections asynchronously hold tickets across their own
/// loads and rely on the supersede rule.
#[derive(Debug, Default)]
pub struct NavGuard {
    latest: u64,
    pending: Option<String>,
}

impl NavGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a navigation, or returns `None` if the same destination is
    /// already in flight.
    pub fn begin(&mut self, key: &str) -> Option<Ticket> {
        if self.pending.as_deref() == Some(key) {
            return None;
        }
        self.latest += 1;
        self.pending = Some(key.to_string());
        Some(Ticket {
            id: self.latest,
            key: key.to_string(),
        })
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.id == self.latest
    }

    /// Ends a navigation. Returns whether its result may still be applied.
    pub fn finish(&mut self, ticket: Ticket) -> bool {
        let current = self.is_current(&ticket);
        if current {
            self.pending = None;
        }
        current
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    #[test]
    fn test_bookmark_target_wire_format() {
        let target: BookmarkTarget =
            serde_json::from_str(r#"{"type":"cfi","value":"epubcfi(/6/4!/4/2)"}"#).unwrap();
        assert_eq!(target, BookmarkTarget::Cfi("epubcfi(/6/4!/4/2)".into()));
        let page: BookmarkTarget = serde_json::from_str(r#"{"type":"page","value":3}"#).unwrap();
        assert_eq!(Target::from(&page), Target::Index(3));
        let json = serde_json::to_string(&BookmarkTarget::Fraction(0.5)).unwrap();
        assert_eq!(json, r#"{"type":"fraction","value":0.5}"#);
    }

    #[test]
    fn test_target_forms() {
        let bare: Target = serde_json::from_str("2").unwrap();
        assert_eq!(bare, Target::Index(2));
        let fraction: Target = serde_json::from_str(r#"{"fraction":0.25}"#).unwrap();
        assert_eq!(fraction.as_fraction(), Some(0.25));
        assert_eq!(Target::parse("40%"), Target::fraction(0.4));
        assert_eq!(Target::parse("0.5"), Target::fraction(0.5));
        assert_eq!(Target::parse("7"), Target::Index(7));
        assert_eq!(Target::parse("ch02.xhtml#s1"), Target::link("ch02.xhtml#s1"));
        assert_eq!(Target::parse("epubcfi(/6/2!/4)"), Target::link("epubcfi(/6/2!/4)"));
    }

    #[test]
    fn test_direction_is_mirrored() {
        assert_eq!(go_left(false), Turn::Prev);
        assert_eq!(go_right(false), Turn::Next);
        assert_eq!(go_left(true), Turn::Next);
        assert_eq!(go_right(true), Turn::Prev);
    }

    #[test]
    fn test_anchor_fragment_and_name() {
        let doc = parse_html(r#"<body><p id="a">x</p><a name="old">y</a></body>"#).unwrap();
        assert!(matches!(
            Anchor::Fragment("a".into()).resolve(&doc),
            Some(AnchorPosition::Range(_))
        ));
        assert!(Anchor::Fragment("old".into()).to_range(&doc).is_some());
        assert!(Anchor::Fragment("missing".into()).resolve(&doc).is_none());
        assert_eq!(Anchor::Start.resolve(&doc), Some(AnchorPosition::Fraction(0.0)));
    }

    #[test]
    fn test_guard_drops_duplicates_and_stale_results() {
        let mut guard = NavGuard::new();
        let first = guard.begin("a").unwrap();
        assert!(guard.begin("a").is_none());
        let second = guard.begin("b").unwrap();
        assert!(!guard.finish(first));
        assert!(guard.is_pending());
        assert!(guard.finish(second));
        assert!(!guard.is_pending());
        assert!(guard.begin("a").is_some());
    }
}
