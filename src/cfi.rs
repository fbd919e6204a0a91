//! EPUB canonical fragment identifiers.
//!
//! A CFI addresses markup structure, not pixels: every step counts element
//! children with even numbers and the runs of character data between them
//! with odd numbers, so the same string resolves to the same content after any
//! reflow. Text offsets count characters.
//!
//! ```text
//! epubcfi(/6/4[chap01]!/4/2/1:12)
//!         ^^^^^^^^^^^^ ^^^^^^^^^^^ in-document path
//!         spine step
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::dom::{Document, NodeId, Point, Range};
use crate::error::{ReaderError, Result};

static CFI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^epubcfi\((.*)\)$").expect("valid CFI regex"));

pub fn is_cfi(s: &str) -> bool {
    CFI_RE.is_match(s)
}

fn unwrap_cfi(s: &str) -> &str {
    CFI_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map_or(s, |m| m.as_str())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub id: Option<String>,
    pub offset: Option<usize>,
}

impl Step {
    pub fn element(index: usize, id: Option<&str>) -> Self {
        Self {
            index,
            id: id.map(str::to_string),
            offset: None,
        }
    }

    pub fn text(index: usize, offset: usize) -> Self {
        Self {
            index,
            id: None,
            offset: Some(offset),
        }
    }
}

pub type Path = Vec<Step>;

/// A parsed CFI: indirection segments plus an optional range tail.
///
/// For a point CFI the last segment of `parent` is the full path to the
/// point. For a range, `start` and `end` continue the last parent segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cfi {
    pub parent: Vec<Path>,
    pub range: Option<(Path, Path)>,
}

impl Cfi {
    pub fn parse(s: &str) -> Result<Self> {
        let inner = CFI_RE
            .captures(s)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ReaderError::InvalidCfi(s.to_string()))?
            .as_str();
        Parser::new(inner)
            .parse()
            .ok_or_else(|| ReaderError::InvalidCfi(s.to_string()))
    }

    pub fn is_range(&self) -> bool {
        self.range.is_some()
    }

    /// Splits off the first indirection segment (the spine step) and returns
    /// the remainder addressing content inside the section document, if any.
    pub fn split_base(&self) -> (Option<&Path>, Option<Cfi>) {
        let base = self.parent.first();
        if self.parent.len() <= 1 && self.range.is_none() {
            return (base, None);
        }
        let local = Cfi {
            parent: self.parent.iter().skip(1).cloned().collect(),
            range: self.range.clone(),
        };
        (base, Some(local))
    }

    /// CFI for a range in a section document, relative to its root element.
    pub fn from_range(doc: &Document, range: &Range) -> Option<Self> {
        let start = point_to_path(doc, range.start)?;
        if range.is_collapsed() {
            return Some(Self {
                parent: vec![start],
                range: None,
            });
        }
        let end = point_to_path(doc, range.end)?;
        let limit = start.len().min(end.len()).saturating_sub(1);
        let shared = start
            .iter()
            .zip(end.iter())
            .take(limit)
            .take_while(|(a, b)| a == b)
            .count();
        Some(Self {
            parent: vec![start[..shared].to_vec()],
            range: Some((start[shared..].to_vec(), end[shared..].to_vec())),
        })
    }

    pub fn from_point(doc: &Document, point: Point) -> Option<Self> {
        Self::from_range(doc, &Range::collapsed(point))
    }

    /// Resolves a document-relative CFI. Point CFIs give a collapsed range;
    /// a point addressing an element lands just before that element.
    pub fn to_range(&self, doc: &Document) -> Option<Range> {
        let prefix: &[Step] = self.parent.last().map_or(&[], Vec::as_slice);
        match &self.range {
            None => {
                let point = resolve_point(doc, prefix)?;
                Some(Range::collapsed(point))
            }
            Some((start, end)) => {
                let start: Path = prefix.iter().chain(start.iter()).cloned().collect();
                let end: Path = prefix.iter().chain(end.iter()).cloned().collect();
                Some(Range::new(
                    resolve_point(doc, &start)?,
                    resolve_point(doc, &end)?,
                ))
            }
        }
    }

    /// The element a point CFI addresses, when its last step is an element.
    pub fn to_element(&self, doc: &Document) -> Option<NodeId> {
        if self.range.is_some() {
            return None;
        }
        match resolve(doc, self.parent.last()?)? {
            Resolved::Element(el) => Some(el),
            Resolved::Point(_) => None,
        }
    }
}

impl FromStr for Cfi {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '^' | '[' | ']' | '(' | ')' | ',' | ';' | '=') {
            out.push('^');
        }
        out.push(c);
    }
    out
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[Step]) -> fmt::Result {
    for step in path {
        write!(f, "/{}", step.index)?;
        if let Some(id) = &step.id {
            write!(f, "[{}]", escape(id))?;
        }
        if let Some(offset) = step.offset {
            write!(f, ":{offset}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Cfi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epubcfi(")?;
        for (i, path) in self.parent.iter().enumerate() {
            if i > 0 {
                f.write_str("!")?;
            }
            write_path(f, path)?;
        }
        if let Some((start, end)) = &self.range {
            f.write_str(",")?;
            write_path(f, start)?;
            f.write_str(",")?;
            write_path(f, end)?;
        }
        f.write_str(")")
    }
}

/// Joins CFIs with indirection, e.g. a spine step and an in-document path.
pub fn join_indir(base: &str, part: &str) -> String {
    format!("epubcfi({}!{})", unwrap_cfi(base), unwrap_cfi(part))
}

/// Synthetic spine steps for books without intrinsic CFI bases.
pub mod fake {
    use super::Step;

    pub fn from_index(index: usize) -> String {
        format!("epubcfi(/6/{})", (index + 1) * 2)
    }

    pub fn to_index(path: &[Step]) -> Option<usize> {
        path.last().map(|step| (step.index / 2).saturating_sub(1))
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn parse(mut self) -> Option<Cfi> {
        let mut parent = vec![self.path()?];
        while self.chars.peek() == Some(&'!') {
            self.chars.next();
            parent.push(self.path()?);
        }
        let range = if self.chars.peek() == Some(&',') {
            self.chars.next();
            let start = self.path()?;
            self.expect(',')?;
            let end = self.path()?;
            Some((start, end))
        } else {
            None
        };
        if self.chars.next().is_some() {
            return None;
        }
        Some(Cfi { parent, range })
    }

    fn expect(&mut self, c: char) -> Option<()> {
        (self.chars.next()? == c).then_some(())
    }

    fn number(&mut self) -> Option<usize> {
        let mut digits = String::new();
        while let Some(c) = self.chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(c);
            self.chars.next();
        }
        digits.parse().ok()
    }

    /// Skips a decimal used by temporal and spatial offsets.
    fn skip_decimal(&mut self) {
        while self
            .chars
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.chars.next();
        }
    }

    fn bracket(&mut self) -> Option<String> {
        self.expect('[')?;
        let mut out = String::new();
        loop {
            match self.chars.next()? {
                '^' => out.push(self.chars.next()?),
                ']' => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn path(&mut self) -> Option<Path> {
        let mut path = Vec::new();
        while self.chars.peek() == Some(&'/') {
            self.chars.next();
            let mut step = Step {
                index: self.number()?,
                ..Step::default()
            };
            if self.chars.peek() == Some(&'[') {
                step.id = Some(self.bracket()?).filter(|id| !id.is_empty());
            }
            loop {
                match self.chars.peek() {
                    Some(':') => {
                        self.chars.next();
                        step.offset = Some(self.number()?);
                    }
                    Some('~') => {
                        self.chars.next();
                        self.skip_decimal();
                    }
                    Some('@') => {
                        self.chars.next();
                        self.skip_decimal();
                        self.expect(':')?;
                        self.skip_decimal();
                    }
                    // text location assertions after an offset carry no position
                    Some('[') => {
                        self.bracket()?;
                    }
                    _ => break,
                }
            }
            path.push(step);
        }
        Some(path)
    }
}

/// Element and character-data slots of an element's children.
struct ChildIndex {
    elements: Vec<NodeId>,
    chunks: Vec<Vec<NodeId>>,
}

impl ChildIndex {
    fn new(doc: &Document, parent: NodeId) -> Self {
        let mut elements = Vec::new();
        let mut chunks = Vec::new();
        let mut current = Vec::new();
        for &child in doc.children(parent) {
            if doc.is_element(child) {
                chunks.push(std::mem::take(&mut current));
                elements.push(child);
            } else if doc.is_text(child) {
                current.push(child);
            }
        }
        chunks.push(current);
        Self { elements, chunks }
    }

    fn element(&self, index: usize) -> Option<NodeId> {
        if index < 2 || index % 2 == 1 {
            return None;
        }
        self.elements.get(index / 2 - 1).copied()
    }

    fn chunk(&self, index: usize) -> Option<&[NodeId]> {
        if index % 2 == 0 {
            return None;
        }
        self.chunks.get((index - 1) / 2).map(Vec::as_slice)
    }

    fn index_of_element(&self, node: NodeId) -> Option<usize> {
        self.elements.iter().position(|&e| e == node).map(|i| (i + 1) * 2)
    }

    /// Slot index of a text node plus the characters preceding it in its chunk.
    fn index_of_text(&self, doc: &Document, node: NodeId) -> Option<(usize, usize)> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            let mut before = 0;
            for &text in chunk {
                if text == node {
                    return Some((i * 2 + 1, before));
                }
                before += doc.node_length(text);
            }
        }
        None
    }
}

fn element_path(doc: &Document, el: NodeId) -> Option<Path> {
    if Some(el) == doc.document_element() {
        return Some(Vec::new());
    }
    let parent = doc.parent(el)?;
    let index = ChildIndex::new(doc, parent).index_of_element(el)?;
    let mut path = element_path(doc, parent)?;
    path.push(Step::element(index, doc.attr(el, "id").filter(|id| !id.is_empty())));
    Some(path)
}

fn point_to_path(doc: &Document, point: Point) -> Option<Path> {
    if doc.is_text(point.node) {
        let parent = doc.parent(point.node)?;
        let (index, before) = ChildIndex::new(doc, parent).index_of_text(doc, point.node)?;
        let mut path = element_path(doc, parent)?;
        path.push(Step::text(index, before + point.offset));
        return Some(path);
    }
    if !doc.is_element(point.node) {
        return None;
    }
    // Between children: address the character-data slot at that position.
    let children = doc.children(point.node);
    let mut elements = 0;
    let mut chars = 0;
    for &child in children.iter().take(point.offset) {
        if doc.is_element(child) {
            elements += 1;
            chars = 0;
        } else if doc.is_text(child) {
            chars += doc.node_length(child);
        }
    }
    let mut path = element_path(doc, point.node)?;
    path.push(Step::text(elements * 2 + 1, chars));
    Some(path)
}

enum Resolved {
    Element(NodeId),
    Point(Point),
}

fn resolve(doc: &Document, path: &[Step]) -> Option<Resolved> {
    let (last, steps) = path.split_last()?;
    let mut node = doc.document_element()?;
    for step in steps {
        node = ChildIndex::new(doc, node)
            .element(step.index)
            .or_else(|| step.id.as_deref().and_then(|id| doc.element_by_id(id)))?;
    }

    if let Some(el) = last.id.as_deref().and_then(|id| doc.element_by_id(id)) {
        if last.index % 2 == 0 {
            return Some(Resolved::Element(el));
        }
    }

    let index = ChildIndex::new(doc, node);
    if let Some(el) = index.element(last.index) {
        return Some(Resolved::Element(el));
    }
    let chunk = index.chunk(last.index)?;
    let mut offset = last.offset.unwrap_or(0);
    for (i, &text) in chunk.iter().enumerate() {
        let len = doc.node_length(text);
        if offset <= len || i == chunk.len() - 1 {
            return Some(Resolved::Point(Point::new(text, offset.min(len))));
        }
        offset -= len;
    }
    // Empty slot: the position between the neighbouring elements.
    let slot = (last.index - 1) / 2;
    let position = match index.elements.get(slot) {
        Some(&next) => doc.index_in_parent(next)?,
        None => doc.children(node).len(),
    };
    Some(Resolved::Point(Point::new(node, position)))
}

fn resolve_point(doc: &Document, path: &[Step]) -> Option<Point> {
    match resolve(doc, path)? {
        Resolved::Point(point) => Some(point),
        Resolved::Element(el) => Point::before(doc, el),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    const CHAPTER: &str = r#"<html><head><title>t</title></head><body>
<h1 id="top">Chapter One</h1>
<p>First paragraph with <em>emphasis</em> inside.</p>
<p id="second">Second paragraph.</p>
</body></html>"#;

    fn text_in(doc: &Document, id: &str) -> NodeId {
        let el = doc.element_by_id(id).unwrap();
        doc.descendants(el).find(|&n| doc.is_text(n)).unwrap()
    }

    #[test]
    fn test_parse_and_display_round_trip() {
        for s in [
            "epubcfi(/6/4[chap01ref]!/4[body01]/10[para05]/3:10)",
            "epubcfi(/6/4!/4/2,/1:0,/1:5)",
            "epubcfi(/6/14)",
        ] {
            assert_eq!(Cfi::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Cfi::parse("/6/4").is_err());
        assert!(Cfi::parse("epubcfi(/6/x)").is_err());
        assert!(Cfi::parse("epubcfi(/6/4,/1:0)").is_err());
    }

    #[test]
    fn test_parse_skips_temporal_and_assertions() {
        let cfi = Cfi::parse("epubcfi(/6/4!/4/2/1:3[Chapter,One]~2.5)").unwrap();
        let last = cfi.parent[1].last().unwrap();
        assert_eq!(last.offset, Some(3));
        assert_eq!(last.id, None);
    }

    #[test]
    fn test_escaped_ids() {
        let cfi = Cfi {
            parent: vec![vec![Step::element(4, Some("a[1]"))]],
            range: None,
        };
        let s = cfi.to_string();
        assert_eq!(s, "epubcfi(/4[a^[1^]])");
        assert_eq!(Cfi::parse(&s).unwrap(), cfi);
    }

    #[test]
    fn test_text_point_round_trip() {
        let doc = parse_html(CHAPTER).unwrap();
        let text = text_in(&doc, "second");
        let point = Point::new(text, 7);
        let cfi = Cfi::from_point(&doc, point).unwrap();
        assert_eq!(cfi.to_string(), "epubcfi(/4/6[second]/1:7)");
        let range = cfi.to_range(&doc).unwrap();
        assert_eq!(range.start, point);
        assert!(range.is_collapsed());
    }

    #[test]
    fn test_range_round_trip_across_elements() {
        let doc = parse_html(CHAPTER).unwrap();
        let first = doc.elements_by_name("p").next().unwrap();
        let texts: Vec<_> = doc.descendants(first).filter(|&n| doc.is_text(n)).collect();
        let range = Range::new(Point::new(texts[0], 6), Point::new(texts[2], 3));
        let cfi = Cfi::from_range(&doc, &range).unwrap();
        assert!(cfi.is_range());
        let s = cfi.to_string();
        let back = Cfi::parse(&s).unwrap().to_range(&doc).unwrap();
        assert_eq!(back, range);
        assert_eq!(back.to_text(&doc), "paragraph with emphasis in");
    }

    #[test]
    fn test_cfi_survives_reparse() {
        let doc = parse_html(CHAPTER).unwrap();
        let text = text_in(&doc, "top");
        let cfi = Cfi::from_point(&doc, Point::new(text, 8)).unwrap().to_string();

        let fresh = parse_html(CHAPTER).unwrap();
        let range = Cfi::parse(&cfi).unwrap().to_range(&fresh).unwrap();
        assert_eq!(range.to_text(&fresh), "");
        assert_eq!(fresh.text(range.start.node), Some("Chapter One"));
        assert_eq!(range.start.offset, 8);
    }

    #[test]
    fn test_element_step_resolves_before_element() {
        let doc = parse_html(CHAPTER).unwrap();
        let cfi = Cfi::parse("epubcfi(/4/6)").unwrap();
        let second = doc.element_by_id("second").unwrap();
        assert_eq!(cfi.to_element(&doc), Some(second));
        let range = cfi.to_range(&doc).unwrap();
        assert_eq!(range.start, Point::before(&doc, second).unwrap());
    }

    #[test]
    fn test_id_assertion_wins_over_stale_index() {
        let doc = parse_html(CHAPTER).unwrap();
        let cfi = Cfi::parse("epubcfi(/4/40[second])").unwrap();
        assert_eq!(cfi.to_element(&doc), doc.element_by_id("second"));
    }

    #[test]
    fn test_container_point_uses_odd_slot() {
        let doc = parse_html("<body><p>a</p><p>b</p></body>").unwrap();
        let body = doc.body().unwrap();
        let point = Point::new(body, 1);
        let cfi = Cfi::from_point(&doc, point).unwrap();
        assert_eq!(cfi.to_string(), "epubcfi(/4/3:0)");
        assert_eq!(cfi.to_range(&doc).unwrap().start, point);
    }

    #[test]
    fn test_join_and_split_base() {
        let joined = join_indir(&fake::from_index(2), "epubcfi(/4/2/1:3)");
        assert_eq!(joined, "epubcfi(/6/6!/4/2/1:3)");
        let cfi = Cfi::parse(&joined).unwrap();
        let (base, local) = cfi.split_base();
        assert_eq!(fake::to_index(base.unwrap()), Some(2));
        assert_eq!(local.unwrap().to_string(), "epubcfi(/4/2/1:3)");

        let bare = Cfi::parse(&fake::from_index(0)).unwrap();
        assert!(bare.split_base().1.is_none());
    }

    #[test]
    fn test_is_cfi() {
        assert!(is_cfi("epubcfi(/6/2)"));
        assert!(!is_cfi("chapter1.xhtml#p3"));
    }
}
