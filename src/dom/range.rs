use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{Document, NodeId, char_slice};

/// A boundary point: a node plus an offset into it.
///
/// For text nodes the offset counts characters; for every other node it counts
/// children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub node: NodeId,
    pub offset: usize,
}

impl Point {
    pub const fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    pub fn before(doc: &Document, node: NodeId) -> Option<Self> {
        let parent = doc.parent(node)?;
        Some(Self::new(parent, doc.index_in_parent(node)?))
    }

    pub fn after(doc: &Document, node: NodeId) -> Option<Self> {
        let parent = doc.parent(node)?;
        Some(Self::new(parent, doc.index_in_parent(node)? + 1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Point,
    pub end: Point,
}

impl Range {
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub const fn collapsed(point: Point) -> Self {
        Self {
            start: point,
            end: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    pub fn select_node_contents(doc: &Document, node: NodeId) -> Self {
        Self::new(Point::new(node, 0), Point::new(node, doc.node_length(node)))
    }

    pub fn select_node(doc: &Document, node: NodeId) -> Option<Self> {
        Some(Self::new(Point::before(doc, node)?, Point::after(doc, node)?))
    }

    /// Where a point lies relative to this range: `Less` before the start,
    /// `Greater` after the end, `Equal` inside (boundaries included).
    pub fn compare_point(&self, doc: &Document, node: NodeId, offset: usize) -> Ordering {
        let point = Point::new(node, offset);
        if doc.compare_points(point, self.start) == Ordering::Less {
            Ordering::Less
        } else if doc.compare_points(point, self.end) == Ordering::Greater {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    pub fn contains_point(&self, doc: &Document, point: Point) -> bool {
        self.compare_point(doc, point.node, point.offset) == Ordering::Equal
    }

    pub fn intersects_node(&self, doc: &Document, node: NodeId) -> bool {
        let (Some(before), Some(after)) = (Point::before(doc, node), Point::after(doc, node))
        else {
            return true;
        };
        doc.compare_points(before, self.end) == Ordering::Less
            && doc.compare_points(after, self.start) == Ordering::Greater
    }

    /// Deepest node containing both boundary points.
    pub fn common_ancestor(&self, doc: &Document) -> NodeId {
        let mut candidates = std::iter::once(self.start.node).chain(doc.ancestors(self.start.node));
        candidates
            .find(|&n| n == self.end.node || doc.is_ancestor(n, self.end.node))
            .unwrap_or_else(|| doc.root())
    }

    /// Text nodes touched by the range, in document order.
    pub fn text_nodes(&self, doc: &Document) -> Vec<NodeId> {
        let ancestor = self.common_ancestor(doc);
        std::iter::once(ancestor)
            .chain(doc.descendants(ancestor))
            .filter(|&n| doc.is_text(n))
            .filter(|&n| {
                let len = doc.node_length(n);
                doc.compare_points(Point::new(n, len), self.start) != Ordering::Less
                    && doc.compare_points(Point::new(n, 0), self.end) != Ordering::Greater
            })
            .collect()
    }

    /// Concatenated text covered by the range.
    pub fn to_text(&self, doc: &Document) -> String {
        let mut out = String::new();
        for node in self.text_nodes(doc) {
            let text = doc.text(node).unwrap_or_default();
            let len = text.chars().count();
            let from = if node == self.start.node {
                self.start.offset
            } else {
                0
            };
            let to = if node == self.end.node {
                self.end.offset
            } else {
                len
            };
            out.push_str(char_slice(text, from, to));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_paragraphs() -> (Document, Vec<NodeId>) {
        let mut doc = Document::new();
        let root = doc.root();
        let html = doc.append_element(root, "html", &[]);
        let body = doc.append_element(html, "body", &[]);
        let mut texts = Vec::new();
        for word in ["alpha", "beta", "gamma"] {
            let p = doc.append_element(body, "p", &[]);
            texts.push(doc.append_text(p, word));
        }
        (doc, texts)
    }

    #[test]
    fn test_compare_point() {
        let (doc, texts) = doc_with_paragraphs();
        let range = Range::new(Point::new(texts[1], 1), Point::new(texts[1], 3));
        assert_eq!(range.compare_point(&doc, texts[0], 0), Ordering::Less);
        assert_eq!(range.compare_point(&doc, texts[1], 2), Ordering::Equal);
        assert_eq!(range.compare_point(&doc, texts[2], 0), Ordering::Greater);
        let p3 = doc.parent(texts[2]).unwrap();
        assert_eq!(range.compare_point(&doc, p3, 0), Ordering::Greater);
    }

    #[test]
    fn test_range_text_across_nodes() {
        let (doc, texts) = doc_with_paragraphs();
        let range = Range::new(Point::new(texts[0], 3), Point::new(texts[2], 2));
        assert_eq!(range.to_text(&doc), "habetaga");
        assert_eq!(range.text_nodes(&doc).len(), 3);
    }

    #[test]
    fn test_intersects_node() {
        let (doc, texts) = doc_with_paragraphs();
        let range = Range::new(Point::new(texts[1], 0), Point::new(texts[1], 4));
        let p1 = doc.parent(texts[0]).unwrap();
        let p2 = doc.parent(texts[1]).unwrap();
        assert!(!range.intersects_node(&doc, p1));
        assert!(range.intersects_node(&doc, p2));
    }
}
