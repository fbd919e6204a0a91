use std::cmp::Ordering;

use crate::dom::{Document, NodeData, NodeId, Point, Range};

/// Per-node decision while walking, mirroring a DOM node filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Accept,
    /// Do not emit the node but walk its children.
    Skip,
    /// Do not emit the node nor anything below it.
    Reject,
}

pub type NodeFilter = fn(&Document, NodeId) -> Filter;

/// Emits text, skips into elements, and drops `<script>`/`<style>` subtrees.
pub fn accept_text(doc: &Document, node: NodeId) -> Filter {
    match doc.data(node) {
        NodeData::Text(_) => Filter::Accept,
        NodeData::Element { name, .. } if name == "script" || name == "style" => Filter::Reject,
        _ => Filter::Skip,
    }
}

/// Where to collect text from.
#[derive(Clone, Copy, Debug)]
pub enum Scope<'a> {
    Document,
    Node(NodeId),
    Range(&'a Range),
}

/// Flattened text of a scope: the strings of the accepted nodes, and the
/// nodes themselves so string positions can be turned back into ranges.
#[derive(Clone, Debug, Default)]
pub struct TextWalk {
    pub nodes: Vec<NodeId>,
    pub strings: Vec<String>,
}

impl TextWalk {
    pub fn new(doc: &Document, scope: Scope<'_>, filter: NodeFilter) -> Self {
        let nodes = match scope {
            Scope::Document => match doc.body() {
                Some(body) => walk(doc, body, filter),
                None => Vec::new(),
            },
            Scope::Node(root) => walk(doc, root, filter),
            Scope::Range(range) => walk_range(doc, range, filter),
        };
        let strings = nodes
            .iter()
            .map(|&n| doc.text(n).unwrap_or_default().to_string())
            .collect();
        Self { nodes, strings }
    }

    /// Maps `(string index, char offset)` pairs back onto the document.
    pub fn make_range(
        &self,
        start_index: usize,
        start_offset: usize,
        end_index: usize,
        end_offset: usize,
    ) -> Option<Range> {
        Some(Range::new(
            Point::new(*self.nodes.get(start_index)?, start_offset),
            Point::new(*self.nodes.get(end_index)?, end_offset),
        ))
    }
}

/// Accepted nodes strictly below `root`.
fn walk(doc: &Document, root: NodeId, filter: NodeFilter) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = doc.children(root).iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        match filter(doc, node) {
            Filter::Reject => continue,
            Filter::Accept => out.push(node),
            Filter::Skip => {}
        }
        stack.extend(doc.children(node).iter().rev().copied());
    }
    out
}

/// Accepted nodes, starting at the common ancestor, whose start lies inside
/// the range. The walk stops at the first node past the range end.
fn walk_range(doc: &Document, range: &Range, filter: NodeFilter) -> Vec<NodeId> {
    let root = range.common_ancestor(doc);
    let candidates = match filter(doc, root) {
        Filter::Accept => std::iter::once(root).chain(walk(doc, root, filter)).collect(),
        Filter::Skip => walk(doc, root, filter),
        Filter::Reject => Vec::new(),
    };
    let mut out = Vec::new();
    for node in candidates {
        match range.compare_point(doc, node, 0) {
            Ordering::Equal => out.push(node),
            Ordering::Greater => break,
            Ordering::Less => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    const MARKUP: &str = "<html><head><style>p { color: red }</style></head>\
        <body><p>One <em>two</em></p><script>var x = 1;</script><p>three</p></body></html>";

    #[test]
    fn test_document_walk_skips_script_and_style() {
        let doc = parse_html(MARKUP).unwrap();
        let walk = TextWalk::new(&doc, Scope::Document, accept_text);
        assert_eq!(walk.strings, vec!["One ", "two", "three"]);
    }

    #[test]
    fn test_range_walk_and_make_range() {
        let doc = parse_html(MARKUP).unwrap();
        let all = TextWalk::new(&doc, Scope::Document, accept_text);
        let range = Range::new(Point::new(all.nodes[1], 0), Point::new(all.nodes[2], 5));
        let walk = TextWalk::new(&doc, Scope::Range(&range), accept_text);
        assert_eq!(walk.strings, vec!["two", "three"]);

        let made = walk.make_range(0, 1, 1, 2).unwrap();
        assert_eq!(made.start, Point::new(all.nodes[1], 1));
        assert_eq!(made.end, Point::new(all.nodes[2], 2));
        assert!(walk.make_range(5, 0, 5, 1).is_none());
    }
}
