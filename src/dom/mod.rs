//! Arena document model.
//!
//! Section documents are parsed into a flat node arena addressed by [`NodeId`].
//! Everything downstream (layout, CFI, search, overlays) talks about positions
//! as boundary points into this tree, the same way a browser range does.

mod parse;
mod range;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub use parse::{parse_html, parse_markup, parse_xml};
pub use range::{Point, Range};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Element {
            name: name.to_string(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    /// Appends a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.nodes[child.0].parent.is_none());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn append_element(&mut self, parent: NodeId, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(name);
        for (key, value) in attrs {
            self.set_attr(id, key, value);
        }
        self.append_child(parent, id);
        id
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.create_text(text);
        self.append_child(parent, id);
        id
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Element { .. })
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.data(id), NodeData::Text(_))
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match self.data(id) {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            match attrs.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((key.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, key: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            attrs.retain(|(k, _)| k != key);
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id) {
            NodeData::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// DOM node length: characters for text/comment nodes, child count otherwise.
    pub fn node_length(&self, id: NodeId) -> usize {
        match self.data(id) {
            NodeData::Text(text) | NodeData::Comment(text) => text.chars().count(),
            _ => self.children(id).len(),
        }
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&c| self.is_element(c))
    }

    /// `<body>` if present, otherwise the document element.
    pub fn body(&self) -> Option<NodeId> {
        let root = self.document_element()?;
        self.descendants(root)
            .find(|&n| self.local_name(n) == Some("body"))
            .or(Some(root))
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .find(|&n| self.attr(n, "id") == Some(id))
    }

    pub fn first_element_by_name(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .find(|&n| self.local_name(n) == Some(name))
    }

    pub fn elements_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.descendants(self.root())
            .filter(move |&n| self.local_name(n) == Some(name))
    }

    /// Preorder walk below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let stack = self.children(id).iter().rev().copied().collect();
        Descendants { doc: self, stack }
    }

    /// Ancestors from the parent up to the document node.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// True if `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|a| a == ancestor)
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.descendants(id)
            .filter_map(|n| self.text(n))
            .collect()
    }

    fn path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path: Vec<NodeId> = self.ancestors(id).collect();
        path.reverse();
        path.push(id);
        path
    }

    /// Preorder (document) order of two nodes.
    pub fn tree_order(&self, a: NodeId, b: NodeId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let path_a = self.path_from_root(a);
        let path_b = self.path_from_root(b);
        let shared = path_a
            .iter()
            .zip(path_b.iter())
            .take_while(|(x, y)| x == y)
            .count();
        match (path_a.get(shared), path_b.get(shared)) {
            (None, _) => Ordering::Less,
            (_, None) => Ordering::Greater,
            (Some(&x), Some(&y)) => {
                let ix = self.index_in_parent(x).unwrap_or(0);
                let iy = self.index_in_parent(y).unwrap_or(0);
                ix.cmp(&iy)
            }
        }
    }

    /// Orders two boundary points following the DOM range rules.
    pub fn compare_points(&self, a: Point, b: Point) -> Ordering {
        if a.node == b.node {
            return a.offset.cmp(&b.offset);
        }
        if self.tree_order(a.node, b.node) == Ordering::Greater {
            return self.compare_points(b, a).reverse();
        }
        if self.is_ancestor(a.node, b.node) {
            let child = self
                .ancestors(b.node)
                .chain(std::iter::once(b.node))
                .find(|&n| self.parent(n) == Some(a.node));
            if let Some(child) = child {
                if self.index_in_parent(child).unwrap_or(0) < a.offset {
                    return Ordering::Greater;
                }
            }
        }
        Ordering::Less
    }

    pub fn lang(&self) -> Option<&str> {
        let root = self.document_element()?;
        self.attr(root, "lang")
            .or_else(|| self.attr(root, "xml:lang"))
            .filter(|l| !l.is_empty())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_element().is_none()
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Slices a string by char indices, clamping to the string length.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte = |n: usize| s.char_indices().nth(n).map(|(b, _)| b).unwrap_or(s.len());
    let (start, end) = (byte(start), byte(end.max(start)));
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        let html = doc.append_element(root, "html", &[]);
        let body = doc.append_element(html, "body", &[]);
        let p1 = doc.append_element(body, "p", &[("id", "first")]);
        doc.append_text(p1, "Hello");
        let p2 = doc.append_element(body, "p", &[]);
        let t2 = doc.append_text(p2, "World");
        (doc, body, p1, t2)
    }

    #[test]
    fn test_tree_order_and_lookup() {
        let (doc, body, p1, t2) = sample();
        assert_eq!(doc.element_by_id("first"), Some(p1));
        assert_eq!(doc.body(), Some(body));
        assert_eq!(doc.tree_order(p1, t2), Ordering::Less);
        assert_eq!(doc.tree_order(t2, p1), Ordering::Greater);
        assert_eq!(doc.tree_order(body, p1), Ordering::Less);
        assert_eq!(doc.text_content(body), "HelloWorld");
    }

    #[test]
    fn test_compare_points_parent_offsets() {
        let (doc, body, p1, _t2) = sample();
        // (body, 1) sits between the two paragraphs
        let between = Point::new(body, 1);
        let inside_first = Point::new(p1, 0);
        assert_eq!(doc.compare_points(between, inside_first), Ordering::Greater);
        assert_eq!(doc.compare_points(Point::new(body, 0), inside_first), Ordering::Less);
    }

    #[test]
    fn test_char_slice_handles_multibyte() {
        assert_eq!(char_slice("héllo", 1, 3), "él");
        assert_eq!(char_slice("abc", 2, 10), "c");
        assert_eq!(char_slice("abc", 5, 1), "");
    }
}
