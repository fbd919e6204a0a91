use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId, Range};

/// A TOC or page-list entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TocItem {
    #[serde(default)]
    pub id: usize,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subitems: Vec<TocItem>,
}

impl TocItem {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: Some(href.into()),
            ..Default::default()
        }
    }

    pub fn with_subitems(mut self, subitems: Vec<TocItem>) -> Self {
        self.subitems = subitems;
        self
    }
}

/// Assigns sequential ids in preorder.
pub fn assign_ids(items: &mut [TocItem]) {
    fn walk(items: &mut [TocItem], next: &mut usize) {
        for item in items {
            item.id = *next;
            *next += 1;
            walk(&mut item.subitems, next);
        }
    }
    let mut next = 0;
    walk(items, &mut next);
}

/// Preorder flattening, each entry paired with its parent's position.
pub fn flatten(items: &[TocItem]) -> Vec<(TocItem, Option<usize>)> {
    fn walk(items: &[TocItem], parent: Option<usize>, out: &mut Vec<(TocItem, Option<usize>)>) {
        for item in items {
            let position = out.len();
            let mut entry = item.clone();
            entry.subitems.clear();
            out.push((entry, parent));
            walk(&item.subitems, Some(position), out);
        }
    }
    let mut out = Vec::new();
    walk(items, None, &mut out);
    out
}

pub type SplitHref = Box<dyn Fn(&str) -> Option<(String, Option<String>)>>;
pub type FragmentResolver = Box<dyn Fn(&Document, &str) -> Option<NodeId>>;

#[derive(Debug, Default)]
struct Group {
    prev: Option<usize>,
    items: Vec<(usize, Option<String>)>,
}

/// Finds the TOC (or page-list) entry that a position falls under.
///
/// Entries are grouped per section so a lookup only compares the entries of
/// the section being read. Sections without entries of their own share the
/// group of the section before them.
pub struct TocProgress {
    entries: Vec<(TocItem, Option<usize>)>,
    groups: Vec<Group>,
    by_section: Vec<Option<usize>>,
    get_fragment: FragmentResolver,
}

impl std::fmt::Debug for TocProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TocProgress")
            .field("entries", &self.entries.len())
            .field("groups", &self.groups)
            .finish()
    }
}

impl TocProgress {
    /// `items` must already carry ids (see [`assign_ids`]); `section_ids` is
    /// the book's full reading order.
    pub fn new(
        items: &[TocItem],
        section_ids: &[String],
        split_href: impl Fn(&str) -> Option<(String, Option<String>)>,
        get_fragment: FragmentResolver,
    ) -> Self {
        let entries = flatten(items);
        let mut groups: Vec<Group> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for (position, (item, _)) in entries.iter().enumerate() {
            let Some((id, fragment)) = item.href.as_deref().and_then(&split_href) else {
                continue;
            };
            let group = *by_id.entry(id).or_insert_with(|| {
                groups.push(Group {
                    prev: position.checked_sub(1),
                    items: Vec::new(),
                });
                groups.len() - 1
            });
            groups[group].items.push((position, fragment));
        }

        let mut by_section: Vec<Option<usize>> = Vec::with_capacity(section_ids.len());
        for id in section_ids {
            let group = by_id
                .get(id)
                .copied()
                .or_else(|| by_section.last().copied().flatten());
            by_section.push(group);
        }

        Self {
            entries,
            groups,
            by_section,
            get_fragment,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TocItem> {
        self.entries.iter().map(|(item, _)| item)
    }

    /// Labels from the outermost ancestor down to the entry itself.
    pub fn path_of(&self, id: usize) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = self.entries.iter().position(|(item, _)| item.id == id);
        while let Some(position) = cursor {
            let (item, parent) = &self.entries[position];
            path.push(item.label.clone());
            cursor = *parent;
        }
        path.reverse();
        path
    }

    /// The entry covering `range` in section `index`, or the section's first
    /// entry when no range is known.
    pub fn get_progress(&self, index: usize, range: Option<(&Document, &Range)>) -> Option<&TocItem> {
        let group = &self.groups[(*self.by_section.get(index)?)?];
        let prev = group.prev.map(|p| &self.entries[p].0);
        let Some((first, first_fragment)) = group.items.first().map(|(p, f)| (*p, f)) else {
            return prev;
        };
        let item = |position: usize| &self.entries[position].0;
        let Some((doc, range)) = range else {
            return Some(item(first));
        };
        if group.items.len() == 1 && first_fragment.is_none() {
            return Some(item(first));
        }

        for (i, (_, fragment)) in group.items.iter().enumerate() {
            let Some(element) = (self.get_fragment)(doc, fragment.as_deref().unwrap_or_default())
            else {
                continue;
            };
            if range.compare_point(doc, element, 0) == Ordering::Greater {
                return match i.checked_sub(1) {
                    Some(before) => Some(item(group.items[before].0)),
                    None => prev,
                };
            }
        }
        group.items.last().map(|&(position, _)| item(position))
    }
}
