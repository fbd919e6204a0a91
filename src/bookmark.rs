use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

use crate::events::Location;
use crate::navigation::{BookmarkTarget, Target};
use crate::view::View;

pub const SNIPPET_LENGTH: usize = 140;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub book_id: String,
    pub created_at: DateTime<Utc>,
    pub label: String,
    pub target: BookmarkTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// TOC labels from the outermost entry down to the bookmarked one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapter_path: Vec<String>,
}

impl Bookmark {
    /// Bookmark for what `view` currently shows.
    pub fn from_view(view: &View, book_id: &str) -> Option<Self> {
        let location = view.last_location()?;
        let toc_item = location.toc_item.as_ref();
        let target = if view.is_fixed_layout() {
            BookmarkTarget::Page(location.index)
        } else {
            BookmarkTarget::Cfi(location.cfi.clone())
        };
        let created_at = Utc::now();
        Some(Self {
            id: format!("{}-{}", created_at.timestamp_millis(), location.index),
            book_id: book_id.to_string(),
            created_at,
            label: toc_item
                .map(|item| item.label.clone())
                .unwrap_or_else(|| page_label(location)),
            target,
            snippet: visible_snippet(view, location),
            chapter_path: toc_item.map(|item| view.toc_path(item)).unwrap_or_default(),
        })
    }

    pub fn target(&self) -> Target {
        Target::from(&self.target)
    }
}

fn page_label(location: &Location) -> String {
    format!("Page {}", location.index + 1)
}

fn visible_snippet(view: &View, location: &Location) -> Option<String> {
    let contents = view.renderer()?.contents();
    let shown = contents.iter().find(|c| c.index == location.index)?;
    let doc = shown.doc;
    let nodes = match &location.range {
        Some(range) => range.text_nodes(doc),
        None => {
            let body = doc.body()?;
            doc.descendants(body).filter(|&n| doc.is_text(n)).collect()
        }
    };
    // The block holding the first visible words.
    let node = nodes
        .into_iter()
        .find(|&n| doc.text(n).is_some_and(|t| !t.trim().is_empty()))?;
    let text = doc.text_content(doc.parent(node).unwrap_or(node));
    let sentence = first_sentence(&text);
    (!sentence.is_empty()).then(|| clip_snippet(&sentence, SNIPPET_LENGTH))
}

/// Collapses whitespace and cuts after the first sentence terminator.
pub fn first_sentence(text: &str) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut end = text.len();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let closes = matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|(_, next)| *next == ' ');
        if closes || matches!(c, '。' | '！' | '？') {
            end = i + c.len_utf8();
            break;
        }
    }
    text[..end].to_string()
}

/// Clips to `max` graphemes, ending with an ellipsis when cut.
pub fn clip_snippet(text: &str, max: usize) -> String {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= max {
        return text.to_string();
    }
    let mut clipped = graphemes[..max.saturating_sub(1)].concat();
    clipped.truncate(clipped.trim_end().len());
    clipped.push('…');
    clipped
}

/// Last place read in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub target: BookmarkTarget,
    pub fraction: f64,
    pub updated_at: DateTime<Utc>,
}

impl ReadingPosition {
    pub fn from_location(location: &Location, fixed_layout: bool) -> Self {
        Self {
            target: if fixed_layout {
                BookmarkTarget::Page(location.index)
            } else {
                BookmarkTarget::Cfi(location.cfi.clone())
            },
            fraction: location.fraction,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Bookmarks {
    #[serde(default)]
    books: HashMap<String, Vec<Bookmark>>,
    #[serde(default)]
    positions: HashMap<String, ReadingPosition>,
    #[serde(skip)]
    file_path: Option<String>,
}

impl Bookmarks {
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn with_file(file_path: &str) -> Self {
        Self {
            file_path: Some(file_path.to_string()),
            ..Self::default()
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&str>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load bookmarks from {}: {}", path, e);
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let path = Path::new(file_path);
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut bookmarks: Self = serde_json::from_str(&content)?;
            bookmarks.file_path = Some(file_path.to_string());
            Ok(bookmarks)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if let Some(dir) = Path::new(path).parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save bookmarks: {}", e);
        }
    }

    /// Bookmarks of one book, newest first.
    pub fn for_book(&self, book_id: &str) -> &[Bookmark] {
        self.books.get(book_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Adds `bookmark`, replacing any earlier one at the same target.
    pub fn add(&mut self, bookmark: Bookmark) {
        let list = self.books.entry(bookmark.book_id.clone()).or_default();
        list.retain(|b| b.target != bookmark.target);
        list.insert(0, bookmark);
        self.persist();
    }

    pub fn remove(&mut self, book_id: &str, id: &str) -> Option<Bookmark> {
        let list = self.books.get_mut(book_id)?;
        let position = list.iter().position(|b| b.id == id)?;
        let removed = list.remove(position);
        if list.is_empty() {
            self.books.remove(book_id);
        }
        self.persist();
        Some(removed)
    }

    pub fn position(&self, book_id: &str) -> Option<&ReadingPosition> {
        self.positions.get(book_id)
    }

    pub fn update_position(&mut self, book_id: &str, position: ReadingPosition) {
        self.positions.insert(book_id.to_string(), position);
        self.persist();
    }

    pub fn get_most_recent(&self) -> Option<(&str, &ReadingPosition)> {
        self.positions
            .iter()
            .max_by_key(|(_, position)| position.updated_at)
            .map(|(book, position)| (book.as_str(), position))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Bookmark>)> {
        self.books.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TocItem;
    use crate::test_utils::test_helpers::{BookBuilder, SMALL_VIEWPORT};
    use crate::view::ViewOptions;
    use tempfile::TempDir;

    fn reading_view() -> View {
        let book = BookBuilder::new()
            .sections(2, 10)
            .toc(vec![
                TocItem::new("Part", "s0.xhtml").with_subitems(vec![TocItem::new("Chapter", "s1.xhtml")]),
            ])
            .build();
        let mut view = View::new(ViewOptions {
            viewport: SMALL_VIEWPORT,
            ..Default::default()
        });
        view.open(book);
        view.go_to(1);
        view
    }

    #[test]
    fn test_bookmark_from_view() {
        let view = reading_view();
        let bookmark = Bookmark::from_view(&view, "book").unwrap();
        assert_eq!(bookmark.label, "Chapter");
        assert_eq!(bookmark.chapter_path, ["Part", "Chapter"]);
        assert_eq!(bookmark.snippet.as_deref(), Some("Paragraph 0 of the chapter."));
        let BookmarkTarget::Cfi(cfi) = &bookmark.target else {
            panic!("expected a CFI target");
        };
        assert_eq!(Some(cfi), view.last_location().map(|l| &l.cfi));
    }

    #[test]
    fn test_page_label_without_toc() {
        let book = BookBuilder::new().page(None).page(None).build();
        let mut view = View::default();
        view.open(book);
        view.go_to(1);
        let bookmark = Bookmark::from_view(&view, "comic").unwrap();
        assert_eq!(bookmark.label, "Page 2");
        assert_eq!(bookmark.target, BookmarkTarget::Page(1));
        assert_eq!(bookmark.target(), Target::Index(1));
    }

    #[test]
    fn test_snippet_helpers() {
        assert_eq!(first_sentence("  One  two.\nThree. "), "One two.");
        assert_eq!(first_sentence("v1.2 is out! Yes"), "v1.2 is out!");
        assert_eq!(first_sentence("第一句。第二句。"), "第一句。");
        assert_eq!(first_sentence("no terminator"), "no terminator");

        let long = "word ".repeat(40);
        let clipped = clip_snippet(long.trim(), SNIPPET_LENGTH);
        assert!(clipped.ends_with('…'));
        assert!(clipped.chars().count() <= SNIPPET_LENGTH);
        assert_eq!(clip_snippet("short", SNIPPET_LENGTH), "short");
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/bookmarks.json");
        let path = path.to_str().unwrap();

        let view = reading_view();
        let mut store = Bookmarks::with_file(path);
        let first = Bookmark::from_view(&view, "book").unwrap();
        store.add(first.clone());
        store.add(Bookmark {
            id: "later".into(),
            target: BookmarkTarget::Fraction(0.9),
            ..first.clone()
        });
        // Same target replaces instead of duplicating.
        store.add(first.clone());
        store.update_position(
            "book",
            ReadingPosition::from_location(view.last_location().unwrap(), false),
        );

        let loaded = Bookmarks::load_from_file(path).unwrap();
        let ids: Vec<&str> = loaded.for_book("book").iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, [first.id.as_str(), "later"]);
        assert_eq!(loaded.get_most_recent().map(|(book, _)| book), Some("book"));
        assert!(loaded.for_book("other").is_empty());

        let mut loaded = loaded;
        assert!(loaded.remove("book", "later").is_some());
        assert!(loaded.remove("book", "later").is_none());
    }

    #[test]
    fn test_load_or_ephemeral_survives_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bookmarks.json");
        fs::write(&path, "not json").unwrap();
        let store = Bookmarks::load_or_ephemeral(path.to_str());
        assert!(store.iter().next().is_none());
        assert!(Bookmarks::load_or_ephemeral(None).save().is_ok());
    }
}
