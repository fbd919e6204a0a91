//! Source classification and the built-in loaders.
//!
//! Container formats (EPUB, MOBI, FB2, PDF, comic archives) are parsed by
//! external handlers; this module only decides which one a source needs, and
//! loads the two shapes the engine can read directly: a directory of section
//! files and a single HTML file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::book::{Book, FileContent, ImageContent, Metadata, Rendition, Section};
use crate::dom::Document;
use crate::error::{ReaderError, Result};
use crate::progress::TocItem;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF-";
const MOBI_MAGIC: &[u8] = b"BOOKMOBI";
const MOBI_OFFSET: usize = 60;
/// Bytes of the file head needed by every sniff.
pub const PROBE_LEN: usize = MOBI_OFFSET + MOBI_MAGIC.len();

const MARKUP_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "svg"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatKind {
    /// An unpacked book directory.
    Directory,
    Epub,
    Cbz,
    Fbz,
    Pdf,
    Mobi,
    Fb2,
    Html,
}

/// What is known about a source before opening it.
#[derive(Clone, Debug, Default)]
pub struct FileProbe {
    pub name: String,
    pub mime: Option<String>,
    pub is_dir: bool,
    pub size: u64,
    /// The first [`PROBE_LEN`] bytes, or fewer for short files.
    pub head: Vec<u8>,
}

impl FileProbe {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let meta = std::fs::metadata(path)
            .map_err(|e| ReaderError::NotFound(format!("{}: {e}", path.display())))?;
        if meta.is_dir() {
            return Ok(Self {
                name,
                is_dir: true,
                ..Default::default()
            });
        }
        let mut head = Vec::with_capacity(PROBE_LEN);
        File::open(path)?
            .take(PROBE_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(Self {
            name,
            mime: None,
            is_dir: false,
            size: meta.len(),
            head,
        })
    }

    fn has_type(&self, mime: &str) -> bool {
        self.mime.as_deref() == Some(mime)
    }

    fn name_ends_with(&self, suffix: &str) -> bool {
        self.name.to_ascii_lowercase().ends_with(suffix)
    }

    fn is_cbz(&self) -> bool {
        self.has_type("application/vnd.comicbook+zip") || self.name_ends_with(".cbz")
    }

    fn is_fbz(&self) -> bool {
        self.has_type("application/x-zip-compressed-fb2")
            || self.name_ends_with(".fb2.zip")
            || self.name_ends_with(".fbz")
    }

    fn is_fb2(&self) -> bool {
        self.has_type("application/x-fictionbook+xml") || self.name_ends_with(".fb2")
    }

    fn is_html(&self) -> bool {
        self.has_type("text/html")
            || self.has_type("application/xhtml+xml")
            || MARKUP_EXTENSIONS
                .iter()
                .any(|ext| self.name_ends_with(&format!(".{ext}")))
    }
}

/// Picks the handler for a source. Each check assumes the earlier ones
/// failed.
pub fn classify(probe: &FileProbe) -> Result<FormatKind> {
    if probe.is_dir {
        return Ok(FormatKind::Directory);
    }
    if probe.size == 0 {
        return Err(ReaderError::NotFound(format!("{} is empty", probe.name)));
    }
    if probe.head.starts_with(ZIP_MAGIC) {
        return Ok(if probe.is_cbz() {
            FormatKind::Cbz
        } else if probe.is_fbz() {
            FormatKind::Fbz
        } else {
            FormatKind::Epub
        });
    }
    if probe.head.starts_with(PDF_MAGIC) {
        return Ok(FormatKind::Pdf);
    }
    if probe.head.get(MOBI_OFFSET..PROBE_LEN) == Some(MOBI_MAGIC) {
        return Ok(FormatKind::Mobi);
    }
    if probe.is_fb2() {
        return Ok(FormatKind::Fb2);
    }
    if probe.is_html() {
        return Ok(FormatKind::Html);
    }
    Err(ReaderError::UnsupportedType(probe.name.clone()))
}

/// Opens a directory or HTML file as a book.
pub fn load_book(path: &Path) -> Result<Book> {
    let probe = FileProbe::from_path(path)?;
    let kind = classify(&probe)?;
    info!("Opening {} as {kind:?}", path.display());
    match kind {
        FormatKind::Directory => load_directory(path),
        FormatKind::Html => load_html_file(path),
        other => Err(ReaderError::UnsupportedType(format!(
            "{} ({other:?} needs an external parser)",
            probe.name
        ))),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// A directory of section files, read in file name order. A directory of
/// images only is treated as a pre-paginated book.
pub fn load_directory(dir: &Path) -> Result<Book> {
    let mut sections = Vec::new();
    let mut all_images = true;

    let mut entries: Vec<_> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let path = entry.path();
        let Some(ext) = extension_of(path) else {
            continue;
        };
        let is_image = IMAGE_EXTENSIONS.contains(&ext.as_str());
        if !is_image && !MARKUP_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        all_images &= is_image;
        let id = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match FileContent::new(path) {
            Ok(content) => sections.push(Section::new(id, content)),
            Err(e) => warn!("Skipping {}: {e}", path.display()),
        }
    }
    if sections.is_empty() {
        return Err(ReaderError::UnsupportedType(format!(
            "{} has no readable sections",
            dir.display()
        )));
    }
    debug!("Found {} sections in {}", sections.len(), dir.display());

    let title = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut book = Book::new(sections).with_metadata(Metadata {
        title,
        ..Default::default()
    });
    if all_images {
        book = book.with_rendition(Rendition {
            layout: Some("pre-paginated".into()),
            ..Default::default()
        });
    } else {
        let toc = book
            .sections
            .iter()
            .filter_map(|section| {
                let doc = section.create_document().ok()?;
                Some(TocItem::new(heading_of(&doc)?, section.id.clone()))
            })
            .collect();
        book = book.with_toc(toc);
    }
    apply_document_language(&mut book);
    Ok(book)
}

/// A single HTML file: one section whose headings with ids form the TOC.
pub fn load_html_file(path: &Path) -> Result<Book> {
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let section = Section::new(id.clone(), FileContent::new(path)?);
    let doc = section.create_document()?;

    let toc = doc
        .descendants(doc.root())
        .filter(|&n| matches!(doc.local_name(n), Some("h1" | "h2" | "h3")))
        .filter_map(|n| {
            let anchor = doc.attr(n, "id")?;
            let label = normalize(&doc.text_content(n));
            (!label.is_empty()).then(|| TocItem::new(label, format!("{id}#{anchor}")))
        })
        .collect();
    let title = heading_of(&doc).unwrap_or_else(|| id.clone());

    let mut book = Book::new(vec![section])
        .with_metadata(Metadata {
            title,
            ..Default::default()
        })
        .with_toc(toc);
    apply_document_language(&mut book);
    Ok(book)
}

/// Loads a single image as a one-page pre-paginated book.
pub fn image_book(name: &str, bytes: Vec<u8>) -> Book {
    Book::new(vec![Section::new(name, ImageContent::new(name, bytes))]).with_rendition(Rendition {
        layout: Some("pre-paginated".into()),
        ..Default::default()
    })
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `<title>`, else the first top-level heading.
fn heading_of(doc: &Document) -> Option<String> {
    ["title", "h1", "h2"].iter().find_map(|name| {
        let el = doc.first_element_by_name(name)?;
        let text = normalize(&doc.text_content(el));
        (!text.is_empty()).then_some(text)
    })
}

fn apply_document_language(book: &mut Book) {
    if book.metadata.language.is_some() {
        return;
    }
    let language = book.sections.iter().find_map(|section| {
        let doc = section.create_document().ok()?;
        doc.lang().map(str::to_string)
    });
    book.metadata.language = language;
}
