//! The loaded publication as the engine sees it: ordered sections with lazy
//! documents, navigation metadata, and the href/CFI resolution hooks.

use std::cell::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cfi::{self, Cfi};
use crate::dom::{Document, NodeId, Range, parse_markup};
use crate::error::{ReaderError, Result};
use crate::navigation::{Anchor, Resolved, Target, fragment_element};
use crate::progress::{SectionWeight, TocItem};

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+:").expect("valid scheme regex"));

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dir {
    #[default]
    Ltr,
    Rtl,
}

impl Dir {
    pub fn is_rtl(self) -> bool {
        self == Dir::Rtl
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dir::Ltr => "ltr",
            Dir::Rtl => "rtl",
        }
    }
}

/// Fixed-layout placement hint of a section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSpread {
    Left,
    Right,
    Center,
}

/// Book-level viewport metadata: either `"width=…, height=…"` or explicit sizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewportHint {
    Size { width: f64, height: f64 },
    Text(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rendition {
    /// `"reflowable"` or `"pre-paginated"`.
    pub layout: Option<String>,
    /// `"none"`, `"landscape"`, `"portrait"`, `"both"` or `"auto"`.
    pub spread: Option<String>,
    pub viewport: Option<ViewportHint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub title: String,
    pub author: Option<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    #[serde(rename = "type")]
    pub kind: Vec<String>,
    pub label: Option<String>,
    pub href: String,
}

/// Produces a section's document on demand.
pub trait SectionContent {
    fn load(&self) -> Result<Document>;

    /// Weight used for progress, usually the byte length of the source.
    fn size(&self) -> u64;
}

/// Section backed by in-memory HTML, XHTML or SVG markup.
pub struct HtmlContent {
    markup: String,
}

impl HtmlContent {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
        }
    }
}

impl SectionContent for HtmlContent {
    fn load(&self) -> Result<Document> {
        parse_markup(&self.markup)
    }

    fn size(&self) -> u64 {
        self.markup.len() as u64
    }
}

/// Section made of a single raster image, wrapped in a minimal page whose
/// `<img>` carries the natural size.
pub struct ImageContent {
    src: String,
    bytes: Vec<u8>,
}

impl ImageContent {
    pub fn new(src: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            src: src.into(),
            bytes,
        }
    }
}

impl SectionContent for ImageContent {
    fn load(&self) -> Result<Document> {
        image_document(&self.src, &self.bytes)
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn image_document(src: &str, bytes: &[u8]) -> Result<Document> {
    let size = imagesize::blob_size(bytes)
        .map_err(|e| ReaderError::Document(format!("{src}: {e}")))?;
    let (width, height) = (size.width.to_string(), size.height.to_string());

    let mut doc = Document::new();
    let root = doc.root();
    let html = doc.append_element(root, "html", &[]);
    doc.append_element(html, "head", &[]);
    let body = doc.append_element(html, "body", &[]);
    doc.append_element(
        body,
        "img",
        &[("src", src), ("width", &width), ("height", &height)],
    );
    Ok(doc)
}

/// Section read from disk when its document is first needed.
pub struct FileContent {
    path: PathBuf,
    size: u64,
}

impl FileContent {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_image(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    }
}

impl SectionContent for FileContent {
    fn load(&self) -> Result<Document> {
        debug!("Loading section from {}", self.path.display());
        if self.is_image() {
            let bytes = std::fs::read(&self.path)?;
            let src = self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return image_document(&src, &bytes);
        }
        let markup = std::fs::read_to_string(&self.path)?;
        parse_markup(&markup)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Called with the frame document and scale whenever a fixed-layout page is
/// zoomed. A page with a hook is resized instead of transformed.
pub type ZoomHook = Rc<dyn Fn(&Document, f64)>;

pub struct Section {
    pub id: String,
    pub index: usize,
    pub linear: bool,
    pub size: u64,
    pub page_spread: Option<PageSpread>,
    /// Intrinsic CFI base, e.g. `/6/4[chap01]`.
    pub cfi: Option<String>,
    pub zoom_hook: Option<ZoomHook>,
    content: Box<dyn SectionContent>,
    document: OnceCell<Document>,
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("linear", &self.linear)
            .field("size", &self.size)
            .field("page_spread", &self.page_spread)
            .finish_non_exhaustive()
    }
}

impl Section {
    pub fn new(id: impl Into<String>, content: impl SectionContent + 'static) -> Self {
        Self {
            id: id.into(),
            index: 0,
            linear: true,
            size: content.size(),
            page_spread: None,
            cfi: None,
            zoom_hook: None,
            content: Box::new(content),
            document: OnceCell::new(),
        }
    }

    pub fn html(id: impl Into<String>, markup: impl Into<String>) -> Self {
        Self::new(id, HtmlContent::new(markup))
    }

    pub fn non_linear(mut self) -> Self {
        self.linear = false;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_page_spread(mut self, spread: PageSpread) -> Self {
        self.page_spread = Some(spread);
        self
    }

    pub fn with_cfi(mut self, cfi: impl Into<String>) -> Self {
        self.cfi = Some(cfi.into());
        self
    }

    pub fn with_zoom_hook(mut self, hook: ZoomHook) -> Self {
        self.zoom_hook = Some(hook);
        self
    }

    /// A fresh copy of the section document. Parsing happens once; later
    /// calls clone the cached tree.
    pub fn create_document(&self) -> Result<Document> {
        if let Some(doc) = self.document.get() {
            return Ok(doc.clone());
        }
        let doc = self.content.load()?;
        Ok(self.document.get_or_init(|| doc).clone())
    }

    /// Resolves `href` relative to this section's id.
    pub fn resolve_href(&self, href: &str) -> String {
        if is_external(href) || href.starts_with('/') {
            return href.to_string();
        }
        if let Some(fragment) = href.strip_prefix('#') {
            return format!("{}#{fragment}", self.id);
        }
        let mut parts: Vec<&str> = self.id.split('/').collect();
        parts.pop();
        for part in href.split('/') {
            match part {
                "." | "" => {}
                ".." => {
                    parts.pop();
                }
                _ => parts.push(part),
            }
        }
        parts.join("/")
    }

    pub fn weight(&self) -> SectionWeight {
        SectionWeight::new(self.linear, self.size as f64)
    }
}

/// `true` for links leaving the book, i.e. anything with a URL scheme other
/// than `blob:`.
pub fn is_external(href: &str) -> bool {
    SCHEME_RE.is_match(href) && !href.starts_with("blob:")
}

pub type CfiResolver = Box<dyn Fn(&Book, &str) -> Result<Resolved>>;

#[derive(Default)]
pub struct Book {
    pub metadata: Metadata,
    pub toc: Vec<TocItem>,
    pub page_list: Vec<TocItem>,
    pub landmarks: Vec<Landmark>,
    pub sections: Vec<Section>,
    pub dir: Dir,
    pub rendition: Rendition,
    cfi_resolver: Option<CfiResolver>,
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("metadata", &self.metadata)
            .field("sections", &self.sections)
            .field("dir", &self.dir)
            .field("rendition", &self.rendition)
            .finish_non_exhaustive()
    }
}

impl Book {
    pub fn new(sections: Vec<Section>) -> Self {
        let mut book = Self::default();
        book.set_sections(sections);
        book
    }

    fn set_sections(&mut self, mut sections: Vec<Section>) {
        for (index, section) in sections.iter_mut().enumerate() {
            section.index = index;
        }
        self.sections = sections;
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_toc(mut self, toc: Vec<TocItem>) -> Self {
        self.toc = toc;
        self
    }

    pub fn with_page_list(mut self, page_list: Vec<TocItem>) -> Self {
        self.page_list = page_list;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Vec<Landmark>) -> Self {
        self.landmarks = landmarks;
        self
    }

    pub fn with_dir(mut self, dir: Dir) -> Self {
        self.dir = dir;
        self
    }

    pub fn with_rendition(mut self, rendition: Rendition) -> Self {
        self.rendition = rendition;
        self
    }

    /// Replaces the default CFI resolution, for formats whose CFIs do not
    /// follow the spine-step convention.
    pub fn with_cfi_resolver(mut self, resolver: CfiResolver) -> Self {
        self.cfi_resolver = Some(resolver);
        self
    }

    pub fn is_fixed_layout(&self) -> bool {
        self.rendition.layout.as_deref() == Some("pre-paginated")
    }

    pub fn section_ids(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.id.clone()).collect()
    }

    pub fn section_weights(&self) -> Vec<SectionWeight> {
        self.sections.iter().map(Section::weight).collect()
    }

    pub fn section_index(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    /// Splits a TOC href into section id and fragment.
    pub fn split_toc_href(href: &str) -> Option<(String, Option<String>)> {
        let (path, fragment) = match href.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment.to_string())),
            None => (href, None),
        };
        Some((path.to_string(), fragment))
    }

    pub fn get_toc_fragment(doc: &Document, fragment: &str) -> Option<NodeId> {
        fragment_element(doc, fragment)
    }

    /// Maps an in-book href onto a section and fragment anchor.
    pub fn resolve_href(&self, href: &str) -> Option<Resolved> {
        let (path, fragment) = href.split_once('#').unwrap_or((href, ""));
        let index = self.section_index(path)?;
        let anchor = if fragment.is_empty() {
            Anchor::Start
        } else {
            Anchor::Fragment(fragment.to_string())
        };
        Some(Resolved::new(index, anchor))
    }

    pub fn resolve_cfi(&self, value: &str) -> Result<Resolved> {
        if let Some(resolver) = &self.cfi_resolver {
            return resolver(self, value);
        }
        let parsed = Cfi::parse(value)?;
        let (base, local) = parsed.split_base();
        let base = base.ok_or_else(|| ReaderError::InvalidCfi(value.to_string()))?;
        let index = self
            .sections
            .iter()
            .position(|s| {
                s.cfi
                    .as_deref()
                    .and_then(|c| Cfi::parse(&wrap_cfi(c)).ok())
                    .is_some_and(|c| c.parent.first() == Some(base))
            })
            .or_else(|| cfi::fake::to_index(base))
            .filter(|&i| i < self.sections.len())
            .ok_or_else(|| ReaderError::Unresolved(value.to_string()))?;
        let anchor = local.map_or(Anchor::Start, Anchor::Cfi);
        Ok(Resolved::new(index, anchor))
    }

    /// CFI of a section, or of a range inside it.
    pub fn cfi_of(&self, index: usize, range: Option<(&Document, &Range)>) -> String {
        let base = self
            .sections
            .get(index)
            .and_then(|s| s.cfi.as_deref())
            .map(wrap_cfi)
            .unwrap_or_else(|| cfi::fake::from_index(index));
        match range.and_then(|(doc, range)| Cfi::from_range(doc, range)) {
            Some(local) => cfi::join_indir(&base, &local.to_string()),
            None => base,
        }
    }

    /// Where reading proper begins: the body-matter landmark, else the
    /// first linear section.
    pub fn text_start(&self) -> Option<Target> {
        let landmark = self
            .landmarks
            .iter()
            .find(|l| l.kind.iter().any(|k| k == "bodymatter" || k == "text"))
            .filter(|l| self.resolve_href(&l.href).is_some());
        if let Some(landmark) = landmark {
            return Some(Target::Link(landmark.href.clone()));
        }
        self.sections.iter().position(|s| s.linear).map(Target::Index)
    }
}

fn wrap_cfi(value: &str) -> String {
    if cfi::is_cfi(value) {
        value.to_string()
    } else {
        format!("epubcfi({value})")
    }
}

/// Properties of a book's language that affect rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LanguageInfo {
    pub canonical: String,
    pub is_cjk: bool,
    pub direction: Option<Dir>,
}

const RTL_LANGUAGES: &[&str] = &[
    "ar", "arc", "ckb", "dv", "fa", "he", "iw", "ks", "ku", "ps", "sd", "ug", "ur", "yi",
];
const RTL_SCRIPTS: &[&str] = &["Arab", "Hebr", "Syrc", "Thaa", "Nkoo", "Adlm"];

impl LanguageInfo {
    /// Canonicalises a BCP 47 tag. Returns `None` for tags that are not
    /// well-formed.
    pub fn new(tag: &str) -> Option<Self> {
        let mut subtags = tag.trim().split(['-', '_']);
        let language = subtags.next()?.to_ascii_lowercase();
        if !(2..=8).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let mut parts = vec![language.clone()];
        let mut script = None;
        for subtag in subtags {
            if subtag.is_empty() || !subtag.chars().all(|c| c.is_ascii_alphanumeric()) {
                return None;
            }
            let part = match subtag.len() {
                4 if subtag.chars().all(|c| c.is_ascii_alphabetic()) => {
                    let mut chars = subtag.chars();
                    let title: String = chars
                        .next()
                        .map(|c| c.to_ascii_uppercase())
                        .into_iter()
                        .chain(chars.map(|c| c.to_ascii_lowercase()))
                        .collect();
                    script = Some(title.clone());
                    title
                }
                2 => subtag.to_ascii_uppercase(),
                _ => subtag.to_ascii_lowercase(),
            };
            parts.push(part);
        }
        let rtl = match &script {
            Some(script) => RTL_SCRIPTS.contains(&script.as_str()),
            None => RTL_LANGUAGES.contains(&language.as_str()),
        };
        Some(Self {
            canonical: parts.join("-"),
            is_cjk: matches!(language.as_str(), "zh" | "ja" | "ko"),
            direction: Some(if rtl { Dir::Rtl } else { Dir::Ltr }),
        })
    }
}
