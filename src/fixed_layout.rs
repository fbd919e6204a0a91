//! Fixed-layout renderer.
//!
//! Pre-paginated sections are grouped into spreads of up to two pages (or a
//! single centered page) once per book. Each page is sized to its intrinsic
//! viewport and scaled by the zoom mode to fit the container. When the
//! container is taller than wide only one side of a spread is shown, and
//! turning pages first toggles between the sides.

use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::book::{Book, PageSpread, ViewportHint, ZoomHook};
use crate::dom::Document;
use crate::error::{ReaderError, Result};
use crate::events::{Outbox, Reason, RelocateDetail, RendererEvent};
use crate::geometry::Size;
use crate::layout::{Flow, Layout, LayoutStyle};
use crate::navigation::Resolved;
use crate::overlay::Overlayer;
use crate::renderer::{Contents, LayoutGeometry, OverlaySurface, Renderer};

/// Page size used when a document declares none.
pub const FALLBACK_VIEWPORT: Size = Size::new(1000.0, 2000.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
    Center,
}

/// Section indices shown together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Spread {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub center: Option<usize>,
}

impl Spread {
    pub fn left(index: usize) -> Self {
        Self {
            left: Some(index),
            ..Self::default()
        }
    }

    pub fn right(index: usize) -> Self {
        Self {
            right: Some(index),
            ..Self::default()
        }
    }

    pub fn pair(left: usize, right: usize) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            center: None,
        }
    }

    pub fn center(index: usize) -> Self {
        Self {
            center: Some(index),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none() && self.center.is_none()
    }

    pub fn side_of(&self, index: usize) -> Option<Side> {
        if self.left == Some(index) {
            Some(Side::Left)
        } else if self.right == Some(index) {
            Some(Side::Right)
        } else if self.center == Some(index) {
            Some(Side::Center)
        } else {
            None
        }
    }
}

/// Groups pages into spreads from their hints and the reading direction.
///
/// `mode` is the rendition spread property; `"none"` puts every page in a
/// spread of its own.
pub fn build_spreads(hints: &[Option<PageSpread>], rtl: bool, mode: Option<&str>) -> Vec<Spread> {
    if mode == Some("none") {
        return (0..hints.len()).map(Spread::center).collect();
    }
    let ltr = !rtl;
    let mut spreads = vec![Spread::default()];
    for (i, hint) in hints.iter().enumerate() {
        let first = i == 0;
        let last = spreads.last().copied().unwrap_or_default();
        let slot = |spreads: &mut Vec<Spread>, fresh: bool| -> usize {
            if fresh {
                spreads.push(Spread::default());
            }
            spreads.len() - 1
        };
        match hint {
            Some(PageSpread::Center) => {
                let at = slot(&mut spreads, !last.is_empty());
                spreads[at].center = Some(i);
            }
            Some(PageSpread::Left) => {
                let fresh = last.center.is_some() || last.left.is_some() || (ltr && !first);
                let at = slot(&mut spreads, fresh);
                spreads[at].left = Some(i);
            }
            Some(PageSpread::Right) => {
                let fresh = last.center.is_some() || last.right.is_some() || (rtl && !first);
                let at = slot(&mut spreads, fresh);
                spreads[at].right = Some(i);
            }
            None if ltr => {
                if last.center.is_some() || last.right.is_some() {
                    let at = slot(&mut spreads, true);
                    spreads[at].left = Some(i);
                } else if last.left.is_some() || first {
                    let at = slot(&mut spreads, false);
                    spreads[at].right = Some(i);
                } else {
                    let at = slot(&mut spreads, false);
                    spreads[at].left = Some(i);
                }
            }
            None => {
                if last.center.is_some() || last.left.is_some() {
                    let at = slot(&mut spreads, true);
                    spreads[at].right = Some(i);
                } else if last.right.is_some() || first {
                    let at = slot(&mut spreads, false);
                    spreads[at].left = Some(i);
                } else {
                    let at = slot(&mut spreads, false);
                    spreads[at].right = Some(i);
                }
            }
        }
    }
    spreads.retain(|s| !s.is_empty());
    spreads
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fit {
    FitWidth,
    FitPage,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Zoom {
    Scale(f64),
    Fit(Fit),
}

impl Default for Zoom {
    fn default() -> Self {
        Zoom::Scale(1.0)
    }
}

impl Zoom {
    /// Parses `"fit-width"`, `"fit-page"` or a number. Anything else is 1.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "fit-width" => Zoom::Fit(Fit::FitWidth),
            "fit-page" => Zoom::Fit(Fit::FitPage),
            other => Zoom::Scale(other.parse().unwrap_or(1.0)),
        }
    }
}

/// Intrinsic page size; either side may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageViewport {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl PageViewport {
    fn new(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    fn complete(self) -> Option<Self> {
        (self.width.is_some() && self.height.is_some()).then_some(self)
    }
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map_or(value.len(), |(i, _)| i);
    value[..end].parse().ok().filter(|v: &f64| v.is_finite())
}

/// Splits `width=600, height=800` into key/value pairs. Semicolons and
/// whitespace are accepted as separators too.
pub fn parse_viewport(content: &str) -> Vec<(String, String)> {
    content
        .split([',', ';', ' ', '\t', '\n', '\r'])
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let mut kv = part.split('=');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(k), Some(v), None) => Some((k.trim().to_string(), v.trim().to_string())),
                _ => None,
            }
        })
        .collect()
}

fn viewport_from_pairs(pairs: &[(String, String)]) -> PageViewport {
    let get = |key: &str| {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| parse_number(v))
    };
    PageViewport {
        width: get("width"),
        height: get("height"),
    }
}

/// Works out the intrinsic size of a page document.
///
/// In order: the SVG `viewBox`, a `<meta name="viewport">`, the book's
/// rendition viewport, the size of an `<img>`, then [`FALLBACK_VIEWPORT`].
pub fn get_viewport(doc: &Document, book_viewport: Option<&ViewportHint>) -> PageViewport {
    if let Some(root) = doc.document_element()
        && doc.local_name(root) == Some("svg")
    {
        let parts: Vec<_> = doc
            .attr(root, "viewBox")
            .unwrap_or_default()
            .split_whitespace()
            .collect();
        if let [_, _, width, height] = parts[..]
            && let (Some(width), Some(height)) = (parse_number(width), parse_number(height))
        {
            return PageViewport::new(width, height);
        }
    }

    let meta = doc
        .elements_by_name("meta")
        .find(|&m| doc.attr(m, "name") == Some("viewport"))
        .and_then(|m| doc.attr(m, "content"));
    if let Some(found) = meta.and_then(|c| viewport_from_pairs(&parse_viewport(c)).complete()) {
        return found;
    }

    match book_viewport {
        Some(ViewportHint::Text(text)) => {
            return viewport_from_pairs(&parse_viewport(text))
                .complete()
                .unwrap_or_else(|| {
                    warn!("Unreadable book viewport {text:?}");
                    PageViewport::new(FALLBACK_VIEWPORT.width, FALLBACK_VIEWPORT.height)
                });
        }
        Some(&ViewportHint::Size { width, height }) if width > 0.0 && height > 0.0 => {
            return PageViewport::new(width, height);
        }
        _ => {}
    }

    if let Some(img) = doc.first_element_by_name("img") {
        return PageViewport {
            width: doc.attr(img, "width").and_then(parse_number),
            height: doc.attr(img, "height").and_then(parse_number),
        };
    }

    warn!("Missing viewport properties, using {FALLBACK_VIEWPORT:?}");
    PageViewport::new(FALLBACK_VIEWPORT.width, FALLBACK_VIEWPORT.height)
}

/// Computed presentation of one frame, the equivalent of its inline styles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStyle {
    /// Size of the page surface before any transform.
    pub page_width: f64,
    pub page_height: f64,
    /// Scale applied as a transform; `None` when the page scales itself.
    pub transform: Option<f64>,
    pub page_visible: bool,
    /// Size of the box the page sits in.
    pub width: f64,
    pub height: f64,
    pub visible: bool,
}

struct Page {
    index: usize,
    doc: Document,
    layout: Layout,
    viewport: PageViewport,
    on_zoom: Option<ZoomHook>,
    overlayer: Option<Overlayer>,
}

/// One side of the shown spread. Blank frames hold no page but still take
/// up room next to their neighbour.
pub struct Frame {
    page: Option<Page>,
    style: FrameStyle,
}

impl Frame {
    fn blank() -> Self {
        Self {
            page: None,
            style: FrameStyle::default(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.page.is_none()
    }

    pub fn index(&self) -> Option<usize> {
        self.page.as_ref().map(|p| p.index)
    }

    pub fn style(&self) -> &FrameStyle {
        &self.style
    }

    pub fn width(&self) -> Option<f64> {
        self.page.as_ref().and_then(|p| p.viewport.width)
    }

    pub fn height(&self) -> Option<f64> {
        self.page.as_ref().and_then(|p| p.viewport.height)
    }

    fn apply(&mut self, scale: f64, blank: Size, hidden: bool) {
        let Some(page) = &self.page else {
            self.style = FrameStyle {
                width: blank.width * scale,
                height: blank.height * scale,
                visible: !hidden,
                ..FrameStyle::default()
            };
            return;
        };
        if let Some(on_zoom) = &page.on_zoom {
            on_zoom(&page.doc, scale);
        }
        let own_scale = if page.on_zoom.is_some() { scale } else { 1.0 };
        let width = page.viewport.width.unwrap_or(0.0);
        let height = page.viewport.height.unwrap_or(0.0);
        self.style = FrameStyle {
            page_width: width * own_scale,
            page_height: height * own_scale,
            transform: page.on_zoom.is_none().then_some(scale),
            page_visible: true,
            width: page.viewport.width.unwrap_or(blank.width) * scale,
            height: page.viewport.height.unwrap_or(blank.height) * scale,
            visible: !hidden,
        };
    }
}

enum Shown {
    Center(Frame),
    Pair { left: Frame, right: Frame },
}

/// `min` that keeps a NaN operand, so an unknown size falls back to 1.
fn min_or_nan(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

fn page_style(viewport: PageViewport) -> (LayoutStyle, Size) {
    let style = LayoutStyle {
        flow: Flow::Scrolled,
        margin: 0.0,
        max_inline_size: f64::INFINITY,
        ..LayoutStyle::default()
    };
    let size = Size::new(
        viewport.width.unwrap_or(FALLBACK_VIEWPORT.width),
        viewport.height.unwrap_or(FALLBACK_VIEWPORT.height),
    );
    (style, size)
}

pub struct FixedLayout {
    book: Option<Rc<Book>>,
    spreads: Vec<Spread>,
    current: Option<usize>,
    shown: Option<Shown>,
    side: Option<Side>,
    rtl: bool,
    spread_mode: Option<String>,
    default_viewport: Option<ViewportHint>,
    container: Size,
    zoom: Zoom,
    portrait: bool,
    scale: f64,
    outbox: Outbox,
}

impl FixedLayout {
    pub fn new(container: Size, zoom: Zoom) -> Self {
        Self {
            book: None,
            spreads: Vec::new(),
            current: None,
            shown: None,
            side: None,
            rtl: false,
            spread_mode: None,
            default_viewport: None,
            container,
            zoom,
            portrait: false,
            scale: 1.0,
            outbox: Outbox::default(),
        }
    }

    pub fn spreads(&self) -> &[Spread] {
        &self.spreads
    }

    pub fn current_spread(&self) -> Option<usize> {
        self.current
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    pub fn is_portrait(&self) -> bool {
        self.portrait
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    /// Frames of the shown spread, left to right.
    pub fn frames(&self) -> Vec<&Frame> {
        match &self.shown {
            Some(Shown::Center(frame)) => vec![frame],
            Some(Shown::Pair { left, right }) => vec![left, right],
            None => Vec::new(),
        }
    }

    fn frames_mut(&mut self) -> Vec<&mut Frame> {
        match &mut self.shown {
            Some(Shown::Center(frame)) => vec![frame],
            Some(Shown::Pair { left, right }) => vec![left, right],
            None => Vec::new(),
        }
    }

    fn page_mut(&mut self, index: usize) -> Option<&mut Page> {
        self.frames_mut()
            .into_iter()
            .filter_map(|f| f.page.as_mut())
            .find(|p| p.index == index)
    }

    /// Section the reader is on: the centered page, or the page on the
    /// current side, or its neighbour when that side is empty.
    pub fn index(&self) -> Option<usize> {
        let spread = self.spreads.get(self.current?)?;
        spread.center.or(match self.side {
            Some(Side::Left) => spread.left.or(spread.right),
            _ => spread.right.or(spread.left),
        })
    }

    pub fn get_spread_of(&self, section: usize) -> Option<(usize, Side)> {
        self.spreads
            .iter()
            .enumerate()
            .find_map(|(i, spread)| spread.side_of(section).map(|side| (i, side)))
    }

    fn load_frame(&self, book: &Book, index: Option<usize>) -> Result<Frame> {
        let Some(index) = index else {
            return Ok(Frame::blank());
        };
        let section = book
            .sections
            .get(index)
            .ok_or_else(|| ReaderError::Unresolved(format!("section {index}")))?;
        let doc = section.create_document()?;
        let viewport = get_viewport(&doc, self.default_viewport.as_ref());
        let (style, size) = page_style(viewport);
        let layout = Layout::new(&doc, &style, size);
        Ok(Frame {
            page: Some(Page {
                index,
                doc,
                layout,
                viewport,
                on_zoom: section.zoom_hook.clone(),
                overlayer: None,
            }),
            style: FrameStyle::default(),
        })
    }

    fn render(&mut self, side: Option<Side>) {
        let Some(side) = side else {
            return;
        };
        let Size { width, height } = self.container;
        let portrait = !matches!(self.spread_mode.as_deref(), Some("both" | "portrait")) && height > width;
        self.portrait = portrait;
        let Some(shown) = &mut self.shown else {
            return;
        };

        let (left, right): (Option<&Frame>, &Frame) = match &*shown {
            Shown::Center(frame) => (None, frame),
            Shown::Pair { left, right } => (Some(left), right),
        };
        let centered = left.is_none();
        let target = if side == Side::Left { left.unwrap_or(right) } else { right };
        let size = |frame: Option<&Frame>, get: fn(&Frame) -> Option<f64>| frame.and_then(get);
        let blank = Size::new(
            size(left, Frame::width).or(right.width()).unwrap_or(0.0),
            size(left, Frame::height).or(right.height()).unwrap_or(0.0),
        );
        let left_width = size(left, Frame::width).unwrap_or(blank.width);
        let left_height = size(left, Frame::height).unwrap_or(blank.height);
        let right_width = right.width().unwrap_or(blank.width);
        let right_height = right.height().unwrap_or(blank.height);
        let target_width = target.width().unwrap_or(blank.width);
        let target_height = target.height().unwrap_or(blank.height);

        let single = portrait || centered;
        let scale = match self.zoom {
            Zoom::Scale(scale) => scale,
            Zoom::Fit(Fit::FitWidth) if single => width / target_width,
            Zoom::Fit(Fit::FitWidth) => width / (left_width + right_width),
            Zoom::Fit(Fit::FitPage) if single => {
                min_or_nan(width / target_width, height / target_height)
            }
            Zoom::Fit(Fit::FitPage) => min_or_nan(
                width / (left_width + right_width),
                height / left_height.max(right_height),
            ),
        };
        let scale = if scale.is_finite() && scale != 0.0 { scale } else { 1.0 };
        self.scale = scale;
        debug!("Rendering spread {:?} side {side:?} at scale {scale}", self.current);

        match shown {
            Shown::Center(frame) => frame.apply(scale, blank, false),
            Shown::Pair { left, right } => {
                left.apply(scale, blank, portrait && side != Side::Left);
                right.apply(scale, blank, portrait && side == Side::Left);
            }
        }
    }

    fn report(&mut self, reason: Reason) {
        if let Some(index) = self.index() {
            self.outbox.relocate(RelocateDetail {
                reason,
                range: None,
                index,
                fraction: 0.0,
                size: 1.0,
            });
        }
    }

    /// In portrait, shows the hidden left page of the current spread.
    fn toggle_left(&mut self) -> bool {
        let Some(Shown::Pair { left, .. }) = &self.shown else {
            return false;
        };
        if left.is_blank() || !(self.portrait && !left.style.visible) {
            return false;
        }
        self.side = Some(Side::Left);
        self.render(self.side);
        self.report(Reason::Page);
        true
    }

    fn toggle_right(&mut self) -> bool {
        let Some(Shown::Pair { right, .. }) = &self.shown else {
            return false;
        };
        if right.is_blank() || !(self.portrait && !right.style.visible) {
            return false;
        }
        self.side = Some(Side::Right);
        self.render(self.side);
        self.report(Reason::Page);
        true
    }

    /// Shows spread `index` from `side`. Out of range indices are ignored.
    pub fn go_to_spread(&mut self, index: usize, side: Side, reason: Reason) -> Result<()> {
        let Some(&spread) = self.spreads.get(index) else {
            debug!("No spread {index}");
            return Ok(());
        };
        if self.current == Some(index) {
            if self.side != Some(side) {
                self.side = Some(side);
                self.render(self.side);
                self.report(reason);
            }
            return Ok(());
        }
        let book = self
            .book
            .clone()
            .ok_or_else(|| ReaderError::Unresolved("no book is open".into()))?;

        let (shown, side) = match spread.center {
            Some(center) => (Shown::Center(self.load_frame(&book, Some(center))?), Side::Center),
            None => {
                let left = self.load_frame(&book, spread.left)?;
                let right = self.load_frame(&book, spread.right)?;
                let side = if left.is_blank() {
                    Side::Right
                } else if right.is_blank() {
                    Side::Left
                } else {
                    side
                };
                (Shown::Pair { left, right }, side)
            }
        };

        self.current = Some(index);
        self.shown = Some(shown);
        self.side = Some(side);
        let loaded: Vec<usize> = self.frames().iter().filter_map(|f| f.index()).collect();
        for index in loaded {
            self.outbox.push(RendererEvent::Load { index });
            self.outbox.push(RendererEvent::CreateOverlayer { index });
        }
        self.render(self.side);
        self.report(reason);
        Ok(())
    }
}

impl Renderer for FixedLayout {
    fn open(&mut self, book: Rc<Book>) {
        self.rtl = book.dir.is_rtl();
        self.spread_mode = book.rendition.spread.clone();
        self.default_viewport = book.rendition.viewport.clone();
        let hints: Vec<_> = book.sections.iter().map(|s| s.page_spread).collect();
        self.spreads = build_spreads(&hints, self.rtl, self.spread_mode.as_deref());
        debug!("Grouped {} pages into {} spreads", hints.len(), self.spreads.len());
        self.book = Some(book);
        self.current = None;
        self.shown = None;
        self.side = None;
        self.outbox.drain();
    }

    fn go_to(&mut self, target: &Resolved) -> Result<()> {
        let (index, side) = self
            .get_spread_of(target.index)
            .ok_or_else(|| ReaderError::Unresolved(format!("section {}", target.index)))?;
        self.go_to_spread(index, side, Reason::Goto)
    }

    fn next(&mut self) -> Result<()> {
        let toggled = if self.rtl { self.toggle_left() } else { self.toggle_right() };
        if toggled {
            return Ok(());
        }
        let index = self.current.map_or(0, |i| i + 1);
        let side = if self.rtl { Side::Right } else { Side::Left };
        self.go_to_spread(index, side, Reason::Page)
    }

    fn prev(&mut self) -> Result<()> {
        let toggled = if self.rtl { self.toggle_right() } else { self.toggle_left() };
        if toggled {
            return Ok(());
        }
        let Some(index) = self.current.and_then(|i| i.checked_sub(1)) else {
            return Ok(());
        };
        let side = if self.rtl { Side::Left } else { Side::Right };
        self.go_to_spread(index, side, Reason::Page)
    }

    fn is_rtl(&self) -> bool {
        self.rtl
    }

    fn set_viewport(&mut self, viewport: Size) {
        self.container = viewport;
        self.render(self.side);
    }

    fn set_zoom(&mut self, zoom: Zoom) {
        self.zoom = zoom;
        self.render(self.side);
    }

    fn contents(&self) -> Vec<Contents<'_>> {
        self.frames()
            .into_iter()
            .filter_map(|f| f.page.as_ref())
            .map(|p| Contents {
                index: p.index,
                doc: &p.doc,
                overlayer: p.overlayer.as_ref(),
            })
            .collect()
    }

    fn document_mut(&mut self, index: usize) -> Option<&mut Document> {
        self.page_mut(index).map(|p| &mut p.doc)
    }

    fn attach_overlayer(&mut self, index: usize, overlayer: Overlayer) {
        if let Some(page) = self.page_mut(index) {
            page.overlayer = Some(overlayer);
        }
    }

    fn overlay(&mut self, index: usize) -> Option<OverlaySurface<'_>> {
        let Page {
            doc,
            layout,
            overlayer,
            ..
        } = self.page_mut(index)?;
        Some(OverlaySurface {
            overlayer: overlayer.as_mut()?,
            geometry: LayoutGeometry { doc, layout },
            origin: (0.0, 0.0),
        })
    }

    fn take_events(&mut self) -> Vec<RendererEvent> {
        self.outbox.drain()
    }

    fn destroy(&mut self) {
        self.book = None;
        self.spreads.clear();
        self.current = None;
        self.shown = None;
        self.side = None;
        self.outbox.drain();
    }
}
