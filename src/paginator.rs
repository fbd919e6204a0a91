//! Reflowable renderer: one section at a time, laid out into pages (or
//! viewport-sized scroll steps) that `next`/`prev` walk through, crossing into
//! the adjacent linear section at either end.

use std::rc::Rc;

use log::{debug, warn};

use crate::book::Book;
use crate::dom::{Document, Range};
use crate::error::{ReaderError, Result};
use crate::events::{Outbox, Reason, RelocateDetail, RendererEvent};
use crate::geometry::Size;
use crate::layout::{Flow, Layout, LayoutStyle};
use crate::navigation::{AnchorPosition, Resolved};
use crate::overlay::Overlayer;
use crate::renderer::{Contents, LayoutGeometry, OverlaySurface, Renderer};

pub const DEFAULT_VIEWPORT: Size = Size::new(800.0, 600.0);

struct SectionView {
    index: usize,
    doc: Document,
    layout: Layout,
    overlayer: Option<Overlayer>,
    page: usize,
    /// Range the reader was last taken to; pages are re-found from it after
    /// a relayout.
    anchor: Option<Range>,
}

impl SectionView {
    fn fraction(&self) -> f64 {
        match self.layout.page_count() {
            0 => 0.0,
            count => self.page as f64 / count as f64,
        }
    }

    fn page_size(&self) -> f64 {
        match self.layout.page_count() {
            0 => 1.0,
            count => 1.0 / count as f64,
        }
    }

    fn visible_range(&self) -> Option<Range> {
        self.layout.visible_range(&self.doc, self.page)
    }

    fn last_page(&self) -> usize {
        self.layout.page_count().saturating_sub(1)
    }

    fn redraw_overlay(&mut self) {
        if let Some(overlayer) = &mut self.overlayer {
            overlayer.redraw(&LayoutGeometry {
                doc: &self.doc,
                layout: &self.layout,
            });
        }
    }
}

fn page_of_fraction(fraction: f64, page_count: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    let page = (fraction.clamp(0.0, 1.0) * page_count as f64).floor() as usize;
    page.min(page_count - 1)
}

pub struct Paginator {
    book: Option<Rc<Book>>,
    style: LayoutStyle,
    viewport: Size,
    view: Option<SectionView>,
    selection: Option<Range>,
    outbox: Outbox,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(LayoutStyle::default(), DEFAULT_VIEWPORT)
    }
}

impl Paginator {
    pub fn new(style: LayoutStyle, viewport: Size) -> Self {
        Self {
            book: None,
            style,
            viewport,
            view: None,
            selection: None,
            outbox: Outbox::default(),
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.view.as_ref().map(|v| v.index)
    }

    pub fn page(&self) -> Option<usize> {
        self.view.as_ref().map(|v| v.page)
    }

    pub fn page_count(&self) -> usize {
        self.view.as_ref().map_or(0, |v| v.layout.page_count())
    }

    pub fn style(&self) -> &LayoutStyle {
        &self.style
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.view.as_ref().map(|v| &v.layout)
    }

    fn book(&self) -> Result<Rc<Book>> {
        self.book
            .clone()
            .ok_or_else(|| ReaderError::Unresolved("no book is open".into()))
    }

    fn adjacent_index(&self, from: Option<usize>, forward: bool) -> Option<usize> {
        let book = self.book.as_ref()?;
        let linear = |&i: &usize| book.sections[i].linear;
        match (from, forward) {
            (None, true) => (0..book.sections.len()).find(linear),
            (None, false) => None,
            (Some(index), true) => (index + 1..book.sections.len()).find(linear),
            (Some(index), false) => (0..index).rev().find(linear),
        }
    }

    /// Builds the view for a section without touching current state.
    fn load(&self, index: usize) -> Result<SectionView> {
        let book = self.book()?;
        let section = book
            .sections
            .get(index)
            .ok_or_else(|| ReaderError::Unresolved(format!("section {index}")))?;
        let doc = section.create_document()?;
        let layout = Layout::new(&doc, &self.style, self.viewport);
        debug!(
            "Laid out section {index} into {} pages ({} lines)",
            layout.page_count(),
            layout.line_count()
        );
        Ok(SectionView {
            index,
            doc,
            layout,
            overlayer: None,
            page: 0,
            anchor: None,
        })
    }

    fn show(&mut self, view: SectionView) {
        let index = view.index;
        self.view = Some(view);
        self.selection = None;
        self.outbox.push(RendererEvent::Load { index });
        self.outbox.push(RendererEvent::CreateOverlayer { index });
    }

    /// Reports the current page. `anchor` becomes the new reading anchor;
    /// without one the visible range is used.
    fn relocate(&mut self, reason: Reason, anchor: Option<Range>) {
        let Some(view) = &mut self.view else {
            return;
        };
        let range = anchor.or_else(|| view.visible_range());
        view.anchor = range;
        self.outbox.relocate(RelocateDetail {
            reason,
            range,
            index: view.index,
            fraction: view.fraction(),
            size: view.page_size(),
        });
    }

    fn turn(&mut self, forward: bool) -> Result<()> {
        if let Some(view) = &mut self.view {
            let within = if forward {
                view.page < view.last_page()
            } else {
                view.page > 0
            };
            if within {
                if forward {
                    view.page += 1;
                } else {
                    view.page -= 1;
                }
                self.relocate(Reason::Page, None);
                return Ok(());
            }
        }
        let Some(index) = self.adjacent_index(self.index(), forward) else {
            debug!("No section {} the current one", if forward { "after" } else { "before" });
            return Ok(());
        };
        let mut view = self.load(index)?;
        if !forward {
            view.page = view.last_page();
        }
        self.show(view);
        self.relocate(Reason::Page, None);
        Ok(())
    }

    /// Moves to a scroll offset along the flow axis. In paginated flow the
    /// offset snaps to the nearest page.
    pub fn scroll_to(&mut self, offset: f64) {
        let Some(view) = &mut self.view else {
            return;
        };
        let Size { width, height } = self.viewport;
        let (step, reason) = match self.style.flow {
            Flow::Paginated => (width, Reason::Snap),
            Flow::Scrolled => (height, Reason::Scroll),
        };
        if step <= 0.0 {
            return;
        }
        let page = match reason {
            Reason::Snap => (offset / step).round(),
            _ => (offset / step).floor(),
        };
        view.page = (page.max(0.0) as usize).min(view.last_page());
        self.relocate(reason, None);
    }

    /// Lays the current section out again and returns to the reading anchor.
    fn relayout(&mut self) {
        let Some(view) = &mut self.view else {
            return;
        };
        view.layout = Layout::new(&view.doc, &self.style, self.viewport);
        view.page = match &view.anchor {
            Some(anchor) => view.layout.page_of_range(&view.doc, anchor),
            None => view.page.min(view.last_page()),
        };
        view.redraw_overlay();
        // The anchor stays put so repeated relayouts do not drift.
        self.outbox.relocate(RelocateDetail {
            reason: Reason::Page,
            range: view.visible_range(),
            index: view.index,
            fraction: view.fraction(),
            size: view.page_size(),
        });
    }
}

impl Renderer for Paginator {
    fn open(&mut self, book: Rc<Book>) {
        self.book = Some(book);
        self.view = None;
        self.selection = None;
        self.outbox.drain();
    }

    fn go_to(&mut self, target: &Resolved) -> Result<()> {
        let fresh = match self.index() {
            Some(index) if index == target.index => None,
            _ => Some(self.load(target.index)?),
        };
        let (page, range) = {
            let Some(view) = fresh.as_ref().or(self.view.as_ref()) else {
                return Err(ReaderError::Unresolved(format!("section {}", target.index)));
            };
            match target.anchor.resolve(&view.doc) {
                Some(AnchorPosition::Fraction(fraction)) => {
                    (page_of_fraction(fraction, view.layout.page_count()), None)
                }
                Some(AnchorPosition::Range(range)) => {
                    (view.layout.page_of_range(&view.doc, &range), Some(range))
                }
                None => {
                    warn!("Anchor {:?} not found in section {}", target.anchor, target.index);
                    return Err(ReaderError::Unresolved(format!(
                        "{:?} in section {}",
                        target.anchor, target.index
                    )));
                }
            }
        };
        if let Some(view) = fresh {
            self.show(view);
        }
        if let Some(view) = &mut self.view {
            view.page = page;
        }
        if target.select {
            self.selection = range;
        }
        self.relocate(Reason::Goto, range);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.turn(true)
    }

    fn prev(&mut self) -> Result<()> {
        self.turn(false)
    }

    fn is_rtl(&self) -> bool {
        self.book.as_ref().is_some_and(|b| b.dir.is_rtl())
    }

    fn set_viewport(&mut self, viewport: Size) {
        if self.viewport != viewport {
            self.viewport = viewport;
            self.relayout();
        }
    }

    fn set_style(&mut self, style: &LayoutStyle) {
        if self.style != *style {
            self.style = style.clone();
            self.relayout();
        }
    }

    fn contents(&self) -> Vec<Contents<'_>> {
        self.view
            .iter()
            .map(|v| Contents {
                index: v.index,
                doc: &v.doc,
                overlayer: v.overlayer.as_ref(),
            })
            .collect()
    }

    fn document_mut(&mut self, index: usize) -> Option<&mut Document> {
        self.view
            .as_mut()
            .filter(|v| v.index == index)
            .map(|v| &mut v.doc)
    }

    fn attach_overlayer(&mut self, index: usize, overlayer: Overlayer) {
        if let Some(view) = self.view.as_mut().filter(|v| v.index == index) {
            view.overlayer = Some(overlayer);
        }
    }

    fn overlay(&mut self, index: usize) -> Option<OverlaySurface<'_>> {
        let view = self.view.as_mut().filter(|v| v.index == index)?;
        let rect = view.layout.view_rect(view.page);
        let SectionView {
            doc,
            layout,
            overlayer,
            ..
        } = view;
        Some(OverlaySurface {
            overlayer: overlayer.as_mut()?,
            geometry: LayoutGeometry { doc, layout },
            origin: (rect.left, rect.top),
        })
    }

    fn selection(&self) -> Option<Range> {
        self.selection
    }

    fn deselect(&mut self) {
        self.selection = None;
    }

    fn take_events(&mut self) -> Vec<RendererEvent> {
        self.outbox.drain()
    }

    fn destroy(&mut self) {
        self.view = None;
        self.book = None;
        self.selection = None;
        self.outbox.drain();
    }
}
