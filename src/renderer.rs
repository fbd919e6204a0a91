//! The seam between the view and its two renderers.

use std::rc::Rc;

use crate::book::Book;
use crate::dom::{Document, Range};
use crate::error::Result;
use crate::events::RendererEvent;
use crate::fixed_layout::Zoom;
use crate::geometry::{Rect, Size};
use crate::layout::{Layout, LayoutStyle};
use crate::navigation::{self, Resolved, Turn};
use crate::overlay::{DrawFn, DrawOptions, Overlayer, RangeGeometry, RangeSource};

/// A section document currently shown by a renderer.
pub struct Contents<'a> {
    pub index: usize,
    pub doc: &'a Document,
    pub overlayer: Option<&'a Overlayer>,
}

/// Client rects from a laid out section document.
#[derive(Clone, Copy)]
pub struct LayoutGeometry<'a> {
    pub doc: &'a Document,
    pub layout: &'a Layout,
}

impl RangeGeometry for LayoutGeometry<'_> {
    fn document(&self) -> &Document {
        self.doc
    }

    fn client_rects(&self, range: &Range) -> Vec<Rect> {
        self.layout.rects_for_range(self.doc, range)
    }
}

/// An overlayer together with the geometry of the document it covers.
pub struct OverlaySurface<'a> {
    pub overlayer: &'a mut Overlayer,
    pub geometry: LayoutGeometry<'a>,
    /// Content coordinates of the top left corner of the view.
    pub origin: (f64, f64),
}

impl OverlaySurface<'_> {
    pub fn add(&mut self, key: &str, range: RangeSource, draw: DrawFn, options: DrawOptions) -> bool {
        self.overlayer.add(key, range, draw, options, &self.geometry)
    }

    pub fn remove(&mut self, key: &str) {
        self.overlayer.remove(key);
    }

    pub fn redraw(&mut self) {
        self.overlayer.redraw(&self.geometry);
    }

    /// Hit-tests a point given in view coordinates.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<(String, Range)> {
        let (dx, dy) = self.origin;
        self.overlayer
            .hit_test(x + dx, y + dy)
            .map(|(key, range)| (key.to_string(), range))
    }
}

pub trait Renderer {
    fn open(&mut self, book: Rc<Book>);

    /// Shows the target. On error nothing changes.
    fn go_to(&mut self, target: &Resolved) -> Result<()>;

    fn next(&mut self) -> Result<()>;

    fn prev(&mut self) -> Result<()>;

    fn is_rtl(&self) -> bool;

    fn go_left(&mut self) -> Result<()> {
        match navigation::go_left(self.is_rtl()) {
            Turn::Next => self.next(),
            Turn::Prev => self.prev(),
        }
    }

    fn go_right(&mut self) -> Result<()> {
        match navigation::go_right(self.is_rtl()) {
            Turn::Next => self.next(),
            Turn::Prev => self.prev(),
        }
    }

    fn set_viewport(&mut self, viewport: Size);

    /// Typography changes; renderers without reflow ignore them.
    fn set_style(&mut self, _style: &LayoutStyle) {}

    /// Page scaling; only fixed layouts zoom.
    fn set_zoom(&mut self, _zoom: Zoom) {}

    fn contents(&self) -> Vec<Contents<'_>>;

    fn document_mut(&mut self, index: usize) -> Option<&mut Document>;

    fn attach_overlayer(&mut self, index: usize, overlayer: Overlayer);

    fn overlay(&mut self, index: usize) -> Option<OverlaySurface<'_>>;

    fn selection(&self) -> Option<Range> {
        None
    }

    fn deselect(&mut self) {}

    /// Events queued since the last call.
    fn take_events(&mut self) -> Vec<RendererEvent>;

    fn destroy(&mut self);
}
