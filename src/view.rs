//! The reader view: owns the renderer for the open book and turns its raw
//! events into locations, history entries, overlays and listener calls.

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info, warn};

use crate::book::{Book, LanguageInfo, is_external};
use crate::cfi;
use crate::dom::{Document, Range};
use crate::error::{ReaderError, Result};
use crate::events::{Detail, Event, EventBus, EventKind, Location, RelocateDetail, RendererEvent};
use crate::fixed_layout::{FixedLayout, Zoom};
use crate::format;
use crate::geometry::Size;
use crate::history::History;
use crate::layout::LayoutStyle;
use crate::navigation::{Anchor, AnchorPosition, NavGuard, Resolved, Target};
use crate::notification::{Notification, NotificationManager, Operation};
use crate::overlay::{DrawOptions, Overlayer, outline};
use crate::paginator::{DEFAULT_VIEWPORT, Paginator};
use crate::progress::{SectionProgress, TocItem, TocProgress, assign_ids};
use crate::renderer::Renderer;
use crate::search::{BookSearch, SearchEvent, SearchHit, SearchMatcher, SearchOptions};

/// Overlay keys of search hits start with this, followed by the hit's CFI.
pub const SEARCH_PREFIX: &str = "foliate-search:";

#[derive(Clone, Debug)]
pub struct ViewOptions {
    pub style: LayoutStyle,
    pub viewport: Size,
    pub zoom: Zoom,
    pub size_per_location: f64,
    pub size_per_time_unit: f64,
    /// Back/forward entries kept; unbounded when `None`.
    pub history_limit: Option<usize>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            style: LayoutStyle::default(),
            viewport: DEFAULT_VIEWPORT,
            zoom: Zoom::default(),
            size_per_location: 1500.0,
            size_per_time_unit: 1600.0,
            history_limit: None,
        }
    }
}

/// Everything that only exists while a book is open.
struct Session {
    book: Rc<Book>,
    renderer: Box<dyn Renderer>,
    language: Option<LanguageInfo>,
    section_progress: SectionProgress,
    toc_progress: TocProgress,
    page_progress: TocProgress,
}

fn build_toc_progress(items: &[TocItem], book: &Book) -> TocProgress {
    let mut items = items.to_vec();
    assign_ids(&mut items);
    TocProgress::new(
        &items,
        &book.section_ids(),
        Book::split_toc_href,
        Box::new(Book::get_toc_fragment),
    )
}

pub struct View {
    options: ViewOptions,
    session: Option<Session>,
    history: History<Target>,
    last_location: Option<Location>,
    search_results: BTreeMap<usize, Vec<String>>,
    events: EventBus,
    notifications: NotificationManager,
    nav: NavGuard,
}

impl Default for View {
    fn default() -> Self {
        Self::new(ViewOptions::default())
    }
}

impl View {
    pub fn new(options: ViewOptions) -> Self {
        Self {
            history: History::with_limit(options.history_limit),
            options,
            session: None,
            last_location: None,
            search_results: BTreeMap::new(),
            events: EventBus::new(),
            notifications: NotificationManager::new(),
            nav: NavGuard::new(),
        }
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn book(&self) -> Option<&Rc<Book>> {
        self.session.as_ref().map(|s| &s.book)
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        self.session.as_ref().map(|s| s.renderer.as_ref())
    }

    pub fn language(&self) -> Option<&LanguageInfo> {
        self.session.as_ref()?.language.as_ref()
    }

    pub fn is_fixed_layout(&self) -> bool {
        self.book().is_some_and(|b| b.is_fixed_layout())
    }

    pub fn last_location(&self) -> Option<&Location> {
        self.last_location.as_ref()
    }

    pub fn history(&self) -> &History<Target> {
        &self.history
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationManager {
        &mut self.notifications
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> crate::events::ListenerId
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.events.on(kind, listener)
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Opens `book`, closing whatever was open before.
    pub fn open(&mut self, book: Book) {
        self.close();
        let book = Rc::new(book);
        let language = book.metadata.language.as_deref().and_then(|tag| {
            let info = LanguageInfo::new(tag);
            if info.is_none() {
                warn!("Ignoring malformed language tag {tag:?}");
                self.notifications.push(
                    Notification::warning(Operation::Open, "malformed language tag").target(tag),
                );
            }
            info
        });
        let section_progress = SectionProgress::new(
            &book.section_weights(),
            self.options.size_per_location,
            self.options.size_per_time_unit,
        );
        let toc_progress = build_toc_progress(&book.toc, &book);
        let page_progress = build_toc_progress(&book.page_list, &book);

        let mut renderer: Box<dyn Renderer> = if book.is_fixed_layout() {
            Box::new(FixedLayout::new(self.options.viewport, self.options.zoom))
        } else {
            Box::new(Paginator::new(self.options.style.clone(), self.options.viewport))
        };
        renderer.open(book.clone());
        info!(
            "Opened {:?} with {} sections ({})",
            book.metadata.title,
            book.sections.len(),
            if book.is_fixed_layout() { "fixed layout" } else { "reflowable" }
        );
        self.session = Some(Session {
            book,
            renderer,
            language,
            section_progress,
            toc_progress,
            page_progress,
        });
    }

    /// Loads the book at `path` and opens it. Failures are reported as a
    /// notification as well as returned.
    pub fn open_path(&mut self, path: &Path) -> Result<()> {
        match format::load_book(path) {
            Ok(book) => {
                self.open(book);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open {}: {e}", path.display());
                self.notifications
                    .push(Notification::error(Operation::Open, &e).target(path.display()));
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.renderer.destroy();
            info!("Closed {:?}", session.book.metadata.title);
        }
        self.search_results.clear();
        self.last_location = None;
        self.history.clear();
        self.nav = NavGuard::new();
    }

    /// Restores `last_location` if given and resolvable, else goes to the
    /// start of the text or simply to the first page.
    pub fn init(&mut self, last_location: Option<Target>, show_text_start: bool) {
        if let Some(target) = last_location {
            if let Some(resolved) = self.resolve_navigation(&target)
                && self.commit(&resolved)
            {
                self.history.push_state(target);
                return;
            }
        }
        if show_text_start {
            self.go_to_text_start();
        } else {
            self.history.push_state(Target::Index(0));
            self.next();
        }
    }

    pub fn go_to_text_start(&mut self) -> Option<Resolved> {
        let target = self.book()?.text_start()?;
        self.go_to(target)
    }

    fn try_resolve(&self, target: &Target) -> Result<Resolved> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ReaderError::Unresolved("no book is open".into()))?;
        let book = &session.book;
        match target {
            Target::Index(index) if *index < book.sections.len() => Ok(Resolved::section(*index)),
            Target::Index(index) => Err(ReaderError::Unresolved(format!("section {index}"))),
            Target::Fraction { fraction } => {
                if book.sections.is_empty() {
                    return Err(ReaderError::Unresolved(target.to_string()));
                }
                let (index, within) = session.section_progress.get_section(*fraction);
                Ok(Resolved::new(index, Anchor::Fraction(within)))
            }
            Target::Link(value) if cfi::is_cfi(value) => book.resolve_cfi(value),
            Target::Link(href) => book
                .resolve_href(href)
                .ok_or_else(|| ReaderError::Unresolved(href.clone())),
        }
    }

    /// Maps a target onto the book. Failures are logged and reported, never
    /// propagated.
    pub fn resolve_navigation(&mut self, target: &Target) -> Option<Resolved> {
        match self.try_resolve(target) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                error!("Could not resolve target {target}: {e}");
                self.notifications
                    .push(Notification::error(Operation::Navigate, &e).target(target));
                None
            }
        }
    }

    pub fn resolve_cfi(&self, value: &str) -> Result<Resolved> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ReaderError::Unresolved("no book is open".into()))?;
        session.book.resolve_cfi(value)
    }

    /// Shows `resolved` and handles what the renderer reports.
    fn commit(&mut self, resolved: &Resolved) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if let Err(e) = session.renderer.go_to(resolved) {
            error!("Could not go to section {}: {e}", resolved.index);
            self.notifications
                .push(Notification::error(Operation::Navigate, &e).section(resolved.index));
            return false;
        }
        self.pump();
        true
    }

    fn navigate(&mut self, target: Target, select: bool) -> Option<Resolved> {
        let Some(ticket) = self.nav.begin(&target.key()) else {
            debug!("Navigation to {target} already pending");
            return None;
        };
        let resolved = self.resolve_navigation(&target).map(|mut r| {
            r.select = select;
            r
        });
        let landed = resolved.as_ref().is_some_and(|r| self.commit(r));
        if !self.nav.finish(ticket) || !landed {
            return None;
        }
        self.history.push_state(target);
        resolved
    }

    /// Whether a navigation is between resolving and landing. Always false
    /// once a `View` method has returned.
    pub fn is_navigating(&self) -> bool {
        self.nav.is_pending()
    }

    pub fn go_to(&mut self, target: impl Into<Target>) -> Option<Resolved> {
        self.navigate(target.into(), false)
    }

    /// Like [`go_to`](Self::go_to), and selects the anchor once shown.
    pub fn select(&mut self, target: impl Into<Target>) -> Option<Resolved> {
        self.navigate(target.into(), true)
    }

    pub fn go_to_fraction(&mut self, fraction: f64) -> Option<Resolved> {
        self.navigate(Target::fraction(fraction), false)
    }

    pub fn deselect(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.renderer.deselect();
        }
    }

    fn turn(&mut self, turn: fn(&mut dyn Renderer) -> Result<()>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = turn(session.renderer.as_mut()) {
            error!("Page turn failed: {e}");
            let section = self.last_location.as_ref().map(|l| l.index);
            self.notifications
                .push(Notification::error(Operation::TurnPage, &e).section_opt(section));
        }
        self.pump();
    }

    pub fn next(&mut self) {
        self.turn(|r| r.next());
    }

    pub fn prev(&mut self) {
        self.turn(|r| r.prev());
    }

    pub fn go_left(&mut self) {
        self.turn(|r| r.go_left());
    }

    pub fn go_right(&mut self) {
        self.turn(|r| r.go_right());
    }

    /// Steps back through the history without recording a new entry.
    pub fn back(&mut self) -> bool {
        match self.history.back().cloned() {
            Some(target) => self.revisit(&target),
            None => false,
        }
    }

    pub fn forward(&mut self) -> bool {
        match self.history.forward().cloned() {
            Some(target) => self.revisit(&target),
            None => false,
        }
    }

    fn revisit(&mut self, target: &Target) -> bool {
        self.resolve_navigation(target)
            .is_some_and(|resolved| self.commit(&resolved))
    }

    pub fn set_style(&mut self, style: LayoutStyle) {
        if let Some(session) = self.session.as_mut() {
            session.renderer.set_style(&style);
        }
        self.options.style = style;
        self.pump();
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        if let Some(session) = self.session.as_mut() {
            session.renderer.set_viewport(viewport);
        }
        self.options.viewport = viewport;
        self.pump();
    }

    pub fn set_zoom(&mut self, zoom: Zoom) {
        if let Some(session) = self.session.as_mut() {
            session.renderer.set_zoom(zoom);
        }
        self.options.zoom = zoom;
        self.pump();
    }

    /// Handles everything the renderer queued since the last call.
    fn pump(&mut self) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let events = session.renderer.take_events();
            if events.is_empty() {
                return;
            }
            for event in events {
                match event {
                    RendererEvent::Load { index } => self.on_load(index),
                    RendererEvent::CreateOverlayer { index } => self.create_overlayer(index),
                    RendererEvent::Relocate(detail) => self.on_relocate(detail),
                }
            }
        }
    }

    fn on_load(&mut self, index: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(doc) = session.renderer.document_mut(index)
            && let Some(root) = doc.document_element()
        {
            let language = session.language.as_ref();
            if let Some(language) = language
                && doc.attr(root, "lang").is_none_or(str::is_empty)
            {
                doc.set_attr(root, "lang", &language.canonical);
            }
            if let Some(dir) = language.filter(|l| !l.is_cjk).and_then(|l| l.direction)
                && doc.attr(root, "dir").is_none_or(str::is_empty)
            {
                doc.set_attr(root, "dir", dir.as_str());
            }
        }
        let contents = session.renderer.contents();
        if let Some(contents) = contents.iter().find(|c| c.index == index) {
            self.events
                .emit(&mut Event::new(Detail::Load { index, doc: contents.doc }));
        }
    }

    fn create_overlayer(&mut self, index: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.renderer.attach_overlayer(index, Overlayer::new());
        self.events
            .emit(&mut Event::new(Detail::CreateOverlayer { index }));
        let hits = self.search_results.get(&index).cloned().unwrap_or_default();
        for value in hits {
            self.add_annotation(&value);
        }
        self.events
            .emit(&mut Event::new(Detail::CreateOverlay { index }));
    }

    fn on_relocate(&mut self, detail: RelocateDetail) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let RelocateDetail {
            reason,
            range,
            index,
            fraction,
            size,
        } = detail;
        let contents = session.renderer.contents();
        let doc = contents.iter().find(|c| c.index == index).map(|c| c.doc);
        let at = doc.zip(range.as_ref());
        let progress = session.section_progress.get_progress(index, fraction, size);
        let location = Location {
            reason: Some(reason),
            index,
            fraction: progress.fraction,
            size,
            section: progress.section,
            location: progress.location,
            time: progress.time,
            toc_item: session.toc_progress.get_progress(index, at).cloned(),
            page_item: session.page_progress.get_progress(index, at).cloned(),
            cfi: session.book.cfi_of(index, at),
            range,
        };
        drop(contents);
        if reason.is_passive() {
            self.history.replace_state(Target::Link(location.cfi.clone()));
        }
        debug!("Relocated ({reason:?}) to {}", location.cfi);
        self.events.emit(&mut Event::new(Detail::Relocate(&location)));
        self.last_location = Some(location);
    }

    /// Runs `f` on the loaded document of section `index`, or on a fresh one
    /// when the section is not shown.
    fn with_document<R>(&self, index: usize, f: impl FnOnce(&Document) -> R) -> Option<R> {
        let session = self.session.as_ref()?;
        let contents = session.renderer.contents();
        if let Some(c) = contents.iter().find(|c| c.index == index) {
            return Some(f(c.doc));
        }
        let doc = session.book.sections.get(index)?.create_document().ok()?;
        Some(f(&doc))
    }

    pub fn get_cfi(&self, index: usize, range: Option<&Range>) -> Option<String> {
        let book = self.book()?;
        match range {
            Some(range) => self.with_document(index, |doc| book.cfi_of(index, Some((doc, range)))),
            None => Some(book.cfi_of(index, None)),
        }
    }

    /// Cumulative section boundaries, nudged up so ticks land inside the
    /// section they start.
    pub fn get_section_fractions(&self) -> Vec<f64> {
        self.session
            .as_ref()
            .map(|s| {
                s.section_progress
                    .section_fractions()
                    .iter()
                    .map(|f| f + f64::EPSILON)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// TOC and page-list entries covering `range` in section `index`.
    pub fn get_progress_of(&self, index: usize, range: Option<&Range>) -> (Option<TocItem>, Option<TocItem>) {
        let Some(session) = self.session.as_ref() else {
            return (None, None);
        };
        let lookup = |at: Option<(&Document, &Range)>| {
            (
                session.toc_progress.get_progress(index, at).cloned(),
                session.page_progress.get_progress(index, at).cloned(),
            )
        };
        match range {
            Some(range) => self
                .with_document(index, |doc| lookup(Some((doc, range))))
                .unwrap_or((None, None)),
            None => lookup(None),
        }
    }

    pub fn get_toc_item_of(&self, target: &Target) -> Option<TocItem> {
        let session = self.session.as_ref()?;
        let resolved = match self.try_resolve(target) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Could not get TOC item of {target}: {e}");
                return None;
            }
        };
        let doc = session
            .book
            .sections
            .get(resolved.index)?
            .create_document()
            .ok()?;
        let range = match resolved.anchor.resolve(&doc) {
            Some(AnchorPosition::Range(range)) => range,
            _ => Range::select_node_contents(&doc, doc.body()?),
        };
        session
            .toc_progress
            .get_progress(resolved.index, Some((&doc, &range)))
            .cloned()
    }

    /// Handles activation of a link in section `index`. Returns whether the
    /// default action ran.
    pub fn click_link(&mut self, index: usize, href: &str) -> bool {
        let Some(book) = self.book().cloned() else {
            return false;
        };
        let href = book
            .sections
            .get(index)
            .map_or_else(|| href.to_string(), |s| s.resolve_href(href));
        if is_external(&href) {
            let proceed = self
                .events
                .emit(&mut Event::cancelable(Detail::ExternalLink { href: &href }));
            if proceed && let Err(e) = open::that(&href) {
                error!("Failed to open external link {href}: {e}");
                self.notifications.push(
                    Notification::error(Operation::FollowLink, &e)
                        .target(&href)
                        .section(index),
                );
            }
            proceed
        } else {
            let proceed = self
                .events
                .emit(&mut Event::cancelable(Detail::Link { index, href: &href }));
            if proceed {
                self.go_to(Target::Link(href.clone()));
            }
            proceed
        }
    }

    /// Hit-tests the overlay of section `index` at view coordinates. Clicks
    /// on annotations other than search hits emit `show-annotation`.
    pub fn click_overlay(&mut self, index: usize, x: f64, y: f64) -> Option<(String, Range)> {
        let session = self.session.as_mut()?;
        let (value, range) = session.renderer.overlay(index)?.hit_test(x, y)?;
        if !value.starts_with(SEARCH_PREFIX) {
            self.events.emit(&mut Event::new(Detail::ShowAnnotation {
                index,
                value: &value,
                range: &range,
            }));
        }
        Some((value, range))
    }

    /// Draws the annotation keyed by `value` (a CFI, or a search hit key).
    /// Returns the section index and the label of its TOC entry.
    pub fn add_annotation(&mut self, value: &str) -> Option<(usize, String)> {
        self.annotate(value, false)
    }

    pub fn delete_annotation(&mut self, value: &str) -> Option<(usize, String)> {
        self.annotate(value, true)
    }

    fn annotate(&mut self, value: &str, remove: bool) -> Option<(usize, String)> {
        let search_hit = value.strip_prefix(SEARCH_PREFIX);
        let target = Target::Link(search_hit.unwrap_or(value).to_string());
        let resolved = match self.try_resolve(&target) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Skipping annotation {value}: {e}");
                return None;
            }
        };
        let index = resolved.index;
        let session = self.session.as_mut()?;
        if let Some(mut surface) = session.renderer.overlay(index) {
            let doc = surface.geometry.doc;
            surface.remove(value);
            let range = resolved.anchor.to_range(doc);
            match (remove, range) {
                (true, _) => {}
                (false, None) => debug!("Annotation {value} does not resolve to a range"),
                (false, Some(range)) if search_hit.is_some() => {
                    surface.add(value, range.into(), Rc::new(outline), DrawOptions::default());
                }
                (false, Some(range)) => {
                    let mut event = Event::new(Detail::DrawAnnotation {
                        index,
                        value,
                        range: &range,
                        doc,
                    });
                    self.events.emit(&mut event);
                    if let Some((draw, options)) = event.take_draw() {
                        surface.add(value, range.into(), draw, options);
                    }
                }
            }
        }
        if search_hit.is_some() {
            return None;
        }
        let label = session
            .toc_progress
            .get_progress(index, None)
            .map(|item| item.label.clone())
            .unwrap_or_default();
        Some((index, label))
    }

    /// Navigates to an annotation and emits `show-annotation` for it.
    pub fn show_annotation(&mut self, value: &str) -> Option<Resolved> {
        let resolved = self.go_to(Target::Link(value.to_string()))?;
        let session = self.session.as_ref()?;
        let contents = session.renderer.contents();
        let shown = contents
            .iter()
            .find(|c| c.index == resolved.index && c.overlayer.is_some())
            .and_then(|c| resolved.anchor.to_range(c.doc));
        drop(contents);
        if let Some(range) = shown {
            self.events.emit(&mut Event::new(Detail::ShowAnnotation {
                index: resolved.index,
                value,
                range: &range,
            }));
        }
        Some(resolved)
    }

    /// Starts a search over the whole book, or over section `index`. Matches
    /// are drawn as they are found; earlier results are cleared first.
    pub fn search(&mut self, query: &str, mut options: SearchOptions, index: Option<usize>) -> ViewSearch<'_> {
        self.clear_search();
        if options.default_locale.is_none() {
            options.default_locale = self.language().map(|l| l.canonical.clone());
        }
        let matcher = SearchMatcher::new(options);
        let inner = self.book().cloned().map(|book| match index {
            Some(index) => BookSearch::section(book, matcher, query, index),
            None => BookSearch::new(book, matcher, query),
        });
        if let Some(index) = index {
            self.search_results.insert(index, Vec::new());
        }
        ViewSearch {
            view: self,
            inner,
            index,
            done: false,
        }
    }

    pub fn clear_search(&mut self) {
        let values: Vec<String> = std::mem::take(&mut self.search_results)
            .into_values()
            .flatten()
            .collect();
        for value in values {
            self.delete_annotation(&value);
        }
    }

    /// Labels from the top-level TOC entry down to `item`.
    pub fn toc_path(&self, item: &TocItem) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| s.toc_progress.path_of(item.id))
            .unwrap_or_default()
    }

    fn section_label(&self, index: usize) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.toc_progress.get_progress(index, None))
            .map(|item| item.label.clone())
            .unwrap_or_default()
    }
}

/// What a running search reports to its caller.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchUpdate {
    Progress(f64),
    /// Matches of one section, labelled with its TOC entry.
    Section { label: String, subitems: Vec<SearchHit> },
    Hit(SearchHit),
    Done,
}

/// A search in progress, see [`View::search`].
pub struct ViewSearch<'v> {
    view: &'v mut View,
    inner: Option<BookSearch>,
    index: Option<usize>,
    done: bool,
}

impl Iterator for ViewSearch<'_> {
    type Item = SearchUpdate;

    fn next(&mut self) -> Option<SearchUpdate> {
        if self.done {
            return None;
        }
        let Some(event) = self.inner.as_mut().and_then(Iterator::next) else {
            self.done = true;
            return Some(SearchUpdate::Done);
        };
        Some(match event {
            SearchEvent::Progress { progress } => SearchUpdate::Progress(progress),
            SearchEvent::Section { index, subitems } => {
                let values: Vec<String> = subitems
                    .iter()
                    .map(|hit| format!("{SEARCH_PREFIX}{}", hit.cfi))
                    .collect();
                for value in &values {
                    self.view.add_annotation(value);
                }
                self.view.search_results.insert(index, values);
                SearchUpdate::Section {
                    label: self.view.section_label(index),
                    subitems,
                }
            }
            SearchEvent::Hit(hit) => {
                let value = format!("{SEARCH_PREFIX}{}", hit.cfi);
                self.view.add_annotation(&value);
                if let Some(index) = self.index {
                    self.view.search_results.entry(index).or_default().push(value);
                }
                SearchUpdate::Hit(hit)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::events::Reason;
    use crate::notification::NotificationLevel;
    use crate::overlay::highlight;
    use crate::test_utils::test_helpers::{BookBuilder, SMALL_VIEWPORT, paragraphs};

    fn view(book: Book) -> View {
        let mut view = View::new(ViewOptions {
            viewport: SMALL_VIEWPORT,
            ..Default::default()
        });
        view.open(book);
        view
    }

    fn toc_book() -> Book {
        BookBuilder::new()
            .sections(3, 10)
            .toc(vec![
                TocItem::new("One", "s0.xhtml"),
                TocItem::new("Two", "s1.xhtml"),
                TocItem::new("Three", "s2.xhtml"),
            ])
            .build()
    }

    fn overlay_keys(view: &View, index: usize) -> Vec<String> {
        view.renderer()
            .map(|r| r.contents())
            .unwrap_or_default()
            .iter()
            .filter(|c| c.index == index)
            .filter_map(|c| c.overlayer)
            .flat_map(|o| o.keys().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_init_shows_first_page_and_reports_location() {
        let mut view = view(toc_book());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        view.on(EventKind::Relocate, move |event| {
            if let Detail::Relocate(location) = event.detail {
                log.borrow_mut().push(location.clone());
            }
        });
        view.init(None, false);

        let location = view.last_location().unwrap();
        assert_eq!(location.index, 0);
        assert_eq!(location.reason, Some(Reason::Page));
        assert_eq!(location.section.total, 3);
        assert_eq!(location.toc_item.as_ref().unwrap().label, "One");
        assert!(location.cfi.starts_with("epubcfi("));
        assert_eq!(seen.borrow().len(), 1);
        // The page turn replaced the initial entry with its CFI.
        assert_eq!(view.history().len(), 1);
        assert_eq!(view.history().current(), Some(&Target::Link(location.cfi.clone())));
    }

    #[test]
    fn test_go_to_and_history() {
        let mut view = view(toc_book());
        view.init(None, false);
        let resolved = view.go_to("s1.xhtml#p5").unwrap();
        assert_eq!(resolved.index, 1);
        let location = view.last_location().unwrap();
        assert_eq!((location.index, location.reason), (1, Some(Reason::Goto)));
        assert_eq!(location.toc_item.as_ref().unwrap().label, "Two");

        view.go_to(2);
        assert_eq!(view.last_location().unwrap().index, 2);
        assert!(view.back());
        assert_eq!(view.last_location().unwrap().index, 1);
        assert!(view.forward());
        assert_eq!(view.last_location().unwrap().index, 2);
        assert!(!view.forward());
    }

    #[test]
    fn test_failed_navigation_is_reported_not_applied() {
        let mut view = view(toc_book());
        view.init(None, false);
        let before = view.last_location().cloned();
        assert!(view.go_to("missing.xhtml").is_none());
        assert!(view.go_to(9).is_none());
        assert!(view.go_to("s1.xhtml#nowhere").is_none());
        assert_eq!(view.last_location().cloned(), before);
        assert_eq!(view.history().len(), 1);

        let failures: Vec<(Option<&str>, Option<usize>)> = view
            .notifications()
            .of(Operation::Navigate)
            .map(|n| (n.target.as_deref(), n.section))
            .collect();
        assert_eq!(
            failures,
            [(None, Some(1)), (Some("section 9"), None), (Some("missing.xhtml"), None)]
        );
        let latest = view.notifications().latest().unwrap().to_string();
        assert!(latest.starts_with("could not go to section 2: "), "{latest}");
    }

    #[test]
    fn test_navigations_run_one_at_a_time() {
        let mut view = view(toc_book());
        view.init(None, false);
        let relocations = Rc::new(RefCell::new(Vec::new()));
        let log = relocations.clone();
        view.on(EventKind::Relocate, move |event| {
            if let Detail::Relocate(location) = event.detail {
                log.borrow_mut().push((location.index, location.reason));
            }
        });

        // Each call lands before returning, so repeating a destination or
        // failing one never leaves the guard held.
        assert!(view.go_to("s1.xhtml#p5").is_some());
        assert!(!view.is_navigating());
        assert!(view.go_to("s1.xhtml#p5").is_some());
        assert!(view.go_to("s1.xhtml#nowhere").is_none());
        assert!(!view.is_navigating());
        assert!(view.go_to_fraction(0.99).is_some());
        assert!(!view.is_navigating());

        let goto = Some(Reason::Goto);
        assert_eq!(*relocations.borrow(), vec![(1, goto), (1, goto), (2, goto)]);
        assert_eq!(view.last_location().unwrap().index, 2);
    }

    #[test]
    fn test_section_load_events_in_order() {
        let mut view = view(toc_book());
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Load, EventKind::CreateOverlayer, EventKind::CreateOverlay] {
            let log = seen.clone();
            view.on(kind, move |event| {
                let index = match event.detail {
                    Detail::Load { index, .. }
                    | Detail::CreateOverlayer { index }
                    | Detail::CreateOverlay { index } => index,
                    _ => return,
                };
                log.borrow_mut().push((event.kind().name(), index));
            });
        }
        view.go_to(1);
        view.go_to("s1.xhtml#p5");
        assert_eq!(
            *seen.borrow(),
            vec![("load", 1), ("create-overlayer", 1), ("create-overlay", 1)]
        );
    }

    #[test]
    fn test_fraction_navigation_and_section_fractions() {
        let mut view = view(toc_book());
        let fractions = view.get_section_fractions();
        assert_eq!(fractions.len(), 4);
        assert!(fractions[1] > 1.0 / 3.0);
        view.go_to_fraction(0.5);
        let location = view.last_location().unwrap();
        assert_eq!(location.index, 1);
        assert!((location.fraction - 0.5).abs() < 0.2);
    }

    #[test]
    fn test_text_start_prefers_first_linear_section() {
        let book = BookBuilder::new()
            .non_linear(paragraphs(1))
            .sections(1, 2)
            .build();
        let mut view = view(book);
        view.init(None, true);
        assert_eq!(view.last_location().unwrap().index, 1);
    }

    #[test]
    fn test_init_restores_saved_location() {
        let mut view = view(toc_book());
        view.init(Some(Target::link("s2.xhtml")), false);
        assert_eq!(view.last_location().unwrap().index, 2);
        assert_eq!(view.history().current(), Some(&Target::link("s2.xhtml")));

        let mut view = view_of_bad_start();
        assert_eq!(view.last_location().map(|l| l.index), Some(0));
        view.close();
        assert!(view.last_location().is_none());
        assert!(view.history().is_empty());
    }

    fn view_of_bad_start() -> View {
        let mut view = view(toc_book());
        view.init(Some(Target::link("nowhere.xhtml")), false);
        view
    }

    #[test]
    fn test_load_fills_in_language_and_direction() {
        let mut view = view(BookBuilder::new().sections(1, 2).language("ar").build());
        let langs = Rc::new(RefCell::new(Vec::new()));
        let log = langs.clone();
        view.on(EventKind::Load, move |event| {
            if let Detail::Load { doc, .. } = event.detail {
                let root = doc.document_element().unwrap();
                log.borrow_mut().push((
                    doc.attr(root, "lang").map(str::to_string),
                    doc.attr(root, "dir").map(str::to_string),
                ));
            }
        });
        view.next();
        assert_eq!(*langs.borrow(), vec![(Some("ar".into()), Some("rtl".into()))]);

        let mut view = view_with_language("zh-hant");
        view.next();
        let contents = view.renderer().unwrap().contents();
        let doc = contents[0].doc;
        let root = doc.document_element().unwrap();
        assert_eq!(doc.attr(root, "lang"), Some("zh-Hant"));
        assert_eq!(doc.attr(root, "dir"), None);
        assert!(view.notifications().is_empty());

        let mut view = view_with_language("en--US");
        view.next();
        assert!(view.language().is_none());
        let warning = view.notifications().latest().unwrap();
        assert_eq!(
            (warning.level, warning.operation, warning.target.as_deref()),
            (NotificationLevel::Warning, Operation::Open, Some("en--US"))
        );
    }

    fn view_with_language(language: &str) -> View {
        view(BookBuilder::new().sections(1, 2).language(language).build())
    }

    #[test]
    fn test_link_clicks() {
        let mut view = view(toc_book());
        view.init(None, false);
        let external = Rc::new(RefCell::new(Vec::new()));
        let log = external.clone();
        view.on(EventKind::ExternalLink, move |event| {
            if let Detail::ExternalLink { href } = event.detail {
                log.borrow_mut().push(href.to_string());
            }
            event.prevent_default();
        });
        assert!(!view.click_link(0, "https://example.com/"));
        assert_eq!(*external.borrow(), vec!["https://example.com/".to_string()]);

        assert!(view.click_link(0, "s2.xhtml#p1"));
        assert_eq!(view.last_location().unwrap().index, 2);

        view.on(EventKind::Link, |event| event.prevent_default());
        assert!(!view.click_link(2, "#p9"));
        assert_eq!(view.last_location().unwrap().index, 2);
    }

    #[test]
    fn test_annotations_are_drawn_on_request() {
        let mut view = view(toc_book());
        view.go_to(1);
        view.on(EventKind::DrawAnnotation, |event| {
            event.draw(Rc::new(highlight), DrawOptions::color("yellow"));
        });
        let shown = Rc::new(RefCell::new(0));
        let count = shown.clone();
        view.on(EventKind::ShowAnnotation, move |_| *count.borrow_mut() += 1);

        let cfi = view.book().unwrap().clone().sections[1]
            .create_document()
            .map(|doc| {
                let p = doc.element_by_id("p1").unwrap();
                let range = Range::select_node_contents(&doc, p);
                view.book().unwrap().cfi_of(1, Some((&doc, &range)))
            })
            .unwrap();
        assert_eq!(view.add_annotation(&cfi), Some((1, "Two".to_string())));
        assert_eq!(overlay_keys(&view, 1), vec![cfi.clone()]);

        view.show_annotation(&cfi);
        assert_eq!(*shown.borrow(), 1);

        view.delete_annotation(&cfi);
        assert!(overlay_keys(&view, 1).is_empty());
        assert_eq!(view.add_annotation("epubcfi(/6/40!/4)"), None);
    }

    #[test]
    fn test_search_marks_and_clears_hits() {
        let mut view = view(toc_book());
        view.go_to(0);
        let updates: Vec<SearchUpdate> = view
            .search("Paragraph 3", SearchOptions::default(), None)
            .collect();
        let sections: Vec<&String> = updates
            .iter()
            .filter_map(|u| match u {
                SearchUpdate::Section { label, .. } => Some(label),
                _ => None,
            })
            .collect();
        assert_eq!(sections, ["One", "Two", "Three"]);
        assert_eq!(updates.last(), Some(&SearchUpdate::Done));

        let keys = overlay_keys(&view, 0);
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with(SEARCH_PREFIX));

        // Hits are redrawn when their section is shown again.
        view.go_to(1);
        assert_eq!(overlay_keys(&view, 1).len(), 1);

        view.clear_search();
        assert!(overlay_keys(&view, 1).is_empty());
    }

    #[test]
    fn test_single_section_search_yields_hits() {
        let mut view = view(toc_book());
        view.go_to(2);
        let hits = view
            .search("chapter", SearchOptions::default(), Some(2))
            .filter(|u| matches!(u, SearchUpdate::Hit(_)))
            .count();
        assert_eq!(hits, 10);
        assert_eq!(overlay_keys(&view, 2).len(), 10);
        let found = view
            .search("", SearchOptions::default(), None)
            .any(|u| match u {
                SearchUpdate::Hit(_) => true,
                SearchUpdate::Section { subitems, .. } => !subitems.is_empty(),
                _ => false,
            });
        assert!(!found);
    }

    #[test]
    fn test_fixed_layout_book_uses_spreads() {
        let book = BookBuilder::new().page(None).page(None).page(None).build();
        let mut view = view(book);
        assert!(view.is_fixed_layout());
        view.init(None, false);
        let location = view.last_location().unwrap();
        assert_eq!(location.index, 0);
        assert!(location.range.is_none());
        view.go_to(2);
        assert_eq!(view.last_location().unwrap().index, 2);
    }

    #[test]
    fn test_toc_item_of_target() {
        let view = view(toc_book());
        let item = view.get_toc_item_of(&Target::link("s2.xhtml#p4")).unwrap();
        assert_eq!(item.label, "Three");
        assert!(view.get_toc_item_of(&Target::link("nope.xhtml")).is_none());
    }
}
