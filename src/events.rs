//! Messages between the renderers, the view and its listeners.
//!
//! Renderers never call back into the view. They queue [`RendererEvent`]s in
//! an [`Outbox`] that the view drains after every call. The view in turn
//! publishes named events on an [`EventBus`]; cancelable ones tell the view
//! whether to run the default action.

use serde::{Deserialize, Serialize};

use crate::dom::{Document, Range};
use crate::overlay::{DrawFn, DrawOptions};
use crate::progress::{Counter, LocationCounter, TimeEstimate, TocItem};

/// Why the visible location changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
    Page,
    Scroll,
    Snap,
    Goto,
}

impl Reason {
    /// Passive relocations overwrite the current history entry instead of
    /// adding one.
    pub fn is_passive(self) -> bool {
        matches!(self, Reason::Page | Reason::Scroll | Reason::Snap)
    }
}

/// Location as reported by a renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RelocateDetail {
    pub reason: Reason,
    /// `None` for fixed-layout spreads.
    pub range: Option<Range>,
    pub index: usize,
    /// Progress within the section.
    pub fraction: f64,
    /// Share of the section one page represents.
    pub size: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RendererEvent {
    Relocate(RelocateDetail),
    /// A section document became available.
    Load { index: usize },
    /// A section document needs an overlay surface.
    CreateOverlayer { index: usize },
}

#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<RendererEvent>,
}

impl Outbox {
    pub fn push(&mut self, event: RendererEvent) {
        self.events.push(event);
    }

    pub fn relocate(&mut self, detail: RelocateDetail) {
        self.push(RendererEvent::Relocate(detail));
    }

    pub fn drain(&mut self) -> Vec<RendererEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A relocation merged with whole-book progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub reason: Option<Reason>,
    pub index: usize,
    /// Whole-book fraction.
    pub fraction: f64,
    pub size: f64,
    pub section: Counter,
    pub location: LocationCounter,
    pub time: TimeEstimate,
    pub toc_item: Option<TocItem>,
    pub page_item: Option<TocItem>,
    pub cfi: String,
    #[serde(skip)]
    pub range: Option<Range>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Relocate,
    Load,
    CreateOverlayer,
    CreateOverlay,
    ExternalLink,
    Link,
    DrawAnnotation,
    ShowAnnotation,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Relocate => "relocate",
            Self::Load => "load",
            Self::CreateOverlayer => "create-overlayer",
            Self::CreateOverlay => "create-overlay",
            Self::ExternalLink => "external-link",
            Self::Link => "link",
            Self::DrawAnnotation => "draw-annotation",
            Self::ShowAnnotation => "show-annotation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Relocate,
            Self::Load,
            Self::CreateOverlayer,
            Self::CreateOverlay,
            Self::ExternalLink,
            Self::Link,
            Self::DrawAnnotation,
            Self::ShowAnnotation,
        ]
        .into_iter()
        .find(|kind| kind.name() == name)
    }
}

pub enum Detail<'a> {
    Relocate(&'a Location),
    Load { index: usize, doc: &'a Document },
    CreateOverlayer { index: usize },
    CreateOverlay { index: usize },
    ExternalLink { href: &'a str },
    Link { index: usize, href: &'a str },
    DrawAnnotation {
        index: usize,
        value: &'a str,
        range: &'a Range,
        doc: &'a Document,
    },
    ShowAnnotation {
        index: usize,
        value: &'a str,
        range: &'a Range,
    },
}

impl Detail<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Relocate(_) => EventKind::Relocate,
            Self::Load { .. } => EventKind::Load,
            Self::CreateOverlayer { .. } => EventKind::CreateOverlayer,
            Self::CreateOverlay { .. } => EventKind::CreateOverlay,
            Self::ExternalLink { .. } => EventKind::ExternalLink,
            Self::Link { .. } => EventKind::Link,
            Self::DrawAnnotation { .. } => EventKind::DrawAnnotation,
            Self::ShowAnnotation { .. } => EventKind::ShowAnnotation,
        }
    }
}

pub struct Event<'a> {
    pub detail: Detail<'a>,
    cancelable: bool,
    default_prevented: bool,
    draw: Option<(DrawFn, DrawOptions)>,
}

impl<'a> Event<'a> {
    pub fn new(detail: Detail<'a>) -> Self {
        Self {
            detail,
            cancelable: false,
            default_prevented: false,
            draw: None,
        }
    }

    pub fn cancelable(detail: Detail<'a>) -> Self {
        Self {
            cancelable: true,
            ..Self::new(detail)
        }
    }

    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }

    /// Has no effect on events that are not cancelable.
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Answers a `draw-annotation` request with the function to draw it.
    pub fn draw(&mut self, draw: DrawFn, options: DrawOptions) {
        self.draw = Some((draw, options));
    }

    pub fn take_draw(&mut self) -> Option<(DrawFn, DrawOptions)> {
        self.draw.take()
    }
}

pub type Listener = Box<dyn FnMut(&mut Event<'_>)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners per event kind, called in registration order.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<(ListenerId, EventKind, Listener)>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, kind, Box::new(listener)));
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _, _)| *listener != id);
        self.listeners.len() != before
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listeners.iter().any(|(_, k, _)| *k == kind)
    }

    /// Dispatches `event`. Returns `false` if a listener prevented the
    /// default action.
    pub fn emit(&mut self, event: &mut Event<'_>) -> bool {
        let kind = event.kind();
        for (_, _, listener) in self.listeners.iter_mut().filter(|(_, k, _)| *k == kind) {
            listener(event);
        }
        !event.default_prevented()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_listeners_only_see_their_kind() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        bus.on(EventKind::Load, move |event| {
            if let Detail::Load { index, .. } = event.detail {
                log.borrow_mut().push(index);
            }
        });
        let doc = Document::new();
        bus.emit(&mut Event::new(Detail::Load { index: 3, doc: &doc }));
        bus.emit(&mut Event::new(Detail::CreateOverlay { index: 4 }));
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn test_cancelable_events() {
        let mut bus = EventBus::new();
        let id = bus.on(EventKind::Link, |event| event.prevent_default());
        assert!(!bus.emit(&mut Event::cancelable(Detail::Link { index: 0, href: "a" })));
        // Plain events cannot be prevented.
        assert!(bus.emit(&mut Event::new(Detail::Link { index: 0, href: "a" })));

        assert!(bus.off(id));
        assert!(!bus.off(id));
        assert!(bus.emit(&mut Event::cancelable(Detail::Link { index: 0, href: "a" })));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::CreateOverlayer.name(), "create-overlayer");
        assert_eq!(EventKind::from_name("external-link"), Some(EventKind::ExternalLink));
        assert_eq!(EventKind::from_name("nope"), None);
    }

    #[test]
    fn test_location_wire_shape() {
        let location = Location {
            reason: Some(Reason::Goto),
            cfi: "epubcfi(/6/2)".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&location).unwrap();
        assert_eq!(json["reason"], "goto");
        assert_eq!(json["cfi"], "epubcfi(/6/2)");
        assert!(json.get("tocItem").is_some());
        assert!(json.get("range").is_none());
    }
}
