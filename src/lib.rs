//! Pagination, location and navigation engine for e-book readers.
//!
//! A [`view::View`] opens a [`book::Book`] in either the reflowable
//! [`paginator::Paginator`] or the [`fixed_layout::FixedLayout`] spread
//! renderer, and reports every move as a [`events::Location`] carrying whole
//! book progress, the current TOC entry and a CFI.

pub mod book;
pub mod bookmark;
pub mod cfi;
pub mod dom;
pub mod error;
pub mod events;
pub mod fixed_layout;
pub mod format;
pub mod geometry;
pub mod history;
pub mod layout;
pub mod navigation;
pub mod notification;
pub mod overlay;
pub mod paginator;
pub mod panic_handler;
pub mod progress;
pub mod renderer;
pub mod search;
pub mod session;
pub mod settings;
pub mod view;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use book::Book;
pub use error::{ReaderError, Result};
pub use events::Location;
pub use navigation::Target;
pub use session::ReaderSession;
pub use view::{View, ViewOptions};
