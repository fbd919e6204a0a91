//! Owns one [`View`] and the book open in it, keyed by where the book came
//! from. Only one open may be in flight at a time.

use std::path::Path;

use log::{info, warn};

use crate::book::Book;
use crate::error::Result;
use crate::format;
use crate::notification::{Notification, Operation};
use crate::view::{View, ViewOptions};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenState {
    Closed,
    Opening(String),
    Open(String),
}

/// What became of a request to open a book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// The key was already open or opening; nothing changed.
    AlreadyOpen,
    /// Another key is being opened; the request was dropped.
    Busy,
}

/// Handed out by [`ReaderSession::begin_open`] and redeemed by
/// [`ReaderSession::finish_open`].
#[derive(Debug, PartialEq, Eq)]
pub struct OpenTicket {
    key: String,
}

impl OpenTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct ReaderSession {
    view: View,
    state: OpenState,
}

impl Default for ReaderSession {
    fn default() -> Self {
        Self::new(ViewOptions::default())
    }
}

impl ReaderSession {
    pub fn new(options: ViewOptions) -> Self {
        Self {
            view: View::new(options),
            state: OpenState::Closed,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn state(&self) -> &OpenState {
        &self.state
    }

    pub fn current_key(&self) -> Option<&str> {
        match &self.state {
            OpenState::Open(key) => Some(key),
            _ => None,
        }
    }

    /// Claims the session for `key`. Returns `Err` with the outcome when the
    /// request must be dropped.
    pub fn begin_open(&mut self, key: &str) -> std::result::Result<OpenTicket, OpenOutcome> {
        match &self.state {
            OpenState::Opening(pending) | OpenState::Open(pending) if pending == key => {
                info!("Ignoring repeated open of {key}");
                Err(OpenOutcome::AlreadyOpen)
            }
            OpenState::Opening(pending) => {
                warn!("Refusing to open {key} while {pending} is still opening");
                Err(OpenOutcome::Busy)
            }
            _ => {
                self.state = OpenState::Opening(key.to_string());
                Ok(OpenTicket {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Completes an open started with [`begin_open`](Self::begin_open). A
    /// failed load leaves the session closed.
    pub fn finish_open(&mut self, ticket: OpenTicket, loaded: Result<Book>) -> Result<OpenOutcome> {
        if self.state != OpenState::Opening(ticket.key.clone()) {
            warn!("Discarding stale open of {}", ticket.key);
            return Ok(OpenOutcome::Busy);
        }
        match loaded {
            Ok(book) => {
                self.view.open(book);
                self.state = OpenState::Open(ticket.key);
                Ok(OpenOutcome::Opened)
            }
            Err(e) => {
                self.view.close();
                self.state = OpenState::Closed;
                self.view
                    .notifications_mut()
                    .push(Notification::error(Operation::Open, &e).target(&ticket.key));
                Err(e)
            }
        }
    }

    pub fn open<F>(&mut self, key: &str, loader: F) -> Result<OpenOutcome>
    where
        F: FnOnce() -> Result<Book>,
    {
        match self.begin_open(key) {
            Ok(ticket) => self.finish_open(ticket, loader()),
            Err(outcome) => Ok(outcome),
        }
    }

    /// Opens a file or directory, keyed by its path.
    pub fn open_path(&mut self, path: &Path) -> Result<OpenOutcome> {
        let key = path.to_string_lossy().into_owned();
        self.open(&key, || format::load_book(path))
    }

    pub fn close(&mut self) {
        self.view.close();
        self.state = OpenState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::test_utils::test_helpers::BookBuilder;

    fn book() -> Result<Book> {
        Ok(BookBuilder::new().sections(2, 3).build())
    }

    #[test]
    fn test_open_is_idempotent_per_key() {
        let mut session = ReaderSession::default();
        assert_eq!(session.open("a", book).unwrap(), OpenOutcome::Opened);
        assert_eq!(session.current_key(), Some("a"));
        let mut called = false;
        let outcome = session
            .open("a", || {
                called = true;
                book()
            })
            .unwrap();
        assert_eq!(outcome, OpenOutcome::AlreadyOpen);
        assert!(!called);

        assert_eq!(session.open("b", book).unwrap(), OpenOutcome::Opened);
        assert_eq!(session.current_key(), Some("b"));
    }

    #[test]
    fn test_other_key_is_refused_while_opening() {
        let mut session = ReaderSession::default();
        let ticket = session.begin_open("a").unwrap();
        assert_eq!(session.begin_open("a"), Err(OpenOutcome::AlreadyOpen));
        assert_eq!(session.begin_open("b"), Err(OpenOutcome::Busy));
        assert_eq!(session.finish_open(ticket, book()).unwrap(), OpenOutcome::Opened);
        assert!(session.view().book().is_some());
    }

    #[test]
    fn test_failed_open_leaves_session_closed() {
        let mut session = ReaderSession::default();
        session.open("a", book).unwrap();
        let err = session
            .open("b", || Err(ReaderError::NotFound("b".into())))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), &OpenState::Closed);
        assert!(session.view().book().is_none());
        let failure = session.view().notifications().latest().unwrap();
        assert_eq!(failure.operation, Operation::Open);
        assert_eq!(failure.target.as_deref(), Some("b"));

        session.open("a", book).unwrap();
        session.close();
        assert_eq!(session.current_key(), None);
    }
}
