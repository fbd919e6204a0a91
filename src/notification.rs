//! Failures the view reports to its host instead of propagating, newest
//! first. Each one names what failed and, where known, the target and the
//! section involved.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// The operation a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Navigate,
    TurnPage,
    FollowLink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub operation: Operation,
    /// Book path, navigation target or href, as the caller gave it.
    pub target: Option<String>,
    /// Zero-based section index.
    pub section: Option<usize>,
    /// The underlying error.
    pub detail: String,
}

impl Notification {
    pub fn error(operation: Operation, detail: impl ToString) -> Self {
        Self {
            level: NotificationLevel::Error,
            operation,
            target: None,
            section: None,
            detail: detail.to_string(),
        }
    }

    pub fn warning(operation: Operation, detail: impl ToString) -> Self {
        Self {
            level: NotificationLevel::Warning,
            ..Self::error(operation, detail)
        }
    }

    pub fn target(mut self, target: impl ToString) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn section(mut self, index: usize) -> Self {
        self.section = Some(index);
        self
    }

    pub fn section_opt(mut self, index: Option<usize>) -> Self {
        self.section = index;
        self
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.operation {
            Operation::Open => "could not open",
            Operation::Navigate => "could not go to",
            Operation::TurnPage => "could not turn the page",
            Operation::FollowLink => "could not follow link",
        };
        f.write_str(verb)?;
        if let Some(target) = &self.target {
            write!(f, " {target}")?;
        }
        // Sections are numbered from one for readers.
        match (self.operation, self.section) {
            (Operation::Navigate, Some(index)) if self.target.is_none() => {
                write!(f, " section {}", index + 1)?
            }
            (_, Some(index)) => write!(f, " (section {})", index + 1)?,
            _ => {}
        }
        write!(f, ": {}", self.detail)
    }
}

#[derive(Debug, Default)]
pub struct NotificationManager {
    notifications: Vec<Notification>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        self.notifications.insert(0, notification);
    }

    pub fn latest(&self) -> Option<&Notification> {
        self.notifications.first()
    }

    /// Failures of one kind of operation, newest first.
    pub fn of(&self, operation: Operation) -> impl Iterator<Item = &Notification> {
        self.notifications
            .iter()
            .filter(move |n| n.operation == operation)
    }

    pub fn all(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }
}
