//! Error taxonomy shared by the loading, addressing and navigation layers.

/// Errors surfaced by the reading engine.
///
/// The first three variants are the user-facing failures of opening a book;
/// the rest come from addressing and navigation and are normally caught at the
/// [`View`](crate::view::View) boundary.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Source bytes are unavailable (empty file, expired transient reference).
    #[error("not found: {0}")]
    NotFound(String),

    /// The container was recognised but no format handler accepts it.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// A remote fetch failed.
    #[error("request failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Response {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid CFI: {0}")]
    InvalidCfi(String),

    /// A navigation target could not be mapped to a section.
    #[error("could not resolve target: {0}")]
    Unresolved(String),

    /// A section document could not be produced.
    #[error("document error: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReaderError {
    pub fn response(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            message: message.into(),
        }
    }

    /// True for failures that stop a book from opening at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::UnsupportedType(_) | Self::Response { .. } | Self::Io(_)
        )
    }
}

pub type Result<T, E = ReaderError> = std::result::Result<T, E>;
