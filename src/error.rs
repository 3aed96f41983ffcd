//! Error taxonomy surfaced to hosts.
//!
//! Every public engine operation returns [`RagError`]. Hosts usually only
//! need [`RagError::kind`] to decide what to show or whether to offer a
//! retry; the `Display` text carries the details.

use thiserror::Error;

/// Coarse classification of a [`RagError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigIncomplete,
    PdfUnavailable,
    PdfParse,
    Upstream,
    EmptyCompletion,
    Internal,
    Cancelled,
}

/// Errors produced by the RAG pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// Required configuration is missing or out of range. Not retried.
    #[error("configuration incomplete: {0}")]
    ConfigIncomplete(String),

    /// The host could not produce bytes for the PDF reference.
    #[error("could not load PDF '{pdf}': {reason}")]
    PdfUnavailable { pdf: String, reason: String },

    /// The PDF could not be parsed.
    #[error("PDF parsing failed: {0}")]
    PdfParse(String),

    /// Network, HTTP, or timeout failure talking to a model server.
    #[error("{}", upstream_message(.status, .message))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// The chat backend answered without any content.
    #[error("chat model returned an empty completion")]
    EmptyCompletion,

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller cancelled the turn before it was committed.
    #[error("request cancelled")]
    Cancelled,
}

fn upstream_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("upstream error (HTTP {}): {}", code, message),
        None => format!("upstream error: {}", message),
    }
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::ConfigIncomplete(_) => ErrorKind::ConfigIncomplete,
            RagError::PdfUnavailable { .. } => ErrorKind::PdfUnavailable,
            RagError::PdfParse(_) => ErrorKind::PdfParse,
            RagError::Upstream { .. } => ErrorKind::Upstream,
            RagError::EmptyCompletion => ErrorKind::EmptyCompletion,
            RagError::Internal(_) => ErrorKind::Internal,
            RagError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status attached to an [`Upstream`](RagError::Upstream) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            RagError::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    pub(crate) fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        RagError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Wrap a runtime-free core error as an invariant violation.
    pub(crate) fn internal(err: impl std::fmt::Display) -> Self {
        RagError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            RagError::upstream(status, format!("request timed out: {}", err))
        } else if err.is_decode() {
            RagError::upstream(status, format!("invalid response body: {}", err))
        } else {
            RagError::upstream(status, err.to_string())
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
