//! Error types for the html2pdf-bot library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BotError`] — **Fatal** for the current upload or command: the file was
//!   rejected, nothing is staged, the merge failed, or the workspace could not
//!   be read or written. Returned as `Err(BotError)` from the store, the
//!   pipeline, and the bot dispatcher. Every message is worded so it can be
//!   sent to the user verbatim.
//!
//! * [`DocumentError`] — **Non-fatal**: a single HTML document failed to
//!   render but the rest of the batch is fine. Collected inside
//!   [`crate::output::ConvertOutcome`] and reported back as text.

use crate::pipeline::merge::MergeError;
use crate::workspace::DocumentKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the html2pdf-bot library.
#[derive(Debug, Error)]
pub enum BotError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The uploaded file is neither `.html` nor `.pdf`.
    #[error("'{filename}' was not accepted: only .html and .pdf files can be uploaded.")]
    UnsupportedKind { filename: String },

    /// The uploaded file exceeds the configured size limit.
    #[error("'{filename}' is too large ({size} bytes, limit is {limit} bytes).")]
    UploadTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    // ── Command errors ────────────────────────────────────────────────────
    /// A command was issued with nothing of the required kind staged.
    #[error("No {kind} files uploaded yet. Send some {kind} files first.")]
    NoInput { kind: DocumentKind },

    /// The merger rejected the document set. There is no partial result.
    #[error("Could not merge the PDF files: {0}")]
    Merge(#[from] MergeError),

    // ── Storage errors ────────────────────────────────────────────────────
    /// Workspace allocation, read, write, or cleanup failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Building the zip archive failed.
    #[error("Could not build the archive: {0}")]
    Packaging(String),

    // ── Gateway errors ────────────────────────────────────────────────────
    /// The messaging gateway could not deliver a reply.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BotError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single document.
///
/// The conversion batch continues; the error is reported alongside whatever
/// PDFs were produced.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The staged file could not be read back from the workspace.
    #[error("{file}: could not be read: {detail}")]
    ReadFailed { file: String, detail: String },

    /// The renderer reported an error.
    #[error("{file}: conversion failed: {detail}")]
    RenderFailed { file: String, detail: String },

    /// The renderer did not finish in time and was killed.
    #[error("{file}: conversion timed out after {secs}s")]
    Timeout { file: String, secs: u64 },
}

impl DocumentError {
    /// Source filename the error belongs to.
    pub fn file(&self) -> &str {
        match self {
            DocumentError::ReadFailed { file, .. }
            | DocumentError::RenderFailed { file, .. }
            | DocumentError::Timeout { file, .. } => file,
        }
    }
}

/// A messaging gateway failed to send a text or a file.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);
