//! Error types for EDGAR operations.
//!
//! This module defines [`EdgarError`] which covers all error cases that can
//! occur when fetching, parsing, ingesting or persisting EDGAR data.

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during EDGAR operations.
#[derive(Error, Debug)]
pub enum EdgarError {
    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("network error: {0}")]
    Network(String),

    /// The upstream returned a non-2xx status code.
    #[error("unexpected status code {status} from GET {url}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: u16,
        /// The URL that produced the response.
        url: String,
    },

    /// Error decoding JSON, an index file or a date field.
    #[error("parse error: {0}")]
    Parse(String),

    /// Error talking to the database.
    #[error("store error: {0}")]
    Store(String),

    /// A bulk COPY loaded a different number of rows than requested.
    #[error("copied {copied} fact units instead of {expected}")]
    CopyCount {
        /// Rows the store reported as loaded.
        copied: u64,
        /// Rows handed to the COPY.
        expected: u64,
    },

    /// Missing or invalid configuration (environment variables).
    #[error("configuration error: {0}")]
    Config(String),

    /// All retry attempts were spent on retriable upstream failures.
    #[error("tried many times fetch company facts: {source}")]
    RetriesExhausted {
        /// The last retriable error observed.
        source: Box<EdgarError>,
    },

    /// The enclosing task group was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// An error observed through a shared single-flight call.
    #[error(transparent)]
    Shared(Arc<EdgarError>),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl EdgarError {
    /// Returns the HTTP status code when this error (or the error it
    /// shares) is an unexpected-status response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::Shared(inner) => inner.status(),
            Self::RetriesExhausted { source } => source.status(),
            _ => None,
        }
    }

    /// Returns true when this error is an unexpected-status response with
    /// the given code.
    #[must_use]
    pub fn is_status(&self, code: u16) -> bool {
        self.status() == Some(code)
    }
}

/// Result type alias using [`EdgarError`].
pub type Result<T> = std::result::Result<T, EdgarError>;
