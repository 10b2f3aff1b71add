//! Error types for datacon-core
//!
//! All fallible public surfaces return [`Result`]. The event-driven parts of
//! the crate report failures through `FailCause` values instead; this type
//! covers the plumbing around them.

use thiserror::Error;

use crate::types::DcId;

/// Errors raised by the controller plumbing and configuration handling.
#[derive(Debug, Error)]
pub enum DataConnectionError {
    /// The controller event loop has shut down and can no longer accept events.
    #[error("controller is not running (event channel closed)")]
    ControllerClosed,

    /// A handle referenced a data connection the controller does not own.
    #[error("no data connection with id {0}")]
    ConnectionNotFound(DcId),
}

pub type Result<T> = std::result::Result<T, DataConnectionError>;
