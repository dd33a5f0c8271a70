//! Error types for vsn-player
//!
//! Command-path failures are reported to the caller through [`Error`].
//! Failures on the real-time frame path are never surfaced as errors; they
//! show up as missing frames and are counted by the loss counter.

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

/// Main error type for vsn-player
#[derive(Error, Debug)]
pub enum Error {
    /// Operation not valid in the player's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Track string could not be decoded
    #[error("Track decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Track could not be encoded
    #[error("Track encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Engine rejected an operation or failed to open a source
    #[error("Engine error: {0}")]
    Engine(String),

    /// Filter configuration rejected
    #[error("Invalid filters: {0}")]
    Filters(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors bubbled up from shared code
    #[error(transparent)]
    Common(#[from] vsn_common::Error),
}

/// Convenience Result type using vsn-player Error
pub type Result<T> = std::result::Result<T, Error>;
