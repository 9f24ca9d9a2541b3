//! Error types returned by the few fallible entry points of the crate.

use thiserror::Error;

/// Result alias for session construction and registration calls.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced to callers. Runtime engine faults are never returned;
/// they are reported through [`crate::protocol::SessionEvent`]s instead.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Descriptor metadata failed validation.
    #[error("Invalid video descriptor: {0}")]
    InvalidDescriptor(String),

    /// Stream URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid stream URL '{url}': {reason}")]
    InvalidStreamUrl { url: String, reason: String },

    /// A dismissal listener is already registered for this session.
    #[error("Session dismissal listener already registered")]
    ListenerAlreadyRegistered,

    /// Remote receiver refused to load the media item.
    #[error("Remote load failed: {0}")]
    RemoteLoad(String),

    /// Configuration loading or validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error while reading or writing configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
