//! Error types for liverelay-media.

use thiserror::Error;

/// Result type for liverelay-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for liverelay-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed box header or layout.
    #[error("Invalid box: {0}")]
    InvalidBox(String),

    /// A box declares a size above the configured ceiling.
    #[error("Box '{box_type}' too large: {size} bytes (max: {max})")]
    BoxTooLarge {
        box_type: String,
        size: u64,
        max: u64,
    },

    /// Unsupported feature.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create an invalid box error.
    pub fn invalid_box(msg: impl Into<String>) -> Self {
        Self::InvalidBox(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
