//! Errors returned by this crate.

use thiserror::Error;

/// Errors that may occur while building or loading a binary profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid profile json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed method descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("external parser exited with {status}: {stderr}")]
    ParserFailed { status: i32, stderr: String },

    #[error("external parser produced no usable output for {0}")]
    EmptyParse(String),
}
