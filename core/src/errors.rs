//! Errors returned by this crate.

use thiserror::Error;

/// Errors that may occur while driving profiling or detection.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("profile error: {0}")]
    Profile(#[from] libsift_profile::ProfileError),

    #[error("index construction failed: {0}")]
    Index(#[from] libsift_lsh::LshError),

    #[error("invalid result json: {0}")]
    Json(#[from] serde_json::Error),
}
