//! Errors returned by this crate.

use thiserror::Error;

/// Errors that may occur while solving a structural match. All of them are
/// per-candidate outcomes; callers reject the candidate and continue.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("no candidate class pairs")]
    NoCandidates,

    #[error("model is infeasible")]
    Infeasible,

    #[error("solve exceeded the time budget")]
    Timeout,

    #[error("solver failure: {0}")]
    Solver(String),
}
