//! Errors returned by this crate.

use thiserror::Error;

/// Errors that may occur while building or querying the LSH index.
#[derive(Error, Debug)]
pub enum LshError {
    #[error("no sets to index")]
    EmptyIndex,

    #[error("number of permutations must be a positive power of two, got {0}")]
    InvalidPermutationCount(usize),

    #[error("containment threshold must be within (0, 1], got {0}")]
    InvalidThreshold(f64),
}
