//! MinHash LSH ensemble for approximate set containment retrieval.
//!
//! Sketch many sets once, then ask "which indexed sets look contained in
//! this query set?" without comparing against every set. Keys are opaque
//! strings; callers encode whatever metadata they need into them.

pub mod ensemble;
pub mod errors;
pub mod minhash;

pub use ensemble::{EnsembleParams, Entry, LshEnsemble};
pub use errors::LshError;
pub use minhash::{MinHash, MinHasher, NUM_PERMUTATIONS};
