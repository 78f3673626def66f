//! Structural matching of library classes onto app classes.
//!
//! The matcher answers, for one candidate library at a time: which subset
//! of its classes is present in the app, and realized by which app
//! classes? The answer is the optimum of an integer linear program whose
//! constraints encode the package hierarchy, the invocation graph, and the
//! interface/superclass relations.

pub mod errors;
pub mod model;

pub use errors::MatcherError;
pub use model::{
    MatchConfig, MatchInputs, MatchSolution, MethodCall, ROOT_PKG, match_classes,
};
