//! Detection constants and runtime options.

use libsift_lsh::EnsembleParams;
use libsift_matcher::MatchConfig;

/// MinHash permutations per class signature set.
pub const LSH_PERM_NUM: usize = 256;

/// Containment threshold of the LSH index.
pub const LSH_THRESHOLD: f64 = 0.8;

/// Cardinality partitions of the LSH index.
pub const LSH_PARTITIONS: usize = 32;

/// The minimum percentage of library classes needed to make a decision.
pub const SHRINK_THRESHOLD_ACCURATE: f64 = 0.1;
pub const SHRINK_THRESHOLD_SCALABLE: f64 = 0.1;

/// The minimum number of classes needed to make a decision.
pub const SHRINK_MINIMUM_NUMBER: usize = 5;

/// The minimum percentage of app classes needed to make a decision.
pub const PROBABILITY_THRESHOLD_ACCURATE: f64 = 0.8;
pub const PROBABILITY_THRESHOLD_SCALABLE: f64 = 0.8;

/// Package prefixes of SDK-family builtin libraries, skipped unless the
/// caller opts in.
pub const BUILTIN_LIB_PREFIXES: [&str; 2] = ["Landroid/support", "Lcom/google/android/gms"];

/// Connected components of the contracted graph survive only while their
/// matched fraction exceeds this. Kept as a dial; nothing raises it today.
pub const COMPONENT_MATCH_THRESHOLD: f64 = 0.0;

/// Detection operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full structural ILP over all relationship graphs.
    Accurate,

    /// Signature-only matching under class-uniqueness constraints.
    Scalable,
}

impl Mode {
    pub fn shrink_threshold(self) -> f64 {
        match self {
            Mode::Accurate => SHRINK_THRESHOLD_ACCURATE,
            Mode::Scalable => SHRINK_THRESHOLD_SCALABLE,
        }
    }

    pub fn probability_threshold(self) -> f64 {
        match self {
            Mode::Accurate => PROBABILITY_THRESHOLD_ACCURATE,
            Mode::Scalable => PROBABILITY_THRESHOLD_SCALABLE,
        }
    }
}

/// Runtime options of one detection run.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub mode: Mode,

    /// Expect arbitrarily repackaged apps: drop package hierarchy
    /// assumptions and use the flattened package constraint instead.
    pub repackage: bool,

    /// Skip classes under [`BUILTIN_LIB_PREFIXES`].
    pub exclude_builtin: bool,

    pub match_config: MatchConfig,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Accurate,
            repackage: false,
            exclude_builtin: true,
            match_config: MatchConfig::default(),
        }
    }
}

impl DetectOptions {
    /// LSH index parameters for this run. The weights trade false
    /// positives against false negatives; a repackaged app needs the
    /// balanced point.
    pub fn ensemble_params(&self) -> EnsembleParams {
        EnsembleParams {
            threshold: LSH_THRESHOLD,
            num_part: LSH_PARTITIONS,
            weights: if self.repackage { (0.5, 0.5) } else { (0.1, 0.9) },
        }
    }
}
