//! Result file models.

use serde::{Deserialize, Serialize};

/// One detected library, possibly covering several indistinguishable
/// versions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LibraryMatch {
    pub name: String,

    pub version: Vec<String>,

    pub category: String,

    /// Whether the library's declared root package appears among the
    /// matched ones.
    pub root_package_exist: bool,

    /// Fraction of candidate package classes realized by the match.
    pub similarity: f64,

    pub matched_root_package: Vec<String>,

    /// Fraction of the library's signature set covered by the matched
    /// package.
    pub shrink_percentage: f64,
}

/// Per-app detection result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectReport {
    pub filename: String,

    #[serde(rename = "appID")]
    pub app_id: String,

    pub permissions: Vec<String>,

    pub libraries: Vec<LibraryMatch>,

    /// Wall-clock detection time, seconds.
    pub time: f64,
}
