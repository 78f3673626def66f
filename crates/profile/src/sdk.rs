//! The host SDK class set.
//!
//! Classes of the Android platform are the stable reference points of every
//! fingerprint: obfuscators cannot rename them, so they survive verbatim in
//! descriptors while everything else collapses to `X`. The set is loaded once
//! at startup and shared by reference; it is never a process-wide global.

use ahash::AHashSet;

const BUILTIN_SDK_CLASSES: &str = include_str!("assets/android_sdk_26.txt");

/// Immutable set of platform class names in JVM internal form
/// (`Landroid/app/Activity;`).
#[derive(Debug, Clone)]
pub struct SdkClasses {
    classes: AHashSet<String>,
}

impl SdkClasses {
    /// Loads the compiled-in Android SDK 26 class list.
    pub fn builtin() -> Self {
        Self::from_names(
            BUILTIN_SDK_CLASSES
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned),
        )
    }

    /// Builds a set from arbitrary names. Mostly useful for tests and for
    /// targeting a platform revision other than the shipped one.
    pub fn from_names<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            classes: names.into_iter().collect(),
        }
    }

    #[inline]
    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains(class_name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
