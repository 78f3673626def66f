//! Profiling driver.
//!
//! Whole binaries are the unit of work: each one parses, profiles and
//! writes independently, so the batch runs on the rayon pool with no
//! shared mutable state. A failed binary is logged and reported; the rest
//! of the batch continues.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;

use libsift_profile::{
    AppProfile, BytecodeParser, LibraryProfile, Profile, SdkClasses, write_profile,
};

/// Kind of profile a binary produces, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    App,
    Library,
}

impl ProfileKind {
    pub fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("apk") => Some(ProfileKind::App),
            Some(ext)
                if ext.eq_ignore_ascii_case("dex") || ext.eq_ignore_ascii_case("jar") =>
            {
                Some(ProfileKind::Library)
            }
            _ => None,
        }
    }

    fn subdir(self) -> &'static str {
        match self {
            ProfileKind::App => "app",
            ProfileKind::Library => "lib",
        }
    }
}

/// Output path of a binary's profile: `<out>/<app|lib>/<basename>.json`.
pub fn profile_output_path(output_folder: &Path, binary: &Path, kind: ProfileKind) -> PathBuf {
    let stem = binary
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    output_folder
        .join(kind.subdir())
        .join(format!("{}.json", stem))
}

/// Profiles every binary, in parallel. Returns the paths that failed.
pub fn run_profiling(
    binaries: &[PathBuf],
    output_folder: &Path,
    parser: &(dyn BytecodeParser + Sync),
    sdk: &SdkClasses,
    overwrite: bool,
) -> Vec<PathBuf> {
    let start = Instant::now();

    let failed: Vec<PathBuf> = binaries
        .par_iter()
        .filter_map(|path| match profile_binary(path, output_folder, parser, sdk, overwrite) {
            Ok(()) => None,
            Err(err) => {
                log::error!("{}: {}", path.display(), err);
                Some(path.clone())
            }
        })
        .collect();

    log::info!("profiling time: {:.2}s", start.elapsed().as_secs_f64());
    if !failed.is_empty() {
        log::info!("failed binaries: {:?}", failed);
    }

    failed
}

fn profile_binary(
    path: &Path,
    output_folder: &Path,
    parser: &(dyn BytecodeParser + Sync),
    sdk: &SdkClasses,
    overwrite: bool,
) -> Result<(), String> {
    let Some(kind) = ProfileKind::of(path) else {
        return Err("not an apk/dex/jar binary".to_owned());
    };

    let output_path = profile_output_path(output_folder, path, kind);
    if !overwrite && output_path.exists() {
        return Err(format!(
            "the profile ({}) already exists, use -w to overwrite",
            output_path.display()
        ));
    }

    let parsed = parser.parse(path).map_err(|err| err.to_string())?;

    let profile = match kind {
        ProfileKind::App => Profile::App(AppProfile::from_parsed(&parsed, sdk)),
        ProfileKind::Library => {
            Profile::Library(LibraryProfile::from_parsed(&parsed, path, sdk))
        }
    };

    write_profile(&output_path, &profile).map_err(|err| err.to_string())?;
    log::info!("the binary profile is stored at {}", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_the_extension() {
        assert_eq!(ProfileKind::of(Path::new("a/demo.apk")), Some(ProfileKind::App));
        assert_eq!(ProfileKind::of(Path::new("lib_1.0.dex")), Some(ProfileKind::Library));
        assert_eq!(ProfileKind::of(Path::new("lib_1.0.jar")), Some(ProfileKind::Library));
        assert_eq!(ProfileKind::of(Path::new("readme.txt")), None);
        assert_eq!(ProfileKind::of(Path::new("noext")), None);
    }

    #[test]
    fn output_lands_in_the_kind_subdir() {
        let path = profile_output_path(
            Path::new("profiles"),
            Path::new("bins/okdemo_3.2.1.dex"),
            ProfileKind::Library,
        );
        assert_eq!(path, Path::new("profiles/lib/okdemo_3.2.1.json"));
    }
}
