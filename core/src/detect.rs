//! Detection driver.
//!
//! Loads the library corpus, builds the index once, then analyzes every
//! app in parallel against the shared read-only context. Index
//! construction failure is fatal; everything else degrades per app or per
//! candidate.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;

use libsift_lsh::{LshEnsemble, MinHasher};
use libsift_profile::{Profile, SdkClasses, read_profile};

use crate::analyzer::{Analyzer, DetectContext};
use crate::config::DetectOptions;
use crate::errors::CoreError;
use crate::loader::load_libraries;
use crate::models::DetectReport;

/// Result path of an app profile: `<out>/<basename>.json`.
pub fn result_output_path(output_folder: &Path, app_profile: &Path) -> PathBuf {
    let stem = app_profile
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    output_folder.join(format!("{}.json", stem))
}

/// Finds the given libraries in the given apps and writes one result JSON
/// per app.
pub fn run_detection(
    app_profiles: &[PathBuf],
    lib_profiles: &[PathBuf],
    output_folder: &Path,
    overwrite: bool,
    opts: &DetectOptions,
    sdk: &SdkClasses,
) -> Result<(), CoreError> {
    let app_profiles: Vec<&PathBuf> = if overwrite {
        app_profiles.iter().collect()
    } else {
        let (keep, skipped): (Vec<&PathBuf>, Vec<&PathBuf>) = app_profiles
            .iter()
            .partition(|path| !result_output_path(output_folder, path).exists());
        if !skipped.is_empty() {
            log::warn!(
                "ignored {} app profiles because the output file already exists, use -w to overwrite",
                skipped.len()
            );
        }
        keep
    };

    if app_profiles.is_empty() || lib_profiles.is_empty() {
        log::warn!("nothing to do: no app or library profiles");
        return Ok(());
    }

    let run_start = Instant::now();
    let minhasher = MinHasher::new();

    let loaded = load_libraries(lib_profiles, opts, sdk, &minhasher);

    log::info!("start indexing (this could take a while) ...");
    let index_start = Instant::now();
    let lsh = LshEnsemble::index(loaded.entries, &opts.ensemble_params())?;
    log::info!("indexed, duration: {:.2}s", index_start.elapsed().as_secs_f64());

    let ctx = DetectContext {
        sdk,
        opts,
        minhasher: &minhasher,
        lsh: &lsh,
        lib_graphs: &loaded.graphs,
    };

    app_profiles.par_iter().for_each(|path| {
        if let Err(err) = detect_app(path, output_folder, &ctx) {
            log::error!("{} failed: {}", path.display(), err);
        }
    });

    log::info!(
        "finished, number of apps: {}, duration: {:.2}s",
        app_profiles.len(),
        run_start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn detect_app(path: &Path, output_folder: &Path, ctx: &DetectContext) -> Result<(), CoreError> {
    let start = Instant::now();

    let app = match read_profile(path)? {
        Profile::App(app) => app,
        Profile::Library(library) => {
            log::error!(
                "{} is a library profile ({}), skipping",
                path.display(),
                library.name
            );
            return Ok(());
        }
    };

    let libraries = Analyzer::new(&app, ctx).detect();

    let report = DetectReport {
        filename: app.filename.clone(),
        app_id: app.app_id.clone(),
        permissions: app.permissions.clone(),
        libraries,
        time: start.elapsed().as_secs_f64(),
    };

    let output_path = result_output_path(output_folder, path);
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&output_path)?;
    serde_json::to_writer(BufWriter::new(file), &report)?;

    log::info!(
        "the result of {} is stored at {}",
        app.filename,
        output_path.display()
    );

    Ok(())
}
