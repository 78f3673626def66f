//! Library profile loading.
//!
//! Loading is parallel across profiles; each worker reads one profile,
//! sketches its classes and, in accurate mode, builds its relationship
//! graphs. The coordinator merges the results into the index entry list
//! and the graph table.

use std::path::PathBuf;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;

use libsift_lsh::{Entry, MinHasher};
use libsift_profile::{LibraryProfile, Profile, SdkClasses, read_profile};

use crate::config::{DetectOptions, Mode, SHRINK_MINIMUM_NUMBER};
use crate::graphs::RelationGraphs;
use crate::key::LibKey;

/// Everything detection needs from the library corpus.
pub struct LoadedLibraries {
    pub entries: Vec<Entry>,

    /// Relationship graphs keyed by `"<name>_<version>"`; accurate mode
    /// only.
    pub graphs: AHashMap<String, RelationGraphs>,
}

/// Loads all library profiles in parallel. Unreadable profiles are logged
/// and skipped.
pub fn load_libraries(
    paths: &[PathBuf],
    opts: &DetectOptions,
    sdk: &SdkClasses,
    minhasher: &MinHasher,
) -> LoadedLibraries {
    log::info!("loading {} library profiles ...", paths.len());
    let start = Instant::now();

    let results: Vec<(Vec<Entry>, Option<(String, RelationGraphs)>)> = paths
        .par_iter()
        .filter_map(|path| {
            let library = match read_profile(path) {
                Ok(Profile::Library(library)) => library,
                Ok(Profile::App(_)) => {
                    log::error!("{} is an app profile, skipping", path.display());
                    return None;
                }
                Err(err) => {
                    log::error!("can't load {}: {}", path.display(), err);
                    return None;
                }
            };
            Some(load_library(library, opts, sdk, minhasher))
        })
        .collect();

    let mut entries = Vec::new();
    let mut graphs = AHashMap::new();
    for (lib_entries, lib_graphs) in results {
        entries.extend(lib_entries);
        if let Some((name_version, relation_graphs)) = lib_graphs {
            graphs.insert(name_version, relation_graphs);
        }
    }

    log::info!(
        "library profiles loaded: {} sets, duration {:.2}s",
        entries.len(),
        start.elapsed().as_secs_f64()
    );

    LoadedLibraries { entries, graphs }
}

fn load_library(
    library: LibraryProfile,
    opts: &DetectOptions,
    sdk: &SdkClasses,
    minhasher: &MinHasher,
) -> (Vec<Entry>, Option<(String, RelationGraphs)>) {
    let name_version = format!("{}_{}", library.name, library.version);

    // Tiny libraries carry too little evidence to ever clear the decision
    // thresholds; they are not worth indexing.
    if library.tables.classes_signatures.len() < SHRINK_MINIMUM_NUMBER {
        log::debug!("{}: fewer than {} classes, not indexed", name_version, SHRINK_MINIMUM_NUMBER);
        return (Vec::new(), None);
    }

    let graphs = (opts.mode == Mode::Accurate).then(|| {
        (
            name_version.clone(),
            RelationGraphs::build(&library.tables, sdk, opts.repackage),
        )
    });

    let mut signature_union: AHashSet<&str> = AHashSet::new();
    let mut class_count = 0;
    for signatures in library.tables.classes_signatures.values() {
        if !signatures.is_empty() {
            signature_union.extend(signatures.iter().map(String::as_str));
            class_count += 1;
        }
    }

    let key = LibKey {
        name_version,
        root_package: library.root_package.clone(),
        class_count,
        signature_count: signature_union.len(),
        category: library.category.clone(),
    };

    let entries = library
        .tables
        .classes_signatures
        .iter()
        .filter(|(_, signatures)| !signatures.is_empty())
        .map(|(class_name, signatures)| Entry {
            key: key.encode(class_name),
            minhash: minhasher.sketch(signatures.iter().map(String::as_bytes)),
            size: signatures.len(),
        })
        .collect();

    (entries, graphs)
}
