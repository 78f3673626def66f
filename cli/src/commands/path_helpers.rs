use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Collects explicit files plus a recursive folder scan, keeping paths
/// with one of the allowed extensions. Sorted so batches run in a stable
/// order.
pub(crate) fn collect_files(
    files: &[PathBuf],
    folder: Option<&Path>,
    allowed_exts: &[&str],
) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = files
        .iter()
        .filter(|path| path.is_file() && has_allowed_ext(path, allowed_exts))
        .cloned()
        .collect();

    if let Some(folder) = folder {
        paths.extend(
            WalkDir::new(folder)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .filter(|entry| has_allowed_ext(entry.path(), allowed_exts))
                .map(|entry| entry.path().to_path_buf()),
        );
    }

    paths.sort_unstable();
    paths.dedup();
    paths
}

fn has_allowed_ext(path: &Path, allowed_exts: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            allowed_exts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
