//! File discovery for the indexing pipeline.
//!
//! Walks the project root yielding relative paths of source files. Skip
//! rules: any directory whose name begins with `.`, the top-level `vendor`
//! directory (unless vendored code is requested), and `*_test.*` files
//! (unless tests are requested). Symbolic links are followed; duplicate
//! visits through link cycles are the walker's concern, and upserts absorb
//! them idempotently.

use std::path::Path;

use ignore::WalkBuilder;

/// Maximum file size to index (1MB). Larger files are almost always
/// generated code or data and would dominate embedding cost.
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Discover source files under `root` with the given extensions.
///
/// Returns forward-slash relative paths, sorted for deterministic batching.
pub(crate) fn discover_files(
    root: &Path,
    extensions: &[&str],
    include_tests: bool,
    include_vendor: bool,
) -> Vec<String> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(true)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            // The root itself is depth 0 and always passes
            if entry.depth() > 0 && name.starts_with('.') {
                return false;
            }
            if entry.depth() == 1 && name == "vendor" && !include_vendor {
                return false;
            }
            true
        })
        .build();

    let mut files: Vec<String> = walker
        .filter_map(|entry| {
            entry
                .map_err(|e| tracing::debug!(error = %e, "Walk entry error, skipping"))
                .ok()
        })
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| {
            entry
                .metadata()
                .map(|m| m.len() <= MAX_FILE_SIZE)
                .unwrap_or(false)
        })
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .filter(|entry| {
            if include_tests {
                return true;
            }
            let stem = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("");
            !stem.ends_with("_test")
        })
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            Some(rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    files.sort();
    tracing::info!(count = files.len(), root = %root.display(), "File discovery complete");
    files
}
