//! Filesystem scanner
//!
//! Walks the image tree and describes every image file it finds. The walk
//! never aborts: unreadable directories and files that vanish between
//! listing and `stat` are logged and skipped. Symlinks are followed; broken
//! links and links that loop back to an ancestor are skipped the same way.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::state::data::ScannedImage;

/// Extensions that count as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];

/// Check if this is an image file by extension
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Scan the whole tree under `root`.
pub fn scan_tree(root: &Path) -> Vec<ScannedImage> {
    let root = absolute(root);
    walk(&root, &root)
}

/// Scan a single `YYYY-MM-DD` directory under `root`.
///
/// Paths are still relative to `root`, so they carry the date prefix.
/// A missing directory is not an error: nothing has been generated that day.
pub fn scan_date_dir(root: &Path, date: &str) -> Vec<ScannedImage> {
    let root = absolute(root);
    let dir = root.join(date);
    if !dir.is_dir() {
        debug!(date, "date directory does not exist, skipping");
        return Vec::new();
    }
    walk(&root, &dir)
}

/// Walk `start`, producing paths relative to `root`
fn walk(root: &Path, start: &Path) -> Vec<ScannedImage> {
    let mut images = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(start).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                skipped += 1;
                continue;
            }
        };

        // Only process files (not directories)
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }

        match describe(root, entry.path()) {
            Ok(image) => images.push(image),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping file");
                skipped += 1;
            }
        }
    }

    debug!(
        start = %start.display(),
        found = images.len(),
        skipped,
        "scan finished"
    );
    images
}

/// Stat one file and build its descriptor
fn describe(root: &Path, path: &Path) -> std::io::Result<ScannedImage> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    Ok(ScannedImage {
        filename,
        path: relative,
        full_path: path.to_string_lossy().to_string(),
        size: metadata.len() as i64,
        mtime,
    })
}

fn absolute(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}
