//! Shared data structures for the index
//!
//! These structs represent the data model that flows between
//! the scanner, the database layer and the query layer.

use serde::Serialize;

/// Represents a single image in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Unique database ID, assigned on first insert
    pub id: i64,
    /// Filename only (e.g., "00042.png")
    pub filename: String,
    /// Path relative to the index root, forward slashes (e.g., "2026-02-14/00042.png")
    pub path: String,
    /// Absolute path on disk, only used to check the file still exists
    pub full_path: String,
    /// File size in bytes
    pub size: i64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    /// When the file was first indexed
    pub created_at: i64,
    /// When the file was last seen by a scan
    pub checked_at: i64,
}

/// A file found by the scanner, not yet in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImage {
    pub filename: String,
    pub path: String,
    pub full_path: String,
    pub size: i64,
    pub mtime: i64,
}

/// Number of indexed images under one `YYYY-MM-DD/` directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateBucket {
    pub date: String,
    pub count: i64,
    #[serde(skip)]
    pub updated_at: i64,
}

/// What the query layer hands out for one image.
///
/// `full_path` is deliberately absent: clients build URLs from `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub path: String,
    pub size: i64,
    pub mtime_seconds: i64,
}

impl From<&ImageRecord> for ImageSummary {
    fn from(record: &ImageRecord) -> Self {
        Self {
            path: record.path.replace('\\', "/"),
            size: record.size,
            mtime_seconds: record.mtime,
        }
    }
}

/// One page of the infinite-scroll listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub files: Vec<ImageSummary>,
    pub offset: u64,
    pub total: u64,
    pub has_more: bool,
}

impl ScannedImage {
    /// Date directory this file lives in, if the path follows the `YYYY-MM-DD/` layout
    pub fn date(&self) -> Option<&str> {
        super::dates::date_of(&self.path)
    }
}
