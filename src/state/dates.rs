//! Per-date image counts
//!
//! Images live under `YYYY-MM-DD/` directories, so the date of an image is
//! read from its path, never from file metadata. The `date_stats` table is
//! a cache over `images` and can be rebuilt from it at any time.

use rusqlite::params;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::data::{DateBucket, ScannedImage};
use super::index::{now, IndexStore};
use crate::error::{IndexError, Result};

const UPSERT_DATE_SQL: &str = "
    INSERT INTO date_stats (date, count, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(date) DO UPDATE SET
        count      = excluded.count,
        updated_at = excluded.updated_at";

/// Return the leading `YYYY-MM-DD` segment of a relative path.
///
/// Only paths shaped like `YYYY-MM-DD/...` have a date; anything else
/// is still indexed but belongs to no bucket.
pub fn date_of(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() < 11 || bytes[10] != b'/' {
        return None;
    }
    is_date(&path[..10]).then(|| &path[..10])
}

/// Check the zero-padded `YYYY-MM-DD` shape (no calendar validation)
pub fn is_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Count scanned images per date directory
pub fn group_by_date(images: &[ScannedImage]) -> BTreeMap<String, i64> {
    let mut groups = BTreeMap::new();
    for date in images.iter().filter_map(ScannedImage::date) {
        *groups.entry(date.to_string()).or_insert(0) += 1;
    }
    groups
}

impl IndexStore {
    /// Set the count for one date
    pub fn update_date_stats(&self, date: &str, count: i64) -> Result<()> {
        if !is_date(date) {
            return Err(IndexError::InvalidDate(date.to_string()));
        }
        let conn = self.conn.lock();
        conn.execute(UPSERT_DATE_SQL, params![date, count, now()])?;
        Ok(())
    }

    /// Set the counts for several dates in one transaction
    pub fn batch_update_date_stats(&self, counts: &BTreeMap<String, i64>) -> Result<usize> {
        if let Some(bad) = counts.keys().find(|date| !is_date(date)) {
            return Err(IndexError::InvalidDate(bad.clone()));
        }
        if counts.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated_at = now();
        {
            let mut stmt = tx.prepare_cached(UPSERT_DATE_SQL)?;
            for (date, count) in counts {
                stmt.execute(params![date, count, updated_at])?;
            }
        }
        tx.commit()?;

        debug!(dates = counts.len(), "date stats updated");
        Ok(counts.len())
    }

    /// All buckets, newest date first
    pub fn get_date_stats(&self) -> Result<Vec<DateBucket>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT date, count, updated_at FROM date_stats ORDER BY date DESC")?;
        let buckets = stmt
            .query_map([], |row| {
                Ok(DateBucket {
                    date: row.get(0)?,
                    count: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(buckets)
    }

    /// Number of images whose path prefix sorts strictly after `date`.
    ///
    /// With newest-first ordering this is the position of the first image
    /// on `date`. The comparison is on the raw 10-character prefix, which
    /// matches chronological order only because dates are zero-padded.
    pub fn get_date_offset(&self, date: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let offset: i64 = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE substr(path, 1, 10) > ?1",
            [date],
            |row| row.get(0),
        )?;
        Ok(offset as u64)
    }

    /// Live count of indexed images under `date/`
    pub fn count_for_date(&self, date: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE substr(path, 1, 11) = ?1 || '/'",
            [date],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Recompute every bucket from the images table.
    ///
    /// The old buckets are deleted and the new ones written in the same
    /// transaction, so readers see either the old set or the new one.
    pub fn rebuild_from_images(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let groups: Vec<(String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT substr(path, 1, 10) AS date, COUNT(*)
                 FROM images
                 WHERE path GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]/*'
                 GROUP BY date",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        tx.execute("DELETE FROM date_stats", [])?;
        let updated_at = now();
        {
            let mut stmt = tx.prepare_cached(UPSERT_DATE_SQL)?;
            for (date, count) in &groups {
                stmt.execute(params![date, count, updated_at])?;
            }
        }
        tx.commit()?;

        info!(dates = groups.len(), "rebuilt date stats");
        Ok(groups.len())
    }
}
