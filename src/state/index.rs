use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::data::{ImageRecord, ScannedImage};
use crate::error::Result;

/// Insert-or-update keyed on `path`. `id` and `created_at` survive updates.
const UPSERT_IMAGE_SQL: &str = "
    INSERT INTO images (filename, path, full_path, size, mtime, created_at, checked_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
    ON CONFLICT(path) DO UPDATE SET
        full_path  = excluded.full_path,
        size       = excluded.size,
        mtime      = excluded.mtime,
        checked_at = excluded.checked_at";

const IMAGE_COLUMNS: &str = "id, filename, path, full_path, size, mtime, created_at, checked_at";

/// The IndexStore manages the SQLite image index.
/// It stores one row per image file and the per-date summary table.
///
/// The connection sits behind a mutex so a store can be shared between
/// threads; every write runs inside that single critical section.
pub struct IndexStore {
    pub(super) conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl IndexStore {
    /// Open (or create) the index database at `path`.
    ///
    /// Enables WAL so readers on other connections are not blocked
    /// while a scan holds a write transaction.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = IndexStore {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        info!(path = %path.display(), journal = %journal, "index database opened");
        Ok(store)
    }

    /// Open a private in-memory index. Nothing is persisted.
    pub fn open_in_memory() -> Result<Self> {
        let store = IndexStore {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create all tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                filename    TEXT NOT NULL,
                path        TEXT NOT NULL UNIQUE,
                full_path   TEXT NOT NULL,
                size        INTEGER NOT NULL DEFAULT 0 CHECK (size >= 0),
                mtime       INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                checked_at  INTEGER NOT NULL
            )",
            [],
        )?;

        // Pagination reads newest-first
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_mtime
             ON images(mtime DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS date_stats (
                date        TEXT PRIMARY KEY,
                count       INTEGER NOT NULL DEFAULT 0,
                updated_at  INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("index schema ready");
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Close the underlying connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner();
        conn.close().map_err(|(_, e)| e)?;
        if let Some(path) = &self.db_path {
            info!(path = %path.display(), "index database closed");
        }
        Ok(())
    }

    /// Insert an image, or refresh size/mtime/checked_at if its path is already known.
    pub fn upsert(&self, image: &ScannedImage) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            UPSERT_IMAGE_SQL,
            params![
                image.filename,
                image.path,
                image.full_path,
                image.size,
                image.mtime,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Upsert every image inside one transaction.
    ///
    /// Either all rows are applied or none are; on error the table is
    /// left exactly as it was before the call.
    pub fn batch_upsert(&self, images: &[ScannedImage]) -> Result<usize> {
        if images.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let checked_at = now();
        let mut applied = 0;
        {
            let mut stmt = tx.prepare_cached(UPSERT_IMAGE_SQL)?;
            for image in images {
                stmt.execute(params![
                    image.filename,
                    image.path,
                    image.full_path,
                    image.size,
                    image.mtime,
                    checked_at,
                ])?;
                applied += 1;
            }
        }
        tx.commit()?;

        debug!(applied, "batch upsert committed");
        Ok(applied)
    }

    /// Delete records whose file no longer exists on disk.
    ///
    /// With `prefix`, only records whose path starts with it are checked.
    pub fn remove_non_existent(&self, prefix: Option<&str>) -> Result<usize> {
        let mut conn = self.conn.lock();

        // An empty prefix matches every path
        let candidates: Vec<(i64, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, path, full_path FROM images
                 WHERE substr(path, 1, length(?1)) = ?1",
            )?;
            let rows = stmt.query_map([prefix.unwrap_or("")], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let missing: Vec<(i64, String)> = candidates
            .into_iter()
            .filter(|(_, _, full_path)| !Path::new(full_path).exists())
            .map(|(id, path, _)| (id, path))
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM images WHERE id = ?1")?;
            for (id, path) in &missing {
                removed += stmt.execute([id])?;
                debug!(path = %path, "removed missing file from index");
            }
        }
        tx.commit()?;

        warn!(removed, "pruned index entries for missing files");
        Ok(removed)
    }

    /// Images ordered newest first (by mtime, ties by id).
    /// `limit = 0` returns everything after `offset`. An offset past what
    /// SQLite can address is past the end, so the page is empty.
    pub fn get_images(&self, limit: u64, offset: u64) -> Result<Vec<ImageRecord>> {
        let Ok(offset) = i64::try_from(offset) else {
            return Ok(Vec::new());
        };
        let limit = match limit {
            0 => -1,
            n => i64::try_from(n).unwrap_or(i64::MAX),
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             ORDER BY mtime DESC, id DESC
             LIMIT ?1 OFFSET ?2"
        ))?;

        let images = stmt
            .query_map(params![limit, offset], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(images)
    }

    /// Number of indexed images
    pub fn get_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Whether an image with this relative path is indexed
    pub fn exists(&self, path: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row("SELECT 1 FROM images WHERE path = ?1", [path], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Look up a single record by its relative path
    pub fn get(&self, path: &str) -> Result<Option<ImageRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE path = ?1"),
                [path],
                image_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Rewrite `a\b.png` style paths to `a/b.png`.
    ///
    /// If the forward-slash form is already indexed, the back-slash
    /// duplicate is dropped instead of renamed.
    pub fn fix_path_separators(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let rows: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, path FROM images WHERE instr(path, '\\') > 0")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut fixed = 0;
        for (id, path) in rows {
            let normalized = path.replace('\\', "/");
            let taken = tx
                .query_row(
                    "SELECT 1 FROM images WHERE path = ?1 AND id != ?2",
                    params![normalized, id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if taken {
                tx.execute("DELETE FROM images WHERE id = ?1", [id])?;
            } else {
                tx.execute(
                    "UPDATE images SET path = ?1 WHERE id = ?2",
                    params![normalized, id],
                )?;
            }
            fixed += 1;
        }
        tx.commit()?;

        if fixed > 0 {
            info!(fixed, "normalized path separators");
        }
        Ok(fixed)
    }
}

fn image_from_row(row: &Row) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        path: row.get(2)?,
        full_path: row.get(3)?,
        size: row.get(4)?,
        mtime: row.get(5)?,
        created_at: row.get(6)?,
        checked_at: row.get(7)?,
    })
}

/// Current time in seconds since the epoch
pub(super) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// Implement Debug for better error messages
impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
