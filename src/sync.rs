//! Incremental sync engine
//!
//! The only writer of the index. Three kinds of work:
//! - full scan: walk everything, upsert, rebuild all date buckets
//! - recent scan: walk today's and yesterday's directories, refresh their buckets
//! - check / fix: drop records for deleted files, repair path separators
//!
//! Only one scan runs at a time. A trigger that arrives while another scan
//! is in flight is dropped, not queued: the next periodic tick covers the
//! same ground.

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::scan;
use crate::state::data::ScannedImage;
use crate::state::index::IndexStore;

/// What the engine is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    /// Walking the filesystem and upserting records
    Scanning,
    /// Rebuilding buckets, pruning or repairing records
    Reconciling,
}

/// Kind of sync requested by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Walk the whole tree and rebuild every date bucket
    Full,
    /// Walk only today's and yesterday's directories
    Recent,
    /// Remove records whose file is gone
    Check,
    /// Normalize back-slash paths
    Fix,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanMode::Full => "full",
            ScanMode::Recent => "recent",
            ScanMode::Check => "check",
            ScanMode::Fix => "fix",
        };
        f.write_str(name)
    }
}

/// Summary of one completed sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: ScanMode,
    /// Image files found on disk
    pub found: usize,
    /// Records inserted or refreshed
    pub upserted: usize,
    /// Records pruned because their file disappeared
    pub removed: usize,
    /// Records whose path separators were repaired
    pub fixed: usize,
    /// Date buckets written
    pub buckets: usize,
    pub elapsed: Duration,
}

impl SyncReport {
    fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            found: 0,
            upserted: 0,
            removed: 0,
            fixed: 0,
            buckets: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Owns the write side of the index.
pub struct SyncEngine {
    store: Arc<IndexStore>,
    root: PathBuf,
    state: Mutex<SyncState>,
}

/// Marks the engine busy for as long as it lives
pub(crate) struct ScanGuard<'a> {
    state: &'a Mutex<SyncState>,
}

impl ScanGuard<'_> {
    pub(crate) fn enter(&self, next: SyncState) {
        *self.state.lock() = next;
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = SyncState::Idle;
    }
}

impl SyncEngine {
    pub fn new(store: Arc<IndexStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: root.into(),
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.state() != SyncState::Idle
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn into_store(self) -> Arc<IndexStore> {
        self.store
    }

    /// Run one sync. Returns `Ok(None)` if another scan was already running.
    ///
    /// The recent window is today and yesterday in the local time zone, not
    /// UTC. Hosts east or west of UTC roll over to a new date directory at
    /// local midnight.
    pub fn run(&self, mode: ScanMode) -> Result<Option<SyncReport>> {
        self.run_at(mode, Local::now().date_naive())
    }

    /// Like [`run`](Self::run), with `today` deciding the recent window.
    pub fn run_at(&self, mode: ScanMode, today: NaiveDate) -> Result<Option<SyncReport>> {
        self.run_with(mode, |engine, guard, report| match mode {
            ScanMode::Full => engine.full_scan(guard, report),
            ScanMode::Recent => engine.recent_scan(guard, today, report),
            ScanMode::Check => engine.check(guard, None, report),
            ScanMode::Fix => engine.fix(guard, report),
        })
    }

    /// Prune records under one directory only (e.g. `"2026-02-14/"`).
    pub fn check_dir(&self, prefix: &str) -> Result<Option<SyncReport>> {
        self.run_with(ScanMode::Check, |engine, guard, report| {
            engine.check(guard, Some(prefix), report)
        })
    }

    fn run_with<F>(&self, mode: ScanMode, work: F) -> Result<Option<SyncReport>>
    where
        F: FnOnce(&Self, &ScanGuard<'_>, &mut SyncReport) -> Result<()>,
    {
        let Some(guard) = self.begin() else {
            debug!(%mode, "scan already in progress, skipping");
            return Ok(None);
        };

        let started = Instant::now();
        let mut report = SyncReport::new(mode);
        let outcome = work(self, &guard, &mut report);
        report.elapsed = started.elapsed();
        drop(guard);

        match outcome {
            Ok(()) => {
                info!(
                    %mode,
                    found = report.found,
                    upserted = report.upserted,
                    removed = report.removed,
                    fixed = report.fixed,
                    buckets = report.buckets,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "sync complete"
                );
                Ok(Some(report))
            }
            Err(e) => {
                // Nothing was committed; the next trigger retries
                error!(%mode, error = %e, "sync failed");
                Err(e)
            }
        }
    }

    /// Claim the engine, or `None` if a scan already holds it
    pub(crate) fn begin(&self) -> Option<ScanGuard<'_>> {
        let mut state = self.state.lock();
        if *state != SyncState::Idle {
            return None;
        }
        *state = SyncState::Scanning;
        Some(ScanGuard { state: &self.state })
    }

    fn full_scan(&self, guard: &ScanGuard<'_>, report: &mut SyncReport) -> Result<()> {
        info!(root = %self.root.display(), "full scan started");
        let images = scan::scan_tree(&self.root);
        report.found = images.len();
        report.upserted = self.store.batch_upsert(&images)?;

        guard.enter(SyncState::Reconciling);
        report.buckets = self.store.rebuild_from_images()?;
        Ok(())
    }

    fn recent_scan(
        &self,
        guard: &ScanGuard<'_>,
        today: NaiveDate,
        report: &mut SyncReport,
    ) -> Result<()> {
        let window = recent_window(today);

        let mut images: Vec<ScannedImage> = Vec::new();
        for date in &window {
            images.extend(scan::scan_date_dir(&self.root, date));
        }
        report.found = images.len();
        report.upserted = self.store.batch_upsert(&images)?;

        guard.enter(SyncState::Reconciling);
        // Recount from the index rather than the walk so stale records
        // still in a bucket keep the bucket sum equal to the record count
        let mut counts = BTreeMap::new();
        for date in &window {
            let count = self.store.count_for_date(date)?;
            if count > 0 {
                counts.insert(date.clone(), count);
            }
        }
        report.buckets = self.store.batch_update_date_stats(&counts)?;
        Ok(())
    }

    fn check(
        &self,
        guard: &ScanGuard<'_>,
        prefix: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<()> {
        guard.enter(SyncState::Reconciling);
        report.removed = self.store.remove_non_existent(prefix)?;
        if report.removed > 0 {
            report.buckets = self.store.rebuild_from_images()?;
        }
        Ok(())
    }

    fn fix(&self, guard: &ScanGuard<'_>, report: &mut SyncReport) -> Result<()> {
        guard.enter(SyncState::Reconciling);
        report.fixed = self.store.fix_path_separators()?;
        if report.fixed > 0 {
            report.buckets = self.store.rebuild_from_images()?;
        }
        Ok(())
    }
}

/// Today and yesterday as `YYYY-MM-DD`
pub fn recent_window(today: NaiveDate) -> Vec<String> {
    [Some(today), today.pred_opt()]
        .into_iter()
        .flatten()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect()
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("root", &self.root)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn write_image(root: &Path, relative: &str, mtime: i64) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"png").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn engine(root: &Path) -> SyncEngine {
        SyncEngine::new(Arc::new(IndexStore::open_in_memory().unwrap()), root)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_recent_window() {
        assert_eq!(
            recent_window(date("2026-03-01")),
            vec!["2026-03-01", "2026-02-28"]
        );
    }

    #[test]
    fn test_full_scan_indexes_and_buckets() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-13/a.png", 1_000);
        write_image(dir.path(), "2026-02-14/b.png", 2_000);
        write_image(dir.path(), "2026-02-14/c.jpg", 3_000);
        write_image(dir.path(), "misc/d.png", 500);

        let engine = engine(dir.path());
        let report = engine.run(ScanMode::Full).unwrap().unwrap();

        assert_eq!(report.found, 4);
        assert_eq!(report.upserted, 4);
        assert_eq!(report.buckets, 2);
        assert_eq!(engine.state(), SyncState::Idle);

        let store = engine.store();
        assert_eq!(store.get_count().unwrap(), 4);
        let buckets = store.get_date_stats().unwrap();
        assert_eq!(buckets[0].date, "2026-02-14");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].count, 1);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-14/a.png", 1_000);

        let engine = engine(dir.path());
        engine.run(ScanMode::Full).unwrap();
        let before = engine.store().get("2026-02-14/a.png").unwrap().unwrap();

        engine.run(ScanMode::Full).unwrap();
        let after = engine.store().get("2026-02-14/a.png").unwrap().unwrap();

        assert_eq!(engine.store().get_count().unwrap(), 1);
        assert_eq!(before.id, after.id);
        assert_eq!(before.created_at, after.created_at);
    }

    #[test]
    fn test_recent_scan_only_walks_window() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-12/old.png", 1_000);
        write_image(dir.path(), "2026-02-13/y.png", 2_000);
        write_image(dir.path(), "2026-02-14/t1.png", 3_000);
        write_image(dir.path(), "2026-02-14/t2.png", 3_100);

        let engine = engine(dir.path());
        let report = engine
            .run_at(ScanMode::Recent, date("2026-02-14"))
            .unwrap()
            .unwrap();

        assert_eq!(report.found, 3);
        let store = engine.store();
        assert!(!store.exists("2026-02-12/old.png").unwrap());
        assert!(store.exists("2026-02-13/y.png").unwrap());

        let buckets = store.get_date_stats().unwrap();
        let pairs: Vec<(&str, i64)> = buckets.iter().map(|b| (b.date.as_str(), b.count)).collect();
        assert_eq!(pairs, vec![("2026-02-14", 2), ("2026-02-13", 1)]);
    }

    #[test]
    fn test_recent_scan_leaves_other_buckets_alone() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-10/a.png", 1_000);
        write_image(dir.path(), "2026-02-14/b.png", 2_000);

        let engine = engine(dir.path());
        engine.run(ScanMode::Full).unwrap();
        write_image(dir.path(), "2026-02-14/c.png", 3_000);

        engine.run_at(ScanMode::Recent, date("2026-02-14")).unwrap();

        let buckets = engine.store().get_date_stats().unwrap();
        let pairs: Vec<(&str, i64)> = buckets.iter().map(|b| (b.date.as_str(), b.count)).collect();
        assert_eq!(pairs, vec![("2026-02-14", 2), ("2026-02-10", 1)]);
    }

    #[test]
    fn test_check_prunes_and_rebuilds() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-13/a.png", 1_000);
        write_image(dir.path(), "2026-02-14/b.png", 2_000);

        let engine = engine(dir.path());
        engine.run(ScanMode::Full).unwrap();
        std::fs::remove_file(dir.path().join("2026-02-13/a.png")).unwrap();

        let report = engine.run(ScanMode::Check).unwrap().unwrap();
        assert_eq!(report.removed, 1);

        let store = engine.store();
        assert!(!store.exists("2026-02-13/a.png").unwrap());
        assert_eq!(store.get_count().unwrap(), 1);
        let buckets = store.get_date_stats().unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].date, "2026-02-14");
    }

    #[test]
    fn test_check_dir_is_scoped() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-13/a.png", 1_000);
        write_image(dir.path(), "2026-02-14/b.png", 2_000);

        let engine = engine(dir.path());
        engine.run(ScanMode::Full).unwrap();
        std::fs::remove_file(dir.path().join("2026-02-13/a.png")).unwrap();
        std::fs::remove_file(dir.path().join("2026-02-14/b.png")).unwrap();

        let report = engine.check_dir("2026-02-14/").unwrap().unwrap();
        assert_eq!(report.removed, 1);
        assert!(engine.store().exists("2026-02-13/a.png").unwrap());
    }

    #[test]
    fn test_fix_mode_repairs_separators() {
        let engine = engine(Path::new("/nonexistent"));
        engine
            .store()
            .upsert(&ScannedImage {
                filename: "a.png".into(),
                path: "2026-02-14\\a.png".into(),
                full_path: "/nonexistent/2026-02-14/a.png".into(),
                size: 1,
                mtime: 1,
            })
            .unwrap();

        let report = engine.run(ScanMode::Fix).unwrap().unwrap();
        assert_eq!(report.fixed, 1);
        assert_eq!(report.buckets, 1);
        assert!(engine.store().exists("2026-02-14/a.png").unwrap());
    }

    #[test]
    fn test_busy_engine_coalesces_triggers() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "2026-02-14/a.png", 1_000);
        let engine = engine(dir.path());

        let guard = engine.begin().unwrap();
        assert!(engine.is_busy());
        assert!(engine.begin().is_none());
        assert_eq!(engine.run(ScanMode::Full).unwrap(), None);
        assert_eq!(engine.store().get_count().unwrap(), 0);

        guard.enter(SyncState::Reconciling);
        assert_eq!(engine.state(), SyncState::Reconciling);
        drop(guard);

        assert_eq!(engine.state(), SyncState::Idle);
        assert!(engine.run(ScanMode::Full).unwrap().is_some());
        assert_eq!(engine.store().get_count().unwrap(), 1);
    }
}
