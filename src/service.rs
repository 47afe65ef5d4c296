//! Query facade for the HTTP layer
//!
//! Bundles the sync engine (writer) and a pager on its own connection
//! (reader). Queries never wait for a scan: WAL lets the reader see the
//! last committed state while a scan transaction is open.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{IndexError, Result};
use crate::pagination::Pager;
use crate::state::data::{DateBucket, ImageSummary, PageResult};
use crate::state::dates::is_date;
use crate::state::index::IndexStore;
use crate::sync::{ScanMode, SyncEngine, SyncReport};

#[derive(Debug)]
pub struct IndexService {
    engine: Arc<SyncEngine>,
    pager: Pager,
}

impl IndexService {
    pub fn new(engine: Arc<SyncEngine>, reader: Arc<IndexStore>) -> Self {
        Self {
            engine,
            pager: Pager::new(reader),
        }
    }

    /// Open the index at `db_path` with one writer and one reader connection.
    pub fn open(db_path: &Path, root: &Path) -> Result<Self> {
        let writer = Arc::new(IndexStore::open(db_path)?);
        let reader = Arc::new(IndexStore::open(db_path)?);
        let engine = Arc::new(SyncEngine::new(writer, root));
        Ok(Self::new(engine, reader))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// `[{path, size, mtimeSeconds}, ...]`, newest first
    pub fn list(&self, limit: u64, offset: u64) -> Result<Vec<ImageSummary>> {
        let records = self.pager.page(limit, offset)?;
        Ok(records.iter().map(ImageSummary::from).collect())
    }

    pub fn page(&self, limit: u64, offset: u64) -> Result<PageResult> {
        self.pager.page_result(limit, offset)
    }

    pub fn count(&self) -> Result<u64> {
        self.pager.count()
    }

    pub fn date_buckets(&self) -> Result<Vec<DateBucket>> {
        Ok(self
            .pager
            .date_index()?
            .into_iter()
            .map(|(bucket, _)| bucket)
            .collect())
    }

    /// Offset of the first image on `date` (`YYYY-MM-DD`)
    pub fn date_offset(&self, date: &str) -> Result<u64> {
        if !is_date(date) {
            return Err(IndexError::InvalidDate(date.to_string()));
        }
        self.pager.jump_to_date(date, None)
    }

    /// Start a scan in the background and return immediately.
    ///
    /// Returns `false` when a scan is already running; the request is
    /// dropped, not queued. Must be called from inside a tokio runtime.
    pub fn trigger_scan(&self, mode: ScanMode) -> bool {
        if self.engine.is_busy() {
            debug!(%mode, "scan requested while busy, ignoring");
            return false;
        }

        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            // Failures are logged by the engine; the next trigger retries
            let _ = engine.run(mode);
        });
        info!(%mode, "scan accepted");
        true
    }

    /// Spawn the periodic recent-window scan.
    ///
    /// The first tick is skipped: startup runs a full scan instead.
    /// Ticks that land while any scan is running are dropped.
    pub fn spawn_periodic(&self, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if engine.is_busy() {
                    debug!("scan still running, skipping tick");
                    continue;
                }

                let engine = Arc::clone(&engine);
                let scan = tokio::task::spawn_blocking(move || engine.run(ScanMode::Recent));
                if let Err(e) = scan.await {
                    error!(error = %e, "periodic scan task panicked");
                }
            }
        })
    }

    /// Run a scan to completion on the blocking pool
    pub async fn scan(&self, mode: ScanMode) -> Result<Option<SyncReport>> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.run(mode))
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
    }

    /// Close both connections.
    ///
    /// Background tasks holding the engine must be stopped first, otherwise
    /// the writer is dropped instead of closed.
    pub fn close(self) -> Result<()> {
        let IndexService { engine, pager } = self;
        close_store(pager.into_store())?;
        match Arc::try_unwrap(engine) {
            Ok(engine) => close_store(engine.into_store()),
            Err(_) => {
                debug!("sync engine still shared, dropping writer");
                Ok(())
            }
        }
    }
}

fn close_store(store: Arc<IndexStore>) -> Result<()> {
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => Ok(()),
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

    async fn wait_for_count(service: &IndexService, expected: u64) -> u64 {
        let mut count = 0;
        for _ in 0..200 {
            count = service.count().unwrap();
            if count == expected && !service.engine().is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        count
    }

    #[tokio::test]
    async fn test_trigger_scan_is_fire_and_forget() {
        let images = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_image(images.path(), "2026-02-13/a.png", 1_000);
        write_image(images.path(), "2026-02-14/b.png", 2_000);

        let service = IndexService::open(&data.path().join("images.db"), images.path()).unwrap();
        assert!(service.trigger_scan(ScanMode::Full));

        // Completion is only observable through the read side
        assert_eq!(wait_for_count(&service, 2).await, 2);
        let paths: Vec<String> = service.list(10, 0).unwrap().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["2026-02-14/b.png", "2026-02-13/a.png"]);

        service.close().unwrap();
    }

    #[tokio::test]
    async fn test_busy_engine_rejects_trigger() {
        let images = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let service = IndexService::open(&data.path().join("images.db"), images.path()).unwrap();

        let guard = service.engine().begin().unwrap();
        assert!(!service.trigger_scan(ScanMode::Recent));
        drop(guard);
        assert!(service.trigger_scan(ScanMode::Recent));
    }

    #[tokio::test]
    async fn test_date_offset_validates_input() {
        let images = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        write_image(images.path(), "2026-02-13/a.png", 1_000);
        write_image(images.path(), "2026-02-14/b.png", 2_000);

        let service = IndexService::open(&data.path().join("images.db"), images.path()).unwrap();
        service.scan(ScanMode::Full).await.unwrap();

        assert_eq!(service.date_offset("2026-02-13").unwrap(), 1);
        assert!(matches!(
            service.date_offset("02/13/2026"),
            Err(IndexError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn test_periodic_scan_picks_up_new_images() {
        let images = TempDir::new().unwrap();
        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
        write_image(images.path(), &format!("{today}/new.png"), 5_000);

        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let engine = Arc::new(SyncEngine::new(Arc::clone(&store), images.path()));
        let service = IndexService::new(engine, store);

        let handle = service.spawn_periodic(Duration::from_millis(50));
        assert_eq!(service.count().unwrap(), 0);

        assert_eq!(wait_for_count(&service, 1).await, 1);
        assert_eq!(service.date_buckets().unwrap()[0].date, today);

        handle.abort();
    }
}
