//! Read-only cursor pagination over the index
//!
//! Every call is answered from the index as it is at that moment. There is
//! no snapshot across calls: if a scan inserts newer images between two
//! pages, the second page shifts by that many rows.

use std::sync::Arc;

use crate::error::Result;
use crate::state::data::{DateBucket, ImageRecord, ImageSummary, PageResult};
use crate::state::index::IndexStore;

/// Stateless pager over a shared store
#[derive(Debug, Clone)]
pub struct Pager {
    store: Arc<IndexStore>,
}

impl Pager {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> Arc<IndexStore> {
        self.store
    }

    /// `limit` records starting at `offset`, newest first. `limit = 0` means all.
    pub fn page(&self, limit: u64, offset: u64) -> Result<Vec<ImageRecord>> {
        self.store.get_images(limit, offset)
    }

    /// A page in the shape the infinite-scroll client consumes
    pub fn page_result(&self, limit: u64, offset: u64) -> Result<PageResult> {
        let files: Vec<ImageSummary> = self
            .page(limit, offset)?
            .iter()
            .map(ImageSummary::from)
            .collect();
        let total = self.store.get_count()?;
        let has_more = offset.saturating_add(files.len() as u64) < total;

        Ok(PageResult {
            files,
            offset,
            total,
            has_more,
        })
    }

    /// Offset of the first image on `date`.
    ///
    /// A start position the client already cached is trusted as is.
    pub fn jump_to_date(&self, date: &str, cached: Option<u64>) -> Result<u64> {
        match cached {
            Some(offset) => Ok(offset),
            None => self.store.get_date_offset(date),
        }
    }

    /// Buckets newest first, each with the offset its first image sits at.
    ///
    /// Offsets are running sums of the bucket counts, so they are only as
    /// fresh as the last bucket rebuild. Records outside any date directory
    /// have no bucket: when their path sorts above a date (`misc/...`),
    /// [`IndexStore::get_date_offset`] counts them and these offsets do not.
    pub fn date_index(&self) -> Result<Vec<(DateBucket, u64)>> {
        let mut start = 0u64;
        let index = self
            .store
            .get_date_stats()?
            .into_iter()
            .map(|bucket| {
                let entry = start;
                start += bucket.count.max(0) as u64;
                (bucket, entry)
            })
            .collect();
        Ok(index)
    }

    pub fn count(&self) -> Result<u64> {
        self.store.get_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::ScannedImage;

    fn pager_with(images: &[(&str, i64)]) -> Pager {
        let store = IndexStore::open_in_memory().unwrap();
        let batch: Vec<ScannedImage> = images
            .iter()
            .map(|(path, mtime)| ScannedImage {
                filename: path.rsplit('/').next().unwrap().to_string(),
                path: path.to_string(),
                full_path: format!("/nonexistent/{path}"),
                size: 10,
                mtime: *mtime,
            })
            .collect();
        store.batch_upsert(&batch).unwrap();
        store.rebuild_from_images().unwrap();
        Pager::new(Arc::new(store))
    }

    #[test]
    fn test_offset_matches_date_ordering() {
        // D1 > D2 > D3 with counts 2, 3, 1
        let pager = pager_with(&[
            ("2026-02-14/a.png", 900),
            ("2026-02-14/b.png", 901),
            ("2026-02-13/c.png", 600),
            ("2026-02-13/d.png", 601),
            ("2026-02-13/e.png", 602),
            ("2026-02-12/f.png", 300),
        ]);

        let c1 = 2;
        let c2 = 3;
        assert_eq!(pager.jump_to_date("2026-02-13", None).unwrap(), c1);

        let all = pager.page(0, 0).unwrap();
        assert_eq!(all[(c1 + c2) as usize].path, "2026-02-12/f.png");

        let jumped = pager.page(1, c1 + c2).unwrap();
        assert_eq!(jumped[0].path, "2026-02-12/f.png");
    }

    #[test]
    fn test_cached_jump_is_trusted() {
        let pager = pager_with(&[("2026-02-14/a.png", 1)]);
        assert_eq!(pager.jump_to_date("2026-02-14", Some(17)).unwrap(), 17);
        assert_eq!(pager.jump_to_date("2026-02-14", None).unwrap(), 0);
    }

    #[test]
    fn test_date_index_offsets_agree_with_store() {
        let pager = pager_with(&[
            ("2026-02-14/a.png", 900),
            ("2026-02-13/b.png", 600),
            ("2026-02-13/c.png", 601),
            ("2026-02-11/d.png", 100),
        ]);

        for (bucket, start) in pager.date_index().unwrap() {
            assert_eq!(start, pager.jump_to_date(&bucket.date, None).unwrap());
        }
    }

    #[test]
    fn test_date_index_skips_undated_records() {
        let pager = pager_with(&[
            ("2026-02-14/a.png", 900),
            ("2026-02-13/b.png", 600),
            ("misc/x.png", 50),
        ]);

        let index = pager.date_index().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[1].0.date, "2026-02-13");
        assert_eq!(index[1].1, 1);
        assert_eq!(pager.jump_to_date("2026-02-13", None).unwrap(), 2);
    }

    #[test]
    fn test_offsets_beyond_sqlite_range() {
        let pager = pager_with(&[
            ("2026-02-14/a.png", 2),
            ("2026-02-13/b.png", 1),
        ]);

        assert!(pager.page(10, u64::MAX).unwrap().is_empty());
        assert!(pager.page(10, 1 << 63).unwrap().is_empty());
        assert_eq!(pager.page(u64::MAX, 0).unwrap().len(), 2);
        assert_eq!(pager.page(u64::MAX, 1).unwrap()[0].path, "2026-02-13/b.png");

        let past_end = pager.page_result(10, u64::MAX).unwrap();
        assert!(past_end.files.is_empty());
        assert_eq!(past_end.total, 2);
        assert!(!past_end.has_more);
    }

    #[test]
    fn test_page_result_has_more() {
        let pager = pager_with(&[
            ("2026-02-14/a.png", 3),
            ("2026-02-14/b.png", 2),
            ("2026-02-14/c.png", 1),
        ]);

        let first = pager.page_result(2, 0).unwrap();
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.total, 3);
        assert!(first.has_more);

        let last = pager.page_result(2, 2).unwrap();
        assert_eq!(last.files.len(), 1);
        assert_eq!(last.files[0].path, "2026-02-14/c.png");
        assert!(!last.has_more);
    }
}
