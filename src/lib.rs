//! Incremental image index
//!
//! Keeps a SQLite index in step with a directory tree of generated images
//! (laid out as `YYYY-MM-DD/<file>`) and pages through it newest-first,
//! with jumps to the first image of any date.
//!
//! Data flows one way: the filesystem is walked by [`scan`], written by
//! [`sync::SyncEngine`] into [`state::index::IndexStore`], and read back by
//! [`pagination::Pager`]. [`service::IndexService`] bundles the read and
//! write sides for an HTTP layer.

pub mod config;
pub mod error;
pub mod pagination;
pub mod scan;
pub mod service;
pub mod state;
pub mod sync;

pub use config::Config;
pub use error::{ConfigError, IndexError};
pub use pagination::Pager;
pub use service::IndexService;
pub use state::data::{DateBucket, ImageRecord, ImageSummary, PageResult, ScannedImage};
pub use state::index::IndexStore;
pub use sync::{ScanMode, SyncEngine, SyncReport, SyncState};
