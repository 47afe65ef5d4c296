//! Persistent index state
//!
//! This module owns everything stored in the SQLite index:
//! - Database connection and image queries (index.rs)
//! - Per-date summary table (dates.rs)
//! - Shared data structures (data.rs)

pub mod data;
pub mod dates;
pub mod index;
