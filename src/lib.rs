//! Incremental normalization of public-transit feed snapshots.
//!
//! Each snapshot (a zip of CSV tables) is folded into a set of persistent,
//! deduplicated parquet tables: agencies, routes, stops with resolved station
//! hierarchies, trip schedules factored into shared stop sequences and
//! timings, and per-date active-trip sets expanded from the service
//! calendars. Re-ingesting snapshots over time only ever adds to the
//! persisted history.

pub mod error;
pub mod feed_archive;
pub mod merge_snapshot;
pub mod registry;
pub mod schedule_patterns;
pub mod service_calendar;
pub mod service_time;
pub mod stop_hierarchy;
pub mod table_store;

pub use error::MergeError;
pub use merge_snapshot::{merge_snapshot, MergeSummary};
pub use table_store::{ParquetStore, TableStore};
