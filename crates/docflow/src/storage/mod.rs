//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for file records and their stage rows.

mod database;

pub use database::{RecordStore, StoreStatistics};
