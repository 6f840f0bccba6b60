//! Audience Sync - customer recency segmentation for ad audiences
//!
//! A Rust library that imports customer activity exports into SQLite,
//! buckets customers by how recently they were active and keeps three
//! advertising audiences in step with those buckets.
//!
//! # Features
//!
//! - Import dated CSV exports from a drop directory
//! - Recency buckets: current, lapsed, extra lapsed
//! - Incremental add/remove lists with persisted transitions
//! - Batched audience updates within provider request ceilings
//! - Optional per-run reports (CSV lists and a JSON summary)

/// Audience sync adapter and providers
pub mod audience;
/// Configuration management
pub mod config;
/// Customer store on SQLite
pub mod db;
/// Library error type
pub mod error;
/// Run report writing
pub mod file_writer;
/// Export file ingestion
pub mod importer;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Repository pattern for data access
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Recency bucketing and transition lists
pub mod segmenter;
/// Command orchestration
pub mod service;
/// Batching and header helpers
pub mod utils;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use audience::{AudienceProvider, AudienceSync, GraphAudienceClient, MemoryAudienceProvider};
pub use db::Database;
pub use error::{AudienceError, Result};
pub use models::{CustomerRecord, Segment, SegmentLists, SortOutcome};
pub use segmenter::{bucket_of, InvalidDatePolicy, Segmenter};
pub use service::SyncService;
