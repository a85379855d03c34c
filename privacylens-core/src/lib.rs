//! # privacylens-core
//!
//! Core library for privacylens - an App Privacy Report importer and viewer.
//!
//! This library provides:
//! - Schema detection and normalization for every generation of the export
//! - Database storage layer with SQLite
//! - Session reconstruction and date-bucketed timeline summaries
//! - App icon resolution
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 0 (Raw):** Report exports on disk (immutable)
//! - **Layer 1 (Canonical):** `access` and `domain` SQLite tables, one row per
//!   record, replaced wholesale on re-import
//! - **Layer 2 (Derived):** Sessions and merged timelines, recomputed per query
//!
//! ## Example
//!
//! ```rust,no_run
//! use privacylens_core::{summary, Config, Database, Importer, SummaryFilter};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let text = std::fs::read_to_string("App_Privacy_Report.ndjson").unwrap();
//! Importer::new(&db)
//!     .import_report_file(&text, "App_Privacy_Report")
//!     .expect("import failed");
//!
//! let timeline = summary::merged_summaries(&db, "App_Privacy_Report", &SummaryFilter::default())
//!     .expect("query failed");
//! for (date, entries) in timeline.iter().rev() {
//!     println!("{}: {} entries", date, entries.len());
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use icons::{IconResolver, IconResponse};
pub use ingest::{ImportSummary, Importer};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod icons;
pub mod ingest;
pub mod logging;
pub mod summary;
pub mod types;
