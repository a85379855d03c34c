//! Database layer for privacylens
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository operations for the canonical access and domain tables
//! - The import ledger

pub mod repo;
pub mod schema;

pub use repo::Database;
