//! Persistence layer for the field safety service.
//!
//! This crate contains:
//! - Database connection management and embedded migrations
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - `PgStore`, the PostgreSQL adapter for the domain store ports

pub mod db;
pub mod entities;
pub mod metrics;
pub mod pg_store;
pub mod repositories;

pub use pg_store::PgStore;
