//! Shared utilities and common types for the field safety backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Identity tokens (JWT verification and, for tooling, issuance)
//! - Coordinate and telemetry validation
//! - Cursor pagination for location history

pub mod jwt;
pub mod pagination;
pub mod validation;
