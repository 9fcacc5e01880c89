//! Domain layer for the field safety backend.
//!
//! This crate contains:
//! - Domain models (identities, location samples, perimeters, alerts, wire events)
//! - The error taxonomy shared by every layer
//! - Core services: session registry, offline queue, notification gateway,
//!   location pipeline, geospatial evaluator and the alert escalation engine
//! - Ports to external stores, caches and brokers, with in-memory adapters

pub mod error;
pub mod models;
pub mod services;

pub use error::{CoreError, StoreError};
