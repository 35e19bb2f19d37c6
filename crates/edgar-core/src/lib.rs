#![forbid(unsafe_code)]

//! Core abstractions for the EDGAR XBRL ingestion pipeline.
//!
//! This crate provides the pieces every other crate in the workspace builds
//! on:
//!
//! - [`EdgarError`] / [`Result`] - the shared error enum
//! - [`FactUnit`] - one persisted XBRL observation
//! - [`FactLabelRow`] - a fact/label join row used to hydrate caches
//! - [`Repo`] - the persistence capability the ingestion engine consumes

/// Error types for client, store and ingestion operations.
pub mod error;
/// The persistence port consumed by the ingestion engine.
pub mod repo;
/// Core data types (FactUnit, FactLabelRow).
pub mod types;

pub use error::{EdgarError, Result};
pub use repo::Repo;
pub use types::{FactLabelRow, FactUnit};
