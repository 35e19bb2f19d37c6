#![forbid(unsafe_code)]

//! Concurrent, deduplicating ingestion engine for EDGAR XBRL facts.
//!
//! The [`Engine`] turns a large, unordered stream of per-company fact
//! documents into a normalized database:
//!
//! - **Upload** bulk-loads every company the store has never seen.
//! - **Update** discovers companies with new filings against the quarterly
//!   master indexes and refreshes only those.
//!
//! Shared dimension rows (facts, labels, units) are created at most once
//! per pass through the single-flight gated [`FactsCache`] and
//! [`UnitsCache`]; observations are bulk-copied; per-company work runs on a
//! bounded worker pool where the first error cancels the rest.
//!
//! The engine talks to the outside world through two ports: [`EdgarApi`]
//! (the HTTP client) and [`edgar_core::Repo`] (persistence).

/// Known-state caches for facts, labels and units.
pub mod cache;
mod engine;
mod singleflight;
mod update;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use edgar_client::{Client, CompanyFacts, CompanyTicker};
use edgar_core::Result;

pub use cache::{FactsCache, KnownFact, UnitsCache};
pub use engine::{Config, Engine};

/// The EDGAR HTTP capability the engine consumes.
#[async_trait]
pub trait EdgarApi: Send + Sync {
    /// Fetches the company ticker list.
    async fn company_tickers(&self) -> Result<Vec<CompanyTicker>>;

    /// Fetches all XBRL facts of one company.
    async fn company_facts(&self, cik: u32) -> Result<CompanyFacts>;

    /// Fetches a raw archive file body from `/Archives/{path}`.
    async fn archive_file(&self, path: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl EdgarApi for Client {
    async fn company_tickers(&self) -> Result<Vec<CompanyTicker>> {
        Client::company_tickers(self).await
    }

    async fn company_facts(&self, cik: u32) -> Result<CompanyFacts> {
        Client::company_facts(self, cik).await
    }

    async fn archive_file(&self, path: &str) -> Result<Vec<u8>> {
        Client::archive_file(self, path).await
    }
}
