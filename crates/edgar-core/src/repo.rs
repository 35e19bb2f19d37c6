//! The persistence port consumed by the ingestion engine.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::Result,
    types::{FactLabelRow, FactUnit},
};

/// Narrow persistence capability the ingestion engine consumes.
///
/// Dimension inserts (`add_company`, `add_fact`, `add_label`, `add_unit`)
/// are idempotent: inserting an existing row is a no-op and, where an id is
/// returned, the existing id comes back. Observations are loaded in bulk
/// through [`copy_fact_units`](Repo::copy_fact_units) and, during an
/// incremental update, replaced atomically through
/// [`replace_fact_units`](Repo::replace_fact_units).
#[async_trait]
pub trait Repo: Send + Sync {
    /// Inserts a company row, ignoring conflicts on CIK. Returns true when
    /// a new row was actually inserted.
    async fn add_company(&self, cik: u32, name: &str) -> Result<bool>;

    /// Inserts a fact identified by `(tax, name)`, returning the existing
    /// id on conflict.
    async fn add_fact(&self, tax: &str, name: &str) -> Result<u32>;

    /// Inserts a label pair for a fact, idempotent by
    /// `(fact_id, label_hash, descr_hash)`.
    async fn add_label(
        &self,
        fact_id: u32,
        label: &str,
        descr: &str,
        label_hash: u64,
        descr_hash: u64,
    ) -> Result<()>;

    /// Inserts a unit of measure, returning the existing id on conflict.
    async fn add_unit(&self, name: &str) -> Result<u32>;

    /// Inserts a single observation row. Bulk loads go through
    /// [`copy_fact_units`](Repo::copy_fact_units) instead.
    async fn add_fact_unit(&self, fact: &FactUnit) -> Result<()>;

    /// Bulk-loads observations in one COPY. Fails with
    /// [`EdgarError::CopyCount`](crate::EdgarError::CopyCount) when the
    /// store reports a different number of rows loaded.
    async fn copy_fact_units(&self, facts: &[FactUnit]) -> Result<()>;

    /// In one transaction, deletes every observation of `cik` with
    /// `filed >= last_filed` and bulk-loads `facts`.
    async fn replace_fact_units(
        &self,
        cik: u32,
        last_filed: NaiveDate,
        facts: &[FactUnit],
    ) -> Result<()>;

    /// Returns, for every company with observations, the most recent
    /// `filed` date.
    async fn last_filed(&self) -> Result<HashMap<u32, NaiveDate>>;

    /// Returns every persisted fact/label pair.
    async fn fact_labels(&self) -> Result<Vec<FactLabelRow>>;

    /// Returns every persisted unit as `id -> name`.
    async fn units(&self) -> Result<HashMap<u32, String>>;

    /// Returns, for one company, the number of observations per `filed`
    /// date.
    async fn filed_counts(&self, cik: u32) -> Result<HashMap<NaiveDate, u32>>;

    /// Returns the watermark of the most recent successful update pass, or
    /// `None` when no update has completed yet.
    async fn last_updated(&self) -> Result<Option<NaiveDate>>;

    /// Persists the watermark of a completed update pass.
    async fn add_last_update(&self, at: NaiveDate) -> Result<()>;
}
