//! Core data types for persisted EDGAR facts.

use chrono::NaiveDate;

/// One persisted XBRL observation: the value a company reported for a fact
/// in a unit of measure, for a period, in a given filing.
///
/// `start` is absent for instant facts; `frame` is absent outside XBRL
/// frames (e.g. `CY2008Q3I`).
#[derive(Clone, Debug, PartialEq)]
pub struct FactUnit {
    /// SEC Central Index Key of the reporting company.
    pub cik: u32,
    /// Surrogate id of the `(taxonomy, name)` fact.
    pub fact_id: u32,
    /// Surrogate id of the unit of measure.
    pub unit_id: u32,
    /// Start of the reporting period, when the fact covers a duration.
    pub start: Option<NaiveDate>,
    /// End of the reporting period.
    pub end: NaiveDate,
    /// Reported value.
    pub val: f64,
    /// Accession number of the filing.
    pub accn: String,
    /// Fiscal year.
    pub fy: u16,
    /// Fiscal period (e.g. `Q3`, `FY`).
    pub fp: String,
    /// Form type (e.g. `10-Q`).
    pub form: String,
    /// Date the observation was filed with the SEC.
    pub filed: NaiveDate,
    /// XBRL frame label, when present.
    pub frame: Option<String>,
}

impl FactUnit {
    /// Sets the period start date.
    #[must_use]
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the XBRL frame label.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }
}

/// One fact/label join row, as returned by [`crate::Repo::fact_labels`].
///
/// Used at pass start to hydrate the in-memory fact cache with every label
/// pair already persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactLabelRow {
    /// Surrogate id of the fact.
    pub fact_id: u32,
    /// Fact taxonomy (e.g. `us-gaap`).
    pub tax: String,
    /// Fact name (e.g. `AccountsPayable`).
    pub name: String,
    /// Surrogate id of the label row.
    pub label_id: u32,
    /// xxh64 digest of the label text.
    pub label_hash: u64,
    /// xxh64 digest of the description text.
    pub descr_hash: u64,
}
