//! Response types for the company tickers list and the Company Facts API.

use chrono::NaiveDate;
use edgar_core::{EdgarError, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Wire format of EDGAR date fields.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One entry of `company_tickers.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CompanyTicker {
    /// Central Index Key.
    #[serde(rename = "cik_str", deserialize_with = "de_cik")]
    pub cik: u32,
    /// Ticker symbol.
    pub ticker: String,
    /// Company title as listed by the SEC.
    pub title: String,
}

/// Response of the Company Facts API: every XBRL fact a company has
/// reported, keyed by taxonomy and fact name.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CompanyFacts {
    /// Central Index Key. EDGAR serves this either as an integer or as a
    /// zero-padded string; both decode to a `u32`.
    #[serde(deserialize_with = "de_cik")]
    pub cik: u32,
    /// Entity name as most recently reported. May be empty.
    #[serde(rename = "entityName", default)]
    pub entity_name: String,
    /// `taxonomy -> fact name -> fact`.
    #[serde(default)]
    pub facts: HashMap<String, HashMap<String, CompanyFact>>,
}

/// One XBRL fact of one company: its label pair and the observations per
/// unit of measure.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CompanyFact {
    /// Human-readable label of the fact in this filing.
    #[serde(default)]
    pub label: String,
    /// Description of the fact in this filing.
    #[serde(default)]
    pub description: String,
    /// `unit name -> observations`.
    #[serde(default)]
    pub units: HashMap<String, Vec<RawFactUnit>>,
}

/// One observation as served by the Company Facts API, dates still in
/// their string form.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawFactUnit {
    /// Period start, empty for instant facts.
    #[serde(default)]
    pub start: String,
    /// Period end.
    #[serde(default)]
    pub end: String,
    /// Reported value.
    pub val: f64,
    /// Accession number of the filing.
    #[serde(default)]
    pub accn: String,
    /// Fiscal year.
    #[serde(default)]
    pub fy: u16,
    /// Fiscal period.
    #[serde(default)]
    pub fp: String,
    /// Form type.
    #[serde(default)]
    pub form: String,
    /// Filing date.
    #[serde(default)]
    pub filed: String,
    /// XBRL frame label, empty when absent.
    #[serde(default)]
    pub frame: String,
}

impl RawFactUnit {
    /// Parses the period start date. Empty means an instant fact.
    pub fn start_date(&self) -> Result<Option<NaiveDate>> {
        parse_date(&self.start, "start")
    }

    /// Parses the period end date, which must be present.
    pub fn end_date(&self) -> Result<NaiveDate> {
        parse_date(&self.end, "end")?
            .ok_or_else(|| EdgarError::Parse("empty \"end\" date".to_string()))
    }

    /// Parses the filing date, which must be present.
    pub fn filed_date(&self) -> Result<NaiveDate> {
        parse_date(&self.filed, "filed")?
            .ok_or_else(|| EdgarError::Parse("empty \"filed\" date".to_string()))
    }
}

fn parse_date(s: &str, field: &str) -> Result<Option<NaiveDate>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map(Some)
        .map_err(|e| EdgarError::Parse(format!("parse {field:?} = {s:?}: {e}")))
}

/// Deserializes a CIK that may arrive as an integer or a zero-padded
/// string.
fn de_cik<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("CIK {s:?}: {e}"))),
    }
}
