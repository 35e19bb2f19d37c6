//! Hand-written stub ports shared by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use edgar_client::{CompanyFact, CompanyFacts, CompanyTicker, RawFactUnit};
use edgar_core::{EdgarError, FactLabelRow, FactUnit, Repo, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use xxhash_rust::xxh64::xxh64;

use crate::EdgarApi;

/// In-memory [`Repo`] recording every mutation.
#[derive(Default)]
pub(crate) struct StubRepo {
    pub companies: Mutex<Vec<(u32, String)>>,
    #[allow(dead_code)]
    pub inserted: Mutex<Vec<FactUnit>>,
    pub copied: Mutex<Vec<Vec<FactUnit>>>,
    pub replaced: Mutex<Vec<(u32, NaiveDate, Vec<FactUnit>)>>,
    pub last_updates: Mutex<Vec<NaiveDate>>,
    pub labels: Mutex<Vec<(u32, u64, u64)>>,

    facts: Mutex<HashMap<(String, String), u32>>,
    units: Mutex<HashMap<String, u32>>,

    last_filed_rows: Mutex<HashMap<u32, NaiveDate>>,
    fact_label_rows: Mutex<Vec<FactLabelRow>>,
    unit_rows: Mutex<HashMap<u32, String>>,
    filed_count_rows: Mutex<HashMap<u32, HashMap<NaiveDate, u32>>>,
    last_updated_row: Mutex<Option<NaiveDate>>,

    next_id: AtomicU32,
    add_fact_calls: AtomicU32,
    add_label_calls: AtomicU32,
}

impl StubRepo {
    pub fn set_last_filed(&self, entries: &[(u32, NaiveDate)]) {
        *self.last_filed_rows.lock().unwrap() = entries.iter().copied().collect();
    }

    pub fn set_filed_counts(&self, cik: u32, counts: &[(NaiveDate, u32)]) {
        self.filed_count_rows
            .lock()
            .unwrap()
            .insert(cik, counts.iter().copied().collect());
    }

    pub fn set_last_updated(&self, at: Option<NaiveDate>) {
        *self.last_updated_row.lock().unwrap() = at;
    }

    /// Seeds a persisted fact with one label pair, as the preload queries
    /// would report it.
    pub fn seed_fact_label(&self, tax: &str, name: &str, label: &str, descr: &str) {
        let fact_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.facts
            .lock()
            .unwrap()
            .insert((tax.to_string(), name.to_string()), fact_id);
        self.fact_label_rows.lock().unwrap().push(FactLabelRow {
            fact_id,
            tax: tax.to_string(),
            name: name.to_string(),
            label_id: fact_id,
            label_hash: xxh64(label.as_bytes(), 0),
            descr_hash: xxh64(descr.as_bytes(), 0),
        });
    }

    pub fn add_fact_calls(&self) -> u32 {
        self.add_fact_calls.load(Ordering::SeqCst)
    }

    pub fn add_label_calls(&self) -> u32 {
        self.add_label_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repo for StubRepo {
    async fn add_company(&self, cik: u32, name: &str) -> Result<bool> {
        let mut companies = self.companies.lock().unwrap();
        if companies.iter().any(|(existing, _)| *existing == cik) {
            return Ok(false);
        }
        companies.push((cik, name.to_string()));
        Ok(true)
    }

    async fn add_fact(&self, tax: &str, name: &str) -> Result<u32> {
        self.add_fact_calls.fetch_add(1, Ordering::SeqCst);
        let mut facts = self.facts.lock().unwrap();
        let id = facts
            .entry((tax.to_string(), name.to_string()))
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(*id)
    }

    async fn add_label(
        &self,
        fact_id: u32,
        _label: &str,
        _descr: &str,
        label_hash: u64,
        descr_hash: u64,
    ) -> Result<()> {
        self.add_label_calls.fetch_add(1, Ordering::SeqCst);
        self.labels
            .lock()
            .unwrap()
            .push((fact_id, label_hash, descr_hash));
        Ok(())
    }

    async fn add_unit(&self, name: &str) -> Result<u32> {
        let mut units = self.units.lock().unwrap();
        let id = units
            .entry(name.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(*id)
    }

    async fn add_fact_unit(&self, fact: &FactUnit) -> Result<()> {
        self.inserted.lock().unwrap().push(fact.clone());
        Ok(())
    }

    async fn copy_fact_units(&self, facts: &[FactUnit]) -> Result<()> {
        self.copied.lock().unwrap().push(facts.to_vec());
        Ok(())
    }

    async fn replace_fact_units(
        &self,
        cik: u32,
        last_filed: NaiveDate,
        facts: &[FactUnit],
    ) -> Result<()> {
        self.replaced
            .lock()
            .unwrap()
            .push((cik, last_filed, facts.to_vec()));
        Ok(())
    }

    async fn last_filed(&self) -> Result<HashMap<u32, NaiveDate>> {
        Ok(self.last_filed_rows.lock().unwrap().clone())
    }

    async fn fact_labels(&self) -> Result<Vec<FactLabelRow>> {
        Ok(self.fact_label_rows.lock().unwrap().clone())
    }

    async fn units(&self) -> Result<HashMap<u32, String>> {
        Ok(self.unit_rows.lock().unwrap().clone())
    }

    async fn filed_counts(&self, cik: u32) -> Result<HashMap<NaiveDate, u32>> {
        Ok(self
            .filed_count_rows
            .lock()
            .unwrap()
            .get(&cik)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_updated(&self) -> Result<Option<NaiveDate>> {
        Ok(*self.last_updated_row.lock().unwrap())
    }

    async fn add_last_update(&self, at: NaiveDate) -> Result<()> {
        self.last_updates.lock().unwrap().push(at);
        Ok(())
    }
}

/// Scripted [`EdgarApi`]: queued facts responses per CIK, canned archives.
#[derive(Default)]
pub(crate) struct StubClient {
    tickers: Mutex<Vec<CompanyTicker>>,
    facts: Mutex<HashMap<u32, VecDeque<std::result::Result<CompanyFacts, u16>>>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    facts_calls: AtomicU32,
}

impl StubClient {
    pub fn push_tickers(&self, tickers: Vec<CompanyTicker>) {
        *self.tickers.lock().unwrap() = tickers;
    }

    /// Queues one `company_facts` response for `cik`: a document, or an
    /// HTTP status to fail with.
    pub fn push_facts(&self, cik: u32, response: std::result::Result<CompanyFacts, u16>) {
        self.facts
            .lock()
            .unwrap()
            .entry(cik)
            .or_default()
            .push_back(response);
    }

    pub fn push_archive(&self, path: &str, body: Vec<u8>) {
        self.archives.lock().unwrap().insert(path.to_string(), body);
    }

    pub fn facts_calls(&self) -> u32 {
        self.facts_calls.load(Ordering::SeqCst)
    }

    /// The label pair used by the canned facts documents.
    pub fn apple_label() -> (String, String) {
        (
            "Accounts Payable".to_string(),
            "Carrying value of liabilities".to_string(),
        )
    }

    /// A facts document with one `us-gaap:AccountsPayable` fact in USD
    /// carrying two observations.
    pub fn facts(cik: u32, entity_name: &str) -> CompanyFacts {
        let (label, description) = Self::apple_label();
        let with_start = RawFactUnit {
            start: "2008-06-29".to_string(),
            ..apple_raw_unit()
        };
        CompanyFacts {
            cik,
            entity_name: entity_name.to_string(),
            facts: HashMap::from([(
                "us-gaap".to_string(),
                HashMap::from([(
                    "AccountsPayable".to_string(),
                    CompanyFact {
                        label,
                        description,
                        units: HashMap::from([(
                            "USD".to_string(),
                            vec![apple_raw_unit(), with_start],
                        )]),
                    },
                )]),
            )]),
        }
    }

    pub fn apple_facts() -> CompanyFacts {
        Self::facts(320193, "Apple Inc.")
    }

    /// A facts document whose only unit list is `raw_units`.
    pub fn facts_with_units(cik: u32, raw_units: Vec<RawFactUnit>) -> CompanyFacts {
        let (label, description) = Self::apple_label();
        CompanyFacts {
            cik,
            entity_name: format!("Company {cik}"),
            facts: HashMap::from([(
                "us-gaap".to_string(),
                HashMap::from([(
                    "AccountsPayable".to_string(),
                    CompanyFact {
                        label,
                        description,
                        units: HashMap::from([("USD".to_string(), raw_units)]),
                    },
                )]),
            )]),
        }
    }
}

#[async_trait]
impl EdgarApi for StubClient {
    async fn company_tickers(&self) -> Result<Vec<CompanyTicker>> {
        Ok(self.tickers.lock().unwrap().clone())
    }

    async fn company_facts(&self, cik: u32) -> Result<CompanyFacts> {
        self.facts_calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .facts
            .lock()
            .unwrap()
            .get_mut(&cik)
            .and_then(VecDeque::pop_front);
        match response {
            Some(Ok(facts)) => Ok(facts),
            Some(Err(status)) => Err(EdgarError::UnexpectedStatus {
                status,
                url: format!("stub://companyfacts/{cik}"),
            }),
            None => Err(EdgarError::Other(format!(
                "no stubbed facts response for CIK={cik}"
            ))),
        }
    }

    async fn archive_file(&self, path: &str) -> Result<Vec<u8>> {
        self.archives
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| EdgarError::UnexpectedStatus {
                status: 404,
                url: format!("stub://archives/{path}"),
            })
    }
}

/// The S1 observation: an instant fact with no period start.
pub(crate) fn apple_raw_unit() -> RawFactUnit {
    RawFactUnit {
        start: String::new(),
        end: "2008-09-27".to_string(),
        val: 5.52e9,
        accn: "0001193125-09-153165".to_string(),
        fy: 2009,
        fp: "Q3".to_string(),
        form: "10-Q".to_string(),
        filed: "2009-07-22".to_string(),
        frame: "CY2008Q3I".to_string(),
    }
}

/// An observation filed on `filed` with everything else from the S1
/// sample.
pub(crate) fn raw_unit_filed(filed: &str) -> RawFactUnit {
    RawFactUnit {
        filed: filed.to_string(),
        frame: String::new(),
        ..apple_raw_unit()
    }
}

/// Builds a gzipped master index with the given "Last Data Received"
/// header and `CIK|...|Date Filed|...` records.
pub(crate) fn gzip_master_index(last_data_received: &str, records: &[(u32, &str)]) -> Vec<u8> {
    let mut content = format!(
        "Description:           Master Index of EDGAR Dissemination Feed\n\
         Last Data Received:    {last_data_received}\n\
         \n\
         CIK|Company Name|Form Type|Date Filed|Filename\n\
         --------------------------------------------------------------------\n"
    );
    for (cik, filed) in records {
        content.push_str(&format!(
            "{cik}|COMPANY {cik}|10-Q|{filed}|edgar/data/{cik}/filing.txt\n"
        ));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content.as_bytes())
        .expect("gzip test index");
    encoder.finish().expect("finish gzip test index")
}
