#![forbid(unsafe_code)]

//! HTTP client for SEC EDGAR data.
//!
//! This crate provides access to the EDGAR APIs used by the ingestion
//! pipeline:
//!
//! - The company ticker list from `company_tickers.json`
//! - Per-company XBRL facts from the Company Facts API
//! - Raw archive files and `index.json` directory listings under
//!   `/Archives`
//! - The pipe-delimited quarterly master index format ([`IndexFile`])
//! - The quarter cursor used to walk index directories ([`Qtr`])
//!
//! Every request goes through one rate limiter honoring the SEC's access
//! policy (max 10 requests per second) and carries the caller-supplied
//! `User-Agent` identifying a contact, as EDGAR requires.
//!
//! # Example
//!
//! ```no_run
//! use edgar_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("MyApp/1.0 (contact@example.com)")?;
//!     let facts = client.company_facts(320193).await?;
//!     println!("{}: {} taxonomies", facts.entity_name, facts.facts.len());
//!     Ok(())
//! }
//! ```

/// Archive `index.json` directory listings.
pub mod archive;
/// Company facts and ticker response types.
pub mod facts;
/// The pipe-delimited master index parser.
pub mod index;
/// Calendar quarter cursor over index directories.
pub mod qtr;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use edgar_core::{EdgarError, Result};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

pub use archive::{ArchiveIndex, ArchiveItem};
pub use facts::{CompanyFact, CompanyFacts, CompanyTicker, RawFactUnit};
pub use index::{IndexFile, IndexItem};
pub use qtr::Qtr;

/// SEC EDGAR API base URL.
const API_BASE_URL: &str = "https://data.sec.gov";

/// SEC EDGAR archives base URL.
const ARCHIVES_BASE_URL: &str = "https://www.sec.gov/Archives";

/// SEC company tickers URL.
const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";

/// Name of the JSON directory listing inside every archive directory.
const INDEX_JSON_NAME: &str = "index.json";

/// Default rate limit: 10 requests per second (SEC requirement).
const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Highest status code treated as a successful response.
const MAX_EXPECTED_STATUS: u16 = 299;

/// Rate limiter to ensure we don't exceed SEC's rate limits.
#[derive(Debug)]
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Instant::now() - min_interval,
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

/// Rate-limited SEC EDGAR client.
///
/// All HTTP traffic (facts, tickers, archive listings, archive files)
/// passes through the same limiter.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    api_base_url: String,
    archives_base_url: String,
}

impl Client {
    /// Create a new EDGAR client with the specified user agent.
    ///
    /// The SEC requires identifying user agent headers. Format should be:
    /// "AppName/Version (contact@email.com)".
    pub fn new(user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| EdgarError::Network(e.to_string()))?;

        Ok(Self {
            http,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(DEFAULT_RATE_LIMIT))),
            api_base_url: API_BASE_URL.to_string(),
            archives_base_url: ARCHIVES_BASE_URL.to_string(),
        })
    }

    /// Overrides the Company Facts API base URL. Used by tests.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Overrides the `/Archives` base URL. Used by tests.
    #[must_use]
    pub fn with_archives_base_url(mut self, url: impl Into<String>) -> Self {
        self.archives_base_url = url.into();
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.rate_limiter.lock().await.wait().await;

        debug!(url, "GET");
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| EdgarError::Network(format!("GET {url}: {e}")))
    }

    fn check_status(url: &str, response: &reqwest::Response) -> Result<()> {
        let status = response.status().as_u16();
        if status > MAX_EXPECTED_STATUS {
            return Err(EdgarError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        Self::check_status(url, &response)?;
        response
            .json()
            .await
            .map_err(|e| EdgarError::Parse(format!("decode GET {url}: {e}")))
    }

    /// Fetches the company ticker list.
    ///
    /// The response is a JSON object keyed by an arbitrary index; the order
    /// is discarded.
    pub async fn company_tickers(&self) -> Result<Vec<CompanyTicker>> {
        let tickers: HashMap<String, CompanyTicker> =
            self.get_json(COMPANY_TICKERS_URL).await?;
        Ok(tickers.into_values().collect())
    }

    /// Fetches all XBRL facts for a company.
    pub async fn company_facts(&self, cik: u32) -> Result<CompanyFacts> {
        self.get_json(&self.company_facts_url(cik)).await
    }

    fn company_facts_url(&self, cik: u32) -> String {
        format!("{}/api/xbrl/companyfacts/CIK{cik:010}.json", self.api_base_url)
    }

    /// Fetches a raw file from `/Archives/{path}` and returns its body.
    pub async fn archive_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = join_url(&self.archives_base_url, path);
        let response = self.get(&url).await?;
        Self::check_status(&url, &response)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| EdgarError::Network(format!("read body from GET {url}: {e}")))?;
        Ok(body.to_vec())
    }

    /// Fetches the `index.json` directory listing of `/Archives/{path}`.
    pub async fn index_archive(&self, path: &str) -> Result<ArchiveIndex> {
        let url = join_url(&join_url(&self.archives_base_url, path), INDEX_JSON_NAME);
        self.get_json(&url).await
    }
}

/// Joins a base URL and a path with exactly one separating slash.
fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
