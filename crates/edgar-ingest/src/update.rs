//! The incremental update flow: discover companies with new filings
//! against the quarterly master indexes and refresh only those.

use std::collections::{HashMap, HashSet};
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use edgar_client::{IndexFile, Qtr};
use edgar_core::{EdgarError, FactUnit, Result};
use flate2::read::GzDecoder;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{info, info_span, warn, Instrument};

use crate::engine::{
    build_repo_fact_unit, resolve_fact_units, retry_company_facts, Engine, Pass, TaskCtx,
};

const INDEX_PATH: &str = "edgar/full-index";
const MASTER_INDEX: &str = "master.gz";

/// How a company's fresh observations relate to what the store holds at
/// the last-filed boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UpdateAction {
    /// The remote side has no changes.
    Skip,
    /// New rows begin at this index; append them with a plain copy.
    Append(usize),
    /// The boundary day itself changed; delete from the boundary on and
    /// copy everything fresh.
    Replace,
}

impl Engine {
    /// The incremental update flow: computes the minimum set of companies
    /// needing refresh against the quarterly indexes, refreshes them on
    /// the worker pool, uploads any new filers, and persists the new
    /// watermark.
    pub async fn update(&self) -> Result<()> {
        let mut pass = self.preload().await?;

        let since = match self.repo.last_updated().await? {
            Some(at) => at,
            None => most_recent_filed(&pass.last_filed).ok_or_else(|| {
                EdgarError::Other("no filings loaded yet, run upload first".to_string())
            })?,
        };

        let last_updated = self.refresh_last_filed(&mut pass, since).await?;

        info!("update all known companies");
        self.update_known_companies(&pass).await?;

        if !pass.unknown.is_empty() {
            info!(length = pass.unknown.len(), "upload new companies");
            let unknown = std::mem::take(&mut pass.unknown);
            self.upload_companies(&pass, unknown)
                .await
                .map_err(|e| EdgarError::Other(format!("upload facts: {e}")))?;
        }

        self.repo.add_last_update(last_updated).await?;
        info!("update completed");
        Ok(())
    }

    /// Discovers which companies have filings since `since` and purges
    /// `last_filed` and `unknown` down to them. Returns the new
    /// watermark: the root index's "Last Data Received".
    async fn refresh_last_filed(&self, pass: &mut Pass, since: NaiveDate) -> Result<NaiveDate> {
        info!("looking for updated companies");
        let master_path = format!("{INDEX_PATH}/{MASTER_INDEX}");
        let (last_updated, filings) = self.index_filings(&master_path).await?;
        info!(at = %last_updated, path = %master_path, "EDGAR last updated");

        let mut updated = has_updates(&filings, since, HashSet::new());

        info!(since = %since, "looking for updates");
        let last_qtr = Qtr::new(last_updated);
        let mut qtr = Qtr::new(since);
        while qtr <= last_qtr {
            let path = format!("{INDEX_PATH}/{}/{MASTER_INDEX}", qtr.path());
            let (_, filings) = self.index_filings(&path).await?;
            updated = has_updates(&filings, since, updated);
            qtr.next();
        }
        info!(length = updated.len(), "got updated companies");

        pass.last_filed.retain(|cik, _| updated.contains(cik));
        pass.unknown.retain(|company| updated.contains(&company.cik));
        Ok(last_updated)
    }

    /// Fetches and gunzips one master index, returning its header date
    /// and the per-company most recent filing dates.
    async fn index_filings(&self, path: &str) -> Result<(NaiveDate, HashMap<u32, NaiveDate>)> {
        info!(path, "fetch index file");
        let body = self
            .client
            .archive_file(path)
            .await
            .map_err(|e| EdgarError::Other(format!("failed fetch index file {path:?}: {e}")))?;

        let reader = BufReader::new(GzDecoder::new(body.as_slice()));
        let mut file = IndexFile::read(reader)
            .map_err(|e| EdgarError::Other(format!("failed read headers from {path:?}: {e}")))?;
        let companies = file
            .companies_last_filed()
            .map_err(|e| EdgarError::Other(format!("failed fetch companies from {path:?}: {e}")))?;
        let last_filed = file.last_filed();

        info!(lastFiled = %last_filed, companies = companies.len(), path, "fetched index file");
        Ok((last_filed, companies))
    }

    /// Dispatches one update task per surviving company, logging progress
    /// once per second until the pool drains.
    async fn update_known_companies(&self, pass: &Pass) -> Result<()> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(self.task_ctx(pass, &cancelled));
        let total = pass.last_filed.len();
        let progress = Arc::new(AtomicU32::new(0));

        let (stop_tx, stop_rx) = oneshot::channel();
        let ticker = tokio::spawn(log_progress(Arc::clone(&progress), total, stop_rx));

        let companies: Vec<(u32, NaiveDate)> =
            pass.last_filed.iter().map(|(cik, at)| (*cik, *at)).collect();
        let tasks = companies.into_iter().map(|(cik, last_filed)| {
            let ctx = Arc::clone(&ctx);
            let dispatched = progress.fetch_add(1, Ordering::Relaxed) + 1;
            let span =
                info_span!("company", CIK = cik, progress = %format!("{dispatched}/{total}"));
            async move { update_company_facts(&ctx, cik, last_filed).await }
                .instrument(span)
                .boxed()
        });
        let result = self.run_pool(&cancelled, tasks).await;

        let _ = stop_tx.send(());
        if let Err(err) = ticker.await {
            warn!(cause = %err, "progress ticker failed");
        }
        result
    }
}

async fn log_progress(progress: Arc<AtomicU32>, total: usize, mut stop: oneshot::Receiver<()>) {
    let period = Duration::from_secs(1);
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    info!("start periodic progress logging");
    loop {
        tokio::select! {
            _ = &mut stop => {
                info!("stop periodic progress logging");
                return;
            }
            _ = tick.tick() => {
                info!(
                    progress = %format!("{}/{total}", progress.load(Ordering::Relaxed)),
                    "looking for new facts"
                );
            }
        }
    }
}

/// The per-company update task. Fetches the stored per-day counts and the
/// fresh facts concurrently, then applies the minimal write: nothing, an
/// appending copy, or a transactional replace of the boundary day.
pub(crate) async fn update_company_facts(
    ctx: &TaskCtx,
    cik: u32,
    last_filed: NaiveDate,
) -> Result<()> {
    let wrap = |e: EdgarError| EdgarError::Other(format!("update company CIK={cik}: {e}"));

    let (counts, facts) = tokio::join!(ctx.repo.filed_counts(cik), retry_company_facts(ctx, cik));
    let counts = counts.map_err(wrap)?;
    let facts = facts.map_err(wrap)?;

    let fresh = fresh_repo_facts(ctx, cik, facts.facts, last_filed).await?;
    let last_cnt = counts.get(&last_filed).copied().unwrap_or(0);

    match classify(last_cnt, &fresh, last_filed) {
        UpdateAction::Skip => Ok(()),
        UpdateAction::Append(start) => {
            info!(
                length = fresh.len() - start,
                was = last_cnt,
                got = fresh.len(),
                start,
                "append new facts"
            );
            ctx.repo
                .copy_fact_units(&fresh[start..])
                .await
                .map_err(wrap)
        }
        UpdateAction::Replace => {
            info!(length = fresh.len(), was = last_cnt, "replace last filed facts");
            ctx.repo
                .replace_fact_units(cik, last_filed, &fresh)
                .await
                .map_err(wrap)
        }
    }
}

/// Converts the fresh facts document, dropping rows filed before the
/// stored boundary and sorting the rest by filing date.
async fn fresh_repo_facts(
    ctx: &TaskCtx,
    cik: u32,
    facts: HashMap<String, HashMap<String, edgar_client::CompanyFact>>,
    last_filed: NaiveDate,
) -> Result<Vec<FactUnit>> {
    let groups = resolve_fact_units(ctx, cik, facts).await?;

    let mut fresh = Vec::new();
    for (fact_id, unit_id, raw_units) in groups {
        for raw in &raw_units {
            let fact = build_repo_fact_unit(cik, fact_id, unit_id, raw)
                .map_err(|e| EdgarError::Other(format!("company CIK={cik}: {e}")))?;
            if fact.filed >= last_filed {
                fresh.push(fact);
            }
        }
    }
    fresh.sort_by_key(|fact| fact.filed);
    Ok(fresh)
}

/// Classifies a company's fresh observations against the stored count at
/// the boundary day.
pub(crate) fn classify(last_cnt: u32, fresh: &[FactUnit], last_filed: NaiveDate) -> UpdateAction {
    if fresh.is_empty() || last_cnt as usize == fresh.len() {
        return UpdateAction::Skip;
    }
    match fresh.iter().position(|fact| fact.filed > last_filed) {
        Some(start) if start == last_cnt as usize => UpdateAction::Append(start),
        _ => UpdateAction::Replace,
    }
}

/// The most recent filing date across all loaded companies.
fn most_recent_filed(last_filed: &HashMap<u32, NaiveDate>) -> Option<NaiveDate> {
    last_filed.values().max().copied()
}

/// Marks every CIK whose index filing date is at or past `since`.
fn has_updates(
    filings: &HashMap<u32, NaiveDate>,
    since: NaiveDate,
    mut companies: HashSet<u32>,
) -> HashSet<u32> {
    for (cik, filed) in filings {
        if *filed >= since {
            companies.insert(*cik);
        }
    }
    companies
}
