//! The upload coordinator: preload, company dispatch and the bulk upload
//! flow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use edgar_client::{CompanyFacts, CompanyTicker, RawFactUnit};
use edgar_core::{EdgarError, FactUnit, Repo, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use xxhash_rust::xxh64::xxh64;

use crate::cache::{FactsCache, UnitsCache};
use crate::EdgarApi;

/// Configuration of an [`Engine`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Degree of the bounded worker pool shared by a pass.
    pub procs: usize,
    /// Upstream retry cap for company facts (HTTP 504 only).
    pub retry_num: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            procs: 4,
            retry_num: 2,
        }
    }
}

/// The ingestion engine. See the crate docs for the two flows it drives.
pub struct Engine {
    pub(crate) client: Arc<dyn EdgarApi>,
    pub(crate) repo: Arc<dyn Repo>,
    pub(crate) procs: usize,
    pub(crate) retry_num: usize,
}

/// Per-pass state built by preload and shared by worker tasks.
pub(crate) struct Pass {
    pub(crate) facts: Arc<FactsCache>,
    pub(crate) units: Arc<UnitsCache>,
    pub(crate) last_filed: HashMap<u32, NaiveDate>,
    pub(crate) unknown: Vec<CompanyTicker>,
}

/// Everything a worker task needs, cheap to clone into the task.
pub(crate) struct TaskCtx {
    pub(crate) client: Arc<dyn EdgarApi>,
    pub(crate) repo: Arc<dyn Repo>,
    pub(crate) facts: Arc<FactsCache>,
    pub(crate) units: Arc<UnitsCache>,
    pub(crate) retry_num: usize,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Engine {
    /// Creates an engine over the given ports.
    pub fn new(config: Config, repo: Arc<dyn Repo>, client: Arc<dyn EdgarApi>) -> Self {
        Self {
            client,
            repo,
            procs: config.procs.max(1),
            retry_num: config.retry_num.max(1),
        }
    }

    /// The bulk upload flow: preloads the dimension caches and loads the
    /// facts of every company the store has never seen.
    pub async fn upload(&self) -> Result<()> {
        let pass = self.preload().await?;
        let unknown = pass.unknown.clone();
        self.upload_companies(&pass, unknown)
            .await
            .map_err(|e| EdgarError::Other(format!("upload facts: {e}")))?;
        info!("upload completed");
        Ok(())
    }

    /// Hydrates the caches and computes the unknown-company slice.
    pub(crate) async fn preload(&self) -> Result<Pass> {
        let facts = Arc::new(FactsCache::new());
        info!("preload facts and labels");
        let fact_labels = self
            .repo
            .fact_labels()
            .await
            .map_err(|e| EdgarError::Other(format!("preload facts and labels: {e}")))?;
        let mut extra_labels = 0;
        for row in &fact_labels {
            let key = fact_key(&row.tax, &row.name);
            if !facts
                .preload(row.fact_id, &key, row.label_hash, row.descr_hash)
                .await
            {
                extra_labels += 1;
            }
        }
        info!(
            len = facts.len().await,
            extra = extra_labels,
            "preloaded facts and labels"
        );

        let units = Arc::new(UnitsCache::new());
        info!("preload units");
        let known_units = self
            .repo
            .units()
            .await
            .map_err(|e| EdgarError::Other(format!("preload units: {e}")))?;
        for (id, name) in &known_units {
            units.preload(*id, name).await;
        }
        info!(len = known_units.len(), "preloaded units");

        info!("preload last filed companies");
        let last_filed = self
            .repo
            .last_filed()
            .await
            .map_err(|e| EdgarError::Other(format!("preload last filed: {e}")))?;
        info!(len = last_filed.len(), "preloaded last filed companies");

        let unknown = self.unknown_companies(&last_filed).await?;

        Ok(Pass {
            facts,
            units,
            last_filed,
            unknown,
        })
    }

    /// Fetches the ticker list and returns the slice of companies not yet
    /// loaded: loaded companies sort first (CIK ascending within each
    /// half), duplicate CIKs are compacted, and everything from the first
    /// unknown company on is kept.
    async fn unknown_companies(
        &self,
        last_filed: &HashMap<u32, NaiveDate>,
    ) -> Result<Vec<CompanyTicker>> {
        info!("looking for unknown companies");
        info!("fetch company tickers");
        let mut companies = self
            .client
            .company_tickers()
            .await
            .map_err(|e| EdgarError::Other(format!("fetch company tickers: {e}")))?;
        info!(length = companies.len(), "fetched tickers");

        let loaded = |cik: u32| last_filed.contains_key(&cik);
        companies.sort_by_key(|c| (!loaded(c.cik), c.cik));
        let before = companies.len();
        companies.dedup_by_key(|c| c.cik);
        if companies.len() < before {
            info!(before, after = companies.len(), "compactified tickers");
        }

        let Some(unknown_idx) = companies.iter().position(|c| !loaded(c.cik)) else {
            return Ok(Vec::new());
        };
        if unknown_idx > 0 {
            info!(skipped = unknown_idx, "skip loaded companies");
        }

        let unknown = companies.split_off(unknown_idx);
        info!(length = unknown.len(), "found unknown companies");
        Ok(unknown)
    }

    /// Dispatches one upload task per company onto the bounded pool.
    pub(crate) async fn upload_companies(
        &self,
        pass: &Pass,
        companies: Vec<CompanyTicker>,
    ) -> Result<()> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(self.task_ctx(pass, &cancelled));
        let total = companies.len();

        let tasks = companies.into_iter().enumerate().map(|(i, company)| {
            let ctx = Arc::clone(&ctx);
            let span = info_span!(
                "company",
                CIK = company.cik,
                progress = %format!("{}/{total}", i + 1)
            );
            async move { process_company_facts(&ctx, company.cik, company.title).await }
                .instrument(span)
                .boxed()
        });

        self.run_pool(&cancelled, tasks).await
    }

    pub(crate) fn task_ctx(&self, pass: &Pass, cancelled: &Arc<AtomicBool>) -> TaskCtx {
        TaskCtx {
            client: Arc::clone(&self.client),
            repo: Arc::clone(&self.repo),
            facts: Arc::clone(&pass.facts),
            units: Arc::clone(&pass.units),
            retry_num: self.retry_num,
            cancelled: Arc::clone(cancelled),
        }
    }

    /// Runs tasks with at most `procs` in flight. The first task error
    /// marks the pass cancelled, aborts the remaining tasks and is
    /// returned; later dispatches short-circuit on the cancelled flag.
    pub(crate) async fn run_pool(
        &self,
        cancelled: &Arc<AtomicBool>,
        tasks: impl Iterator<Item = BoxFuture<'static, Result<()>>>,
    ) -> Result<()> {
        let mut tasks = tasks.fuse();
        let mut set: JoinSet<Result<()>> = JoinSet::new();
        let mut first_err: Option<EdgarError> = None;

        loop {
            while first_err.is_none() && set.len() < self.procs {
                match tasks.next() {
                    Some(task) => {
                        set.spawn(task);
                    }
                    None => break,
                }
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            if let Some(err) = task_error(joined) {
                if first_err.is_none() {
                    cancelled.store(true, Ordering::Relaxed);
                    first_err = Some(err);
                    set.abort_all();
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn task_error(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Option<EdgarError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(join_err) if join_err.is_cancelled() => None,
        Err(join_err) => Some(EdgarError::Other(format!("task panicked: {join_err}"))),
    }
}

/// The per-company upload task: fetch the facts document, upsert the
/// company, then bulk-copy every observation group.
pub(crate) async fn process_company_facts(ctx: &TaskCtx, cik: u32, title: String) -> Result<()> {
    info!(title = %title, "fetch company facts");
    let Some(facts) = company_facts(ctx, cik, title).await? else {
        return Ok(());
    };

    let groups = resolve_fact_units(ctx, cik, facts.facts).await?;
    for (fact_id, unit_id, raw_units) in groups {
        add_fact_units(ctx, cik, fact_id, unit_id, &raw_units).await?;
    }
    Ok(())
}

/// Fetches the facts document and upserts the company row. Returns `None`
/// when EDGAR has no facts for the CIK (HTTP 404), which skips the
/// company.
async fn company_facts(ctx: &TaskCtx, cik: u32, title: String) -> Result<Option<CompanyFacts>> {
    let facts = match retry_company_facts(ctx, cik).await {
        Ok(facts) => facts,
        Err(err) if err.is_status(404) => {
            info!(cause = %err, "skip company");
            return Ok(None);
        }
        Err(err) => {
            return Err(EdgarError::Other(format!(
                "failed fetch company facts (CIK={cik}): {err}"
            )))
        }
    };

    let title = if facts.entity_name.is_empty() {
        warn!(title = %title, "empty entityName");
        title
    } else {
        facts.entity_name.clone()
    };
    if facts.cik != cik {
        warn!(cik = facts.cik, "wrong cik");
    }

    let new_company = ctx.repo.add_company(cik, &title).await?;
    if new_company {
        info!("add company");
    }
    Ok(Some(facts))
}

/// Fetches company facts with a bounded retry. Only HTTP 504 is
/// retriable; exhaustion surfaces the last 504.
pub(crate) async fn retry_company_facts(ctx: &TaskCtx, cik: u32) -> Result<CompanyFacts> {
    let mut last_retriable: Option<EdgarError> = None;
    for attempt in 1..=ctx.retry_num {
        if ctx.cancelled.load(Ordering::Relaxed) {
            return Err(EdgarError::Cancelled);
        }
        match ctx.client.company_facts(cik).await {
            Ok(facts) => return Ok(facts),
            Err(err) if err.is_status(504) => {
                info!(attempt, cause = %err, "retry company facts");
                last_retriable = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    match last_retriable {
        Some(err) => Err(EdgarError::RetriesExhausted {
            source: Box::new(err),
        }),
        None => Err(EdgarError::Cancelled),
    }
}

/// Walks the two-level facts map, acquiring or creating each fact and
/// unit, and returns the observation groups keyed by their resolved ids.
pub(crate) async fn resolve_fact_units(
    ctx: &TaskCtx,
    cik: u32,
    facts: HashMap<String, HashMap<String, edgar_client::CompanyFact>>,
) -> Result<Vec<(u32, u32, Vec<RawFactUnit>)>> {
    let mut groups = Vec::new();
    for (tax, tax_facts) in facts {
        for (name, fact) in tax_facts {
            let fact_id = add_fact(ctx, &tax, &name, &fact.label, &fact.description)
                .await
                .map_err(|e| EdgarError::Other(format!("company CIK={cik}: {e}")))?;
            for (unit_name, raw_units) in fact.units {
                let unit_id = add_unit(ctx, &unit_name).await?;
                groups.push((fact_id, unit_id, raw_units));
            }
        }
    }
    Ok(groups)
}

/// Acquires the fact id, creating the fact (and its primary label) through
/// the single-flight cache on first observation. A cache hit with a new
/// label pair records the alternative label.
async fn add_fact(ctx: &TaskCtx, tax: &str, name: &str, label: &str, descr: &str) -> Result<u32> {
    let key = fact_key(tax, name);
    let label_hash = xxh64(label.as_bytes(), 0);
    let descr_hash = xxh64(descr.as_bytes(), 0);

    if let Some(fact) = ctx.facts.get(&key).await {
        let fact_id = fact.id;
        fact.add_label(label_hash, descr_hash, || {
            record_label(ctx, &key, fact_id, label, descr, label_hash, descr_hash)
        })
        .await?;
        return Ok(fact_id);
    }

    let repo = Arc::clone(&ctx.repo);
    let (tax, name, label, descr, gen_key) = (
        tax.to_string(),
        name.to_string(),
        label.to_string(),
        descr.to_string(),
        key.clone(),
    );
    let fact = ctx
        .facts
        .create(&key, label_hash, descr_hash, move || async move {
            let fact_id = repo.add_fact(&tax, &name).await?;
            repo.add_label(fact_id, &label, &descr, label_hash, descr_hash)
                .await
                .map_err(|e| {
                    EdgarError::Other(format!("failed add label fact {gen_key:?}: {e}"))
                })?;
            Ok(fact_id)
        })
        .await
        .map_err(|e| EdgarError::Other(format!("failed add fact {key:?}: {e}")))?;
    Ok(fact.id)
}

async fn record_label(
    ctx: &TaskCtx,
    key: &str,
    fact_id: u32,
    label: &str,
    descr: &str,
    label_hash: u64,
    descr_hash: u64,
) -> Result<()> {
    ctx.repo
        .add_label(fact_id, label, descr, label_hash, descr_hash)
        .await
        .map_err(|e| EdgarError::Other(format!("failed add label fact {key:?}: {e}")))
}

/// Acquires the unit id, creating the unit through the single-flight
/// cache on first observation.
async fn add_unit(ctx: &TaskCtx, name: &str) -> Result<u32> {
    let repo = Arc::clone(&ctx.repo);
    let owned_name = name.to_string();
    ctx.units
        .id(name, move || async move { repo.add_unit(&owned_name).await })
        .await
        .map_err(|e| EdgarError::Other(format!("failed add unit {name:?}: {e}")))
}

/// Converts and bulk-copies one observation group.
async fn add_fact_units(
    ctx: &TaskCtx,
    cik: u32,
    fact_id: u32,
    unit_id: u32,
    raw_units: &[RawFactUnit],
) -> Result<()> {
    let facts = raw_units
        .iter()
        .map(|raw| build_repo_fact_unit(cik, fact_id, unit_id, raw))
        .collect::<Result<Vec<_>>>()?;
    ctx.repo.copy_fact_units(&facts).await.map_err(|e| {
        EdgarError::Other(format!(
            "failed add {} facts: cik={cik}, factId={fact_id}, unitId={unit_id}: {e}",
            facts.len()
        ))
    })
}

/// Converts a client observation into its persisted shape. Pure: empty
/// `start`/`frame` become NULLs, `end` and `filed` are required, and any
/// unparseable date is an error.
pub(crate) fn build_repo_fact_unit(
    cik: u32,
    fact_id: u32,
    unit_id: u32,
    raw: &RawFactUnit,
) -> Result<FactUnit> {
    let convert_err =
        |e: EdgarError| EdgarError::Other(format!("convert FactUnit from client to repo: {e}"));

    let mut fact = FactUnit {
        cik,
        fact_id,
        unit_id,
        start: raw.start_date().map_err(convert_err)?,
        end: raw.end_date().map_err(convert_err)?,
        val: raw.val,
        accn: raw.accn.clone(),
        fy: raw.fy,
        fp: raw.fp.clone(),
        form: raw.form.clone(),
        filed: raw.filed_date().map_err(convert_err)?,
        frame: None,
    };
    if !raw.frame.is_empty() {
        fact = fact.with_frame(raw.frame.clone());
    }
    Ok(fact)
}

pub(crate) fn fact_key(tax: &str, name: &str) -> String {
    format!("{tax}:{name}")
}
