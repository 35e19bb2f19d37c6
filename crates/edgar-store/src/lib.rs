#![forbid(unsafe_code)]

//! Postgres persistence for EDGAR facts.
//!
//! [`PgStore`] implements the [`Repo`] port on top of an
//! [`sqlx::PgPool`]. Dimension rows (companies, facts, labels, units) use
//! `INSERT ... ON CONFLICT DO NOTHING`; observations are loaded through
//! `COPY ... FROM STDIN` in Postgres text format, which is the only way the
//! pipeline writes them in bulk.
//!
//! The xxh64 label digests exceed `i64`, so the hash columns are `NUMERIC`
//! and values cross the wire as decimal strings with explicit casts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use edgar_core::{EdgarError, FactLabelRow, FactUnit, Repo, Result};
use sqlx::postgres::{PgPool, PgPoolCopyExt, PgPoolOptions};
use sqlx::Row;
use tracing::debug;

/// DDL applied by [`PgStore::init_schema`].
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");

/// Columns of the `fact_units` COPY, in encoding order.
const FACT_UNIT_COLUMNS: &str = "company_cik, fact_id, unit_id, fact_start, fact_end, \
                                 val, accn, fy, fp, form, filed, frame";

/// Postgres-backed implementation of the [`Repo`] port.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database at `url` and pings it.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect(url)
            .await
            .map_err(store_err)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the schema DDL. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn returned_or_selected_id(
        &self,
        insert: &str,
        select: &str,
        binds: &[&str],
    ) -> Result<u32> {
        let mut query = sqlx::query(insert);
        for bind in binds {
            query = query.bind(*bind);
        }
        if let Some(row) = query.fetch_optional(&self.pool).await.map_err(store_err)? {
            let id: i32 = row.try_get(0).map_err(store_err)?;
            return Ok(id as u32);
        }

        // Conflict path: the row already exists, fetch its id.
        let mut query = sqlx::query(select);
        for bind in binds {
            query = query.bind(*bind);
        }
        let row = query.fetch_one(&self.pool).await.map_err(store_err)?;
        let id: i32 = row.try_get(0).map_err(store_err)?;
        Ok(id as u32)
    }
}

#[async_trait]
impl Repo for PgStore {
    async fn add_company(&self, cik: u32, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO companies (cik, entity_name)
               VALUES              ($1,  $2)
               ON CONFLICT DO NOTHING",
        )
        .bind(cik as i32)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err_ctx(format!("add company CIK={cik} {name:?}"), e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_fact(&self, tax: &str, name: &str) -> Result<u32> {
        self.returned_or_selected_id(
            "INSERT INTO facts (fact_tax, fact_name)
               VALUES          ($1,       $2)
               ON CONFLICT DO NOTHING
               RETURNING id",
            "SELECT id FROM facts WHERE fact_tax = $1 AND fact_name = $2",
            &[tax, name],
        )
        .await
        .map_err(|e| store_wrap(format!("add fact \"{tax}:{name}\""), e))
    }

    async fn add_label(
        &self,
        fact_id: u32,
        label: &str,
        descr: &str,
        label_hash: u64,
        descr_hash: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO fact_labels (fact_id, fact_label, descr, xxhash1, xxhash2)
               VALUES                ($1,      $2,         $3,    $4::numeric, $5::numeric)
               ON CONFLICT DO NOTHING",
        )
        .bind(fact_id as i32)
        .bind(label)
        .bind(descr)
        .bind(label_hash.to_string())
        .bind(descr_hash.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err_ctx(format!("add fact label for {fact_id}"), e))?;
        Ok(())
    }

    async fn add_unit(&self, name: &str) -> Result<u32> {
        self.returned_or_selected_id(
            "INSERT INTO units (unit_name)
               VALUES          ($1)
               ON CONFLICT DO NOTHING
               RETURNING id",
            "SELECT id FROM units WHERE unit_name = $1",
            &[name],
        )
        .await
        .map_err(|e| store_wrap(format!("add unit {name:?}"), e))
    }

    async fn add_fact_unit(&self, fact: &FactUnit) -> Result<()> {
        sqlx::query(
            "INSERT INTO fact_units (company_cik, fact_id, unit_id,
                                     fact_start,  fact_end, val, accn, fy, fp,
                                     form,        filed,    frame)
               VALUES               ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(fact.cik as i32)
        .bind(fact.fact_id as i32)
        .bind(fact.unit_id as i32)
        .bind(fact.start)
        .bind(fact.end)
        .bind(fact.val)
        .bind(&fact.accn)
        .bind(i32::from(fact.fy))
        .bind(&fact.fp)
        .bind(&fact.form)
        .bind(fact.filed)
        .bind(&fact.frame)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err_ctx("add fact unit".to_string(), e))?;
        Ok(())
    }

    async fn copy_fact_units(&self, facts: &[FactUnit]) -> Result<()> {
        let mut copy = self
            .pool
            .copy_in_raw(&copy_statement())
            .await
            .map_err(store_err)?;

        let data = encode_copy_rows(facts);
        if let Err(e) = copy.send(data.as_bytes()).await {
            let _ = copy.abort("encode failed").await;
            return Err(store_err(e));
        }
        let copied = copy.finish().await.map_err(store_err)?;

        check_copied(copied, facts.len())
    }

    async fn replace_fact_units(
        &self,
        cik: u32,
        last_filed: NaiveDate,
        facts: &[FactUnit],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let deleted = sqlx::query(
            "DELETE FROM fact_units WHERE company_cik = $1 AND filed >= $2",
        )
        .bind(cik as i32)
        .bind(last_filed)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err_ctx(format!("delete fact units of CIK={cik}"), e))?;
        debug!(cik, deleted = deleted.rows_affected(), "deleted fact units");

        let mut copy = (&mut *tx)
            .copy_in_raw(&copy_statement())
            .await
            .map_err(store_err)?;
        let data = encode_copy_rows(facts);
        if let Err(e) = copy.send(data.as_bytes()).await {
            let _ = copy.abort("encode failed").await;
            return Err(store_err(e));
        }
        let copied = copy.finish().await.map_err(store_err)?;
        check_copied(copied, facts.len())?;

        tx.commit().await.map_err(store_err)
    }

    async fn last_filed(&self) -> Result<HashMap<u32, NaiveDate>> {
        let rows = sqlx::query(
            "SELECT company_cik, MAX(filed) AS filed
               FROM fact_units
               GROUP BY company_cik",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut last_filed = HashMap::with_capacity(rows.len());
        for row in rows {
            let cik: i32 = row.try_get("company_cik").map_err(store_err)?;
            let filed: NaiveDate = row.try_get("filed").map_err(store_err)?;
            last_filed.insert(cik as u32, filed);
        }
        Ok(last_filed)
    }

    async fn fact_labels(&self) -> Result<Vec<FactLabelRow>> {
        let rows = sqlx::query(
            "SELECT fl.fact_id, f.fact_tax, f.fact_name, fl.id,
                    fl.xxhash1::text AS xxhash1, fl.xxhash2::text AS xxhash2
               FROM fact_labels fl
               JOIN facts f ON f.id = fl.fact_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut labels = Vec::with_capacity(rows.len());
        for row in rows {
            let fact_id: i32 = row.try_get("fact_id").map_err(store_err)?;
            let label_id: i32 = row.try_get("id").map_err(store_err)?;
            labels.push(FactLabelRow {
                fact_id: fact_id as u32,
                tax: row.try_get("fact_tax").map_err(store_err)?,
                name: row.try_get("fact_name").map_err(store_err)?,
                label_id: label_id as u32,
                label_hash: parse_hash(row.try_get("xxhash1").map_err(store_err)?)?,
                descr_hash: parse_hash(row.try_get("xxhash2").map_err(store_err)?)?,
            });
        }
        Ok(labels)
    }

    async fn units(&self) -> Result<HashMap<u32, String>> {
        let rows = sqlx::query("SELECT id, unit_name FROM units")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut units = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.try_get("id").map_err(store_err)?;
            units.insert(id as u32, row.try_get("unit_name").map_err(store_err)?);
        }
        Ok(units)
    }

    async fn filed_counts(&self, cik: u32) -> Result<HashMap<NaiveDate, u32>> {
        let rows = sqlx::query(
            "SELECT filed, COUNT(*) AS cnt
               FROM fact_units
               WHERE company_cik = $1
               GROUP BY filed",
        )
        .bind(cik as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err_ctx(format!("filed counts of CIK={cik}"), e))?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let filed: NaiveDate = row.try_get("filed").map_err(store_err)?;
            let cnt: i64 = row.try_get("cnt").map_err(store_err)?;
            counts.insert(filed, cnt as u32);
        }
        Ok(counts)
    }

    async fn last_updated(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(at) AS at FROM last_updates")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        row.try_get("at").map_err(store_err)
    }

    async fn add_last_update(&self, at: NaiveDate) -> Result<()> {
        sqlx::query("INSERT INTO last_updates (at) VALUES ($1)")
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

fn copy_statement() -> String {
    format!("COPY fact_units ({FACT_UNIT_COLUMNS}) FROM STDIN")
}

fn check_copied(copied: u64, expected: usize) -> Result<()> {
    if copied != expected as u64 {
        return Err(EdgarError::CopyCount {
            copied,
            expected: expected as u64,
        });
    }
    Ok(())
}

/// Encodes observations in Postgres text COPY format: tab-separated
/// fields, `\N` for NULL, one row per line.
fn encode_copy_rows(facts: &[FactUnit]) -> String {
    let mut data = String::with_capacity(facts.len() * 128);
    for fact in facts {
        encode_copy_row(&mut data, fact);
    }
    data
}

fn encode_copy_row(data: &mut String, fact: &FactUnit) {
    use std::fmt::Write as _;

    let _ = write!(data, "{}\t{}\t{}\t", fact.cik, fact.fact_id, fact.unit_id);
    match fact.start {
        Some(start) => {
            let _ = write!(data, "{start}");
        }
        None => data.push_str("\\N"),
    }
    let _ = write!(data, "\t{}\t{}\t", fact.end, fact.val);
    push_copy_text(data, &fact.accn);
    let _ = write!(data, "\t{}\t", fact.fy);
    push_copy_text(data, &fact.fp);
    data.push('\t');
    push_copy_text(data, &fact.form);
    let _ = write!(data, "\t{}\t", fact.filed);
    match &fact.frame {
        Some(frame) => push_copy_text(data, frame),
        None => data.push_str("\\N"),
    }
    data.push('\n');
}

/// Escapes a text field for the COPY text format.
fn push_copy_text(data: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => data.push_str("\\\\"),
            '\t' => data.push_str("\\t"),
            '\n' => data.push_str("\\n"),
            '\r' => data.push_str("\\r"),
            _ => data.push(c),
        }
    }
}

fn parse_hash(s: String) -> Result<u64> {
    s.parse()
        .map_err(|e| EdgarError::Store(format!("parse hash {s:?}: {e}")))
}

fn store_err(e: sqlx::Error) -> EdgarError {
    EdgarError::Store(e.to_string())
}

fn store_err_ctx(ctx: String, e: sqlx::Error) -> EdgarError {
    EdgarError::Store(format!("{ctx}: {e}"))
}

fn store_wrap(ctx: String, e: EdgarError) -> EdgarError {
    match e {
        EdgarError::Store(msg) => EdgarError::Store(format!("{ctx}: {msg}")),
        other => other,
    }
}
