//! Relational Store for the election dataset.
//!
//! Wraps an embedded SQLite database loaded once at startup from the two
//! dataset CSV files, with every derived analytics table/view built during
//! bootstrap (winner flags, party/alliance summaries, enriched views,
//! constituency margins, NOTA and independents rollups).
//!
//! Two execution paths are exposed:
//! - `execute_select` for untrusted, generator-produced SQL. The statement
//!   prefix is re-checked at this boundary even though the safety validator
//!   already filtered it, and the connection runs with `PRAGMA query_only`
//!   after bootstrap, so a write that slips through still fails inside
//!   SQLite.
//! - `query` for trusted, parameterized statements issued by the overview
//!   endpoints.
//!
//! The schema description handed to the prompt builder is generated once
//! from the catalog (`sqlite_master` + `pragma_table_info`) and is immutable
//! afterwards.

mod bootstrap;
mod rows;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use rows::QueryRows;
pub use rusqlite::ToSql;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("dataset file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("query failed: {0}")]
    Failed(String),
    #[error("rejected at store boundary: only SELECT statements may be executed")]
    NotReadOnly,
}

/// Read-only SQL execution interface consumed by the orchestrator.
/// Implemented by `ElectionStore` and by scripted stubs in tests.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute_select(&self, sql: &str) -> Result<QueryRows, StoreError>;
}

pub struct ElectionStore {
    conn: Arc<Mutex<Connection>>,
    schema_description: String,
}

impl ElectionStore {
    /// Open an in-memory store from the dataset directory, expecting
    /// `bihar_2025_candidates.csv` and `bihar_2025_ac_totals.csv`.
    pub fn open_from_dir(dir: &Path) -> Result<Self, StoreError> {
        let candidates = std::fs::read_to_string(dir.join("bihar_2025_candidates.csv"))?;
        let ac_totals = std::fs::read_to_string(dir.join("bihar_2025_ac_totals.csv"))?;
        Self::open_with_csv(&candidates, &ac_totals)
    }

    /// Open an in-memory store from CSV text. Used directly by tests and by
    /// `open_from_dir` in production.
    pub fn open_with_csv(candidates_csv: &str, ac_totals_csv: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        bootstrap::load(&mut conn, candidates_csv, ac_totals_csv)?;

        let schema_description = build_schema_description(&conn)?;

        // Bootstrap is the only write phase; from here on the connection is
        // read-only for everyone, including SQL that passed the validator.
        conn.pragma_update(None, "query_only", true)?;

        log::info!(
            "Election store initialized: {} tables/views available",
            catalog_entries(&conn)?.len()
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema_description,
        })
    }

    /// Human-readable catalog listing built once at startup, used to ground
    /// SQL generation.
    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    /// Trusted parameterized query path for the overview/analytics layer.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn rusqlite::ToSql + Sync)],
    ) -> Result<QueryRows, StoreError> {
        let conn = self.conn.lock().await;
        let params: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|&p| p as &dyn rusqlite::ToSql).collect();
        run_query(&conn, sql, &params)
    }
}

#[async_trait]
impl SqlExecutor for ElectionStore {
    async fn execute_select(&self, sql: &str) -> Result<QueryRows, StoreError> {
        // Defense in depth: the validator already filtered this candidate,
        // but the store enforces the read-only contract on its own boundary.
        let lowered = sql.trim_start().to_ascii_lowercase();
        if !lowered.starts_with("select") && !lowered.starts_with("with") {
            return Err(StoreError::NotReadOnly);
        }

        let conn = self.conn.lock().await;
        run_query(&conn, sql, &[])
    }
}

fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<QueryRows, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut out: Vec<Map<String, Value>> = Vec::new();
    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (idx, name) in columns.iter().enumerate() {
            object.insert(name.clone(), rows::value_ref_to_json(row.get_ref(idx)?));
        }
        out.push(object);
    }

    Ok(QueryRows {
        columns,
        rows: out,
    })
}

fn catalog_entries(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY type, name",
    )?;
    let entries = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Usage notes appended below the generated catalog listing. Mirrors the
/// guidance the dataset needs: alliance handling and short codes.
const SCHEMA_NOTES: &str = "\
Notes:
- alliance is typically 'NDA', 'MGB', or 'OTHER'.
- party_short contains short codes like 'BJP', 'RJD', 'VIP', 'JDU', etc.
- For queries about alliances (NDA vs MGB), use alliance_summary or group by alliance
  in candidates_enriched or party_summary_enriched.
- For queries that use party short codes (e.g. 'BJP', 'RJD'), filter on party_short
  in candidates_enriched or party_summary_enriched.
- is_winner is 1 for the winning candidate of a constituency, 0 otherwise.";

fn build_schema_description(conn: &Connection) -> Result<String, StoreError> {
    let mut description = String::from("We have these SQLite tables and views:\n");

    for (index, (name, kind)) in catalog_entries(conn)?.iter().enumerate() {
        let mut stmt =
            conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([name], |row| {
                let col: String = row.get(0)?;
                let ty: String = row.get(1)?;
                Ok(if ty.is_empty() { col } else { format!("{} {}", col, ty) })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let label = if kind == "view" {
            format!("{} (VIEW)", name)
        } else {
            name.clone()
        };
        description.push_str(&format!(
            "\n{}) {}(\n  {}\n)\n",
            index + 1,
            label,
            columns.join(",\n  ")
        ));
    }

    description.push('\n');
    description.push_str(SCHEMA_NOTES);
    Ok(description)
}
