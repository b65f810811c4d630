use crate::{
    store::{gaps_below, ProgressStore, StoreConnector, StoreError},
    types::{HttpStatus, ProbeResult, Unit},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode},
    ConnectOptions,
};
use std::{collections::BTreeSet, str::FromStr, time::Duration};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS headers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    rank          INTEGER NOT NULL,
    domain        TEXT    NOT NULL,
    url           TEXT    NOT NULL,
    ip            TEXT,
    http_code     INTEGER,
    header_string TEXT    NOT NULL,
    header_json   TEXT    NOT NULL,
    elapsed_ms    INTEGER NOT NULL,
    probed_at     TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE UNIQUE INDEX IF NOT EXISTS headers_rank_url ON headers (rank, url);
CREATE INDEX IF NOT EXISTS headers_rank_domain ON headers (rank, domain);
CREATE TABLE IF NOT EXISTS mx (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    rank   INTEGER NOT NULL,
    domain TEXT    NOT NULL,
    mx     TEXT    NOT NULL
);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens one SQLite connection per caller against a shared database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connect(format!("{}: {}", url, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        Ok(Self { options })
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    async fn connect(&self) -> Result<Self::Store, StoreError> {
        let mut conn = self
            .options
            .connect()
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        sqlx::raw_sql(SCHEMA).execute(&mut conn).await?;
        info!(
            path = %self.options.get_filename().display(),
            "Connection to SQLite database established"
        );
        Ok(SqliteStore { conn })
    }
}

pub struct SqliteStore {
    conn: SqliteConnection,
}

impl SqliteStore {
    pub async fn probe_count(&mut self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM headers")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(count as u64)
    }
}

fn stored_code(status: HttpStatus) -> Option<i64> {
    match status {
        HttpStatus::Code(code) => Some(i64::from(code)),
        HttpStatus::Missing => None,
        HttpStatus::Unreachable => Some(0),
    }
}

impl ProgressStore for SqliteStore {
    async fn missing_ranks(
        &mut self,
        variants: usize,
        candidates: &BTreeSet<u64>,
    ) -> Result<BTreeSet<u64>, StoreError> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT rank, COUNT(*) FROM headers GROUP BY rank")
                .fetch_all(&mut self.conn)
                .await?;
        let counts = rows
            .into_iter()
            .map(|(rank, count)| (rank as u64, count as usize));
        Ok(gaps_below(counts, candidates, variants))
    }

    async fn lowest_unresolved_rank(&mut self) -> Result<u64, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(rank) FROM headers")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(max.map_or(1, |max| max as u64 + 1))
    }

    async fn domain_fully_processed(
        &mut self,
        unit: &Unit,
        variants: usize,
    ) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM headers WHERE rank = ? AND domain = ?")
                .bind(unit.rank as i64)
                .bind(&unit.domain)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(count as usize >= variants)
    }

    async fn variant_processed(&mut self, variant_url: &str, rank: u64) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM headers WHERE rank = ? AND url = ?")
                .bind(rank as i64)
                .bind(variant_url)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(count > 0)
    }

    async fn persist(&mut self, result: &ProbeResult) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO headers \
             (rank, domain, url, ip, http_code, header_string, header_json, elapsed_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result.rank as i64)
        .bind(&result.domain)
        .bind(&result.variant_url)
        .bind(result.resolved_ip.as_deref())
        .bind(stored_code(result.status))
        .bind(&result.raw_headers)
        .bind(result.header_json().to_string())
        .bind(result.elapsed.as_millis() as i64)
        .execute(&mut self.conn)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Duplicate {
                rank: result.rank,
                url: result.variant_url.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_mx(&mut self, rank: u64, host: &str, mx: &[String]) -> Result<(), StoreError> {
        let mx = serde_json::to_string(mx).map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query("INSERT INTO mx (rank, domain, mx) VALUES (?, ?, ?)")
            .bind(rank as i64)
            .bind(host)
            .bind(mx)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }
}
