use crate::ingest::normalizer::Metric;
use chrono::{NaiveDate, NaiveDateTime};
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;

/// One atomic insert-or-increment per counter key. Concurrent requests on
/// the same (site, metric, date) key contend inside the storage engine,
/// never through application-level read-modify-write.
const UPSERT_COUNTER: &str = "
INSERT INTO counters (site_id, name, value, date, count)
VALUES (?, ?, ?, CAST(? AS DATE), 1)
ON CONFLICT (site_id, name, value, date) DO UPDATE SET count = count + 1
";

const INSERT_ACTIVITY: &str = "
INSERT INTO recent_activity
    (site_id, path, referrer, os, browser, device, country, city, language, timestamp)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))
";

/// Keep only the newest rows per site once the feed exceeds its cap.
const PRUNE_ACTIVITY: &str = "
DELETE FROM recent_activity
WHERE site_id = ? AND rowid NOT IN (
    SELECT rowid FROM recent_activity
    WHERE site_id = ?
    ORDER BY timestamp DESC
    LIMIT ?
)
";

/// One row of the recent-activity feed.
#[derive(Debug, Clone, Default)]
pub struct ActivityEntry {
    pub path: String,
    pub referrer: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
    pub device: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub language: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Durable counter store plus the recent-activity feed, sharing one
/// embedded DuckDB connection.
pub struct CounterStore {
    conn: Arc<Mutex<Connection>>,
}

impl CounterStore {
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Returns a reference to the shared connection for query access.
    pub const fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Apply a normalized record's metrics: one atomic upsert per key.
    ///
    /// There is no cross-row transaction. A failing upsert is logged and
    /// surfaced; rows already applied for this batch stay applied, since
    /// analytics counters degrade rather than roll back.
    pub fn apply(
        &self,
        site_id: i64,
        date: NaiveDate,
        metrics: &[Metric],
    ) -> Result<(), StoreError> {
        let date = date.format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        for metric in metrics {
            if let Err(e) = conn.execute(
                UPSERT_COUNTER,
                duckdb::params![site_id, metric.name, metric.value, date],
            ) {
                tracing::error!(error = %e, metric = metric.name, site_id, "Counter upsert failed");
                return Err(StoreError::Upsert(e));
            }
        }
        Ok(())
    }

    /// Append one recent-activity row and prune the feed to `cap` rows
    /// (0 = unbounded). Independent of the counter upserts; callers treat
    /// failure as a logged degradation.
    pub fn append_activity(
        &self,
        site_id: i64,
        entry: &ActivityEntry,
        cap: usize,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            INSERT_ACTIVITY,
            duckdb::params![
                site_id,
                entry.path,
                entry.referrer,
                entry.os,
                entry.browser,
                entry.device,
                entry.country,
                entry.city,
                entry.language,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        )
        .map_err(StoreError::Activity)?;

        if cap > 0 {
            conn.execute(
                PRUNE_ACTIVITY,
                duckdb::params![site_id, site_id, i64::try_from(cap).unwrap_or(i64::MAX)],
            )
            .map_err(StoreError::Activity)?;
        }
        Ok(())
    }

    /// Read a counter's current count; 0 when the row does not exist.
    pub fn count(
        &self,
        site_id: i64,
        name: &str,
        value: &str,
        date: NaiveDate,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(MAX(count), 0) FROM counters
                 WHERE site_id = ? AND name = ? AND value = ? AND date = CAST(? AS DATE)",
            )
            .map_err(StoreError::Read)?;
        stmt.query_row(
            duckdb::params![site_id, name, value, date.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )
        .map_err(StoreError::Read)
    }

    /// Total number of counter rows for a site, across all dates.
    pub fn counter_rows(&self, site_id: i64) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM counters WHERE site_id = ?")
            .map_err(StoreError::Read)?;
        stmt.query_row(duckdb::params![site_id], |row| row.get(0))
            .map_err(StoreError::Read)
    }

    /// Number of recent-activity rows for a site.
    pub fn activity_len(&self, site_id: i64) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM recent_activity WHERE site_id = ?")
            .map_err(StoreError::Read)?;
        stmt.query_row(duckdb::params![site_id], |row| row.get(0))
            .map_err(StoreError::Read)
    }
}

#[derive(Debug)]
pub enum StoreError {
    Upsert(duckdb::Error),
    Activity(duckdb::Error),
    Read(duckdb::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upsert(e) => write!(f, "Counter upsert error: {e}"),
            Self::Activity(e) => write!(f, "Recent activity error: {e}"),
            Self::Read(e) => write!(f, "Counter read error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
