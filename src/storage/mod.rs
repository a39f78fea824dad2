//! SQLite persistence for averaged UPS samples.
//!
//! One table, `ups`, one row per report interval. Rows are upserted on
//! their epoch and never deleted; the trend reporter reads them back as
//! an ascending range.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::sample::Sample;

/// DDL for the samples table. `sample_epoch` is the primary key so a
/// re-reported interval replaces its row instead of duplicating it.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS ups (
    sample_time  TEXT NOT NULL,
    sample_epoch INTEGER NOT NULL PRIMARY KEY,
    volt_in      REAL NOT NULL,
    volt_bat     REAL NOT NULL,
    charge_bat   REAL NOT NULL,
    load_ups     REAL NOT NULL,
    runtime_bat  REAL NOT NULL
);
";

/// How often a busy insert is retried before the error propagates.
const INSERT_RETRIES: u32 = 10;
/// Pause between busy-insert retries.
const RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Error type for store operations.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

/// SQLite-backed sample store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(9))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        info!("Attached to SQLite {}", version);
        Ok(Self { conn })
    }

    /// Inserts or replaces one averaged sample row.
    ///
    /// Busy/locked errors are retried a bounded number of times on top
    /// of the connection busy timeout, then propagated.
    pub fn insert(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut attempts_left = INSERT_RETRIES;
        loop {
            match self.try_insert(sample) {
                Ok(()) => return Ok(()),
                Err(e) if attempts_left > 0 && is_busy(&e) => {
                    attempts_left -= 1;
                    debug!("Insert busy ({}), {} attempts left", e, attempts_left);
                    std::thread::sleep(RETRY_PAUSE);
                }
                Err(e) => return Err(StoreError::Sqlite(e)),
            }
        }
    }

    fn try_insert(&self, sample: &Sample) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO ups \
             (sample_time, sample_epoch, volt_in, volt_bat, charge_bat, load_ups, runtime_bat) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                sample.time_string(),
                sample.epoch,
                sample.volt_in,
                sample.volt_bat,
                sample.charge_bat,
                sample.load_ups,
                sample.runtime_bat,
            ],
        )?;
        Ok(())
    }

    /// All rows at or after `since_epoch`, oldest first.
    pub fn query_since(&self, since_epoch: i64) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT sample_epoch, volt_in, volt_bat, charge_bat, load_ups, runtime_bat \
             FROM ups WHERE sample_epoch >= ?1 ORDER BY sample_epoch",
        )?;
        let rows = stmt.query_map([since_epoch], |row| {
            Ok(Sample {
                epoch: row.get(0)?,
                volt_in: row.get(1)?,
                volt_bat: row.get(2)?,
                charge_bat: row.get(3)?,
                load_ups: row.get(4)?,
                runtime_bat: row.get(5)?,
            })
        })?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row?);
        }
        Ok(samples)
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ups", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(epoch: i64, volt_in: f64) -> Sample {
        Sample {
            epoch,
            volt_in,
            volt_bat: -1.0,
            charge_bat: 100.0,
            load_ups: 2.0,
            runtime_bat: 1875.0,
        }
    }

    #[test]
    fn insert_and_query_round_trip() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.insert(&sample(100, 230.0)).expect("insert");
        store.insert(&sample(280, 231.0)).expect("insert");

        let rows = store.query_since(0).expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].epoch, 100);
        assert_eq!(rows[0].volt_in, 230.0);
        assert_eq!(rows[1].charge_bat, 100.0);
        assert_eq!(rows[1].runtime_bat, 1875.0);
    }

    #[test]
    fn query_since_filters_and_orders() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.insert(&sample(300, 232.0)).expect("insert");
        store.insert(&sample(100, 230.0)).expect("insert");
        store.insert(&sample(200, 231.0)).expect("insert");

        let rows = store.query_since(150).expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].epoch, 200);
        assert_eq!(rows[1].epoch, 300);
    }

    #[test]
    fn insert_upserts_on_epoch() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.insert(&sample(100, 230.0)).expect("insert");
        store.insert(&sample(100, 240.0)).expect("insert");

        assert_eq!(store.count().expect("count"), 1);
        let rows = store.query_since(0).expect("query");
        assert_eq!(rows[0].volt_in, 240.0);
    }

    #[test]
    fn open_creates_file_backed_store() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("upsdata.sqlite3");

        {
            let store = SqliteStore::open(&path).expect("open");
            store.insert(&sample(100, 230.0)).expect("insert");
        }

        // reopen and read back
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.count().expect("count"), 1);
        let rows = store.query_since(0).expect("query");
        assert_eq!(rows[0].volt_in, 230.0);
    }
}
