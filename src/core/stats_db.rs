use crate::core::date_key::{self, Clock, SystemClock};
use crate::error::Result;
use crate::models::{KeyCode, KeyCountRecord, TimeRange};
use chrono::{DateTime, Local, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA_VERSION: &str = "1";

/// Per-key, per-day press counters backed by a single SQLite table.
///
/// Cloning is cheap and every clone shares the same connection; all access is
/// serialized through one lock, so concurrent increments for the same
/// `(key_code, day)` never race.
#[derive(Clone)]
pub struct StatsStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

fn open_write_conn(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(2));
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS key_counts (
  key_code INTEGER NOT NULL,
  day TEXT NOT NULL,
  count INTEGER NOT NULL CHECK(count >= 0),
  last_updated_ms INTEGER NOT NULL,
  PRIMARY KEY(key_code, day)
);
CREATE INDEX IF NOT EXISTS idx_key_counts_day ON key_counts(day);
"#,
    )?;

    conn.execute(
        "INSERT INTO schema_meta(key, value) VALUES('schema_version', ?1) ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

fn from_ms(ms: i64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::default().with_timezone(&Local))
}

fn map_counts(
    rows: impl Iterator<Item = rusqlite::Result<(i64, i64)>>,
) -> Result<HashMap<KeyCode, u64>> {
    let mut out = HashMap::new();
    for row in rows {
        let (key_code, count) = row?;
        let Ok(key_code) = KeyCode::try_from(key_code) else {
            continue;
        };
        let count = u64::try_from(count).unwrap_or(0);
        if count == 0 {
            continue;
        }
        out.insert(key_code, count);
    }
    Ok(out)
}

impl StatsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = open_write_conn(&path)?;
        migrate(&conn)?;
        tracing::debug!(path = %path.display(), "stats store opened");

        Ok(Self::from_conn(conn, clock, Some(path)))
    }

    /// Opens the store at `path`, or an empty in-memory store when the file cannot be
    /// opened (unreadable, not a database). Presses are then counted for this session only.
    pub fn open_or_in_memory(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => Ok(store),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "stats database unavailable, counting in memory for this session"
                );
                Self::open_in_memory()
            }
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self::from_conn(conn, clock, None))
    }

    fn from_conn(conn: Connection, clock: Arc<dyn Clock>, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                clock,
                path,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Adds one press of `key_code` to today's row, creating the row on first use.
    pub fn try_increment(&self, key_code: KeyCode) -> Result<()> {
        let now = self.inner.clock.now();
        let day = date_key::day_key(now.date_naive());

        let conn = self.inner.conn.lock();
        conn.execute(
            r#"
INSERT INTO key_counts(key_code, day, count, last_updated_ms)
VALUES (?1, ?2, 1, ?3)
ON CONFLICT(key_code, day) DO UPDATE SET
  count=count + 1,
  last_updated_ms=excluded.last_updated_ms
"#,
            params![i64::from(key_code), day, now.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn try_query(&self, range: TimeRange) -> Result<HashMap<KeyCode, u64>> {
        let conn = self.inner.conn.lock();
        fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64)> {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        }

        match range {
            TimeRange::Today => {
                let today = date_key::day_key(self.inner.clock.today());
                let mut stmt = conn.prepare(
                    "SELECT key_code, SUM(count) FROM key_counts WHERE day=?1 GROUP BY key_code",
                )?;
                let rows = stmt.query_map(params![today], map_row)?;
                map_counts(rows)
            }
            TimeRange::AllTime => {
                let mut stmt =
                    conn.prepare("SELECT key_code, SUM(count) FROM key_counts GROUP BY key_code")?;
                let rows = stmt.query_map([], map_row)?;
                map_counts(rows)
            }
        }
    }

    pub fn try_reset(&self) -> Result<()> {
        let conn = self.inner.conn.lock();
        conn.execute("DELETE FROM key_counts", [])?;
        if let Err(e) = conn.execute("VACUUM", []) {
            tracing::warn!(error = %e, "stats store vacuum failed");
        }
        Ok(())
    }

    /// Deletes rows whose day is strictly before `today - retain_days` and returns how
    /// many were removed.
    pub fn try_cleanup(&self, retain_days: u32) -> Result<usize> {
        let cutoff = date_key::retention_cutoff(self.inner.clock.today(), retain_days);
        let conn = self.inner.conn.lock();
        let removed = conn.execute(
            "DELETE FROM key_counts WHERE day < ?1",
            params![date_key::day_key(cutoff)],
        )?;
        Ok(removed)
    }

    pub fn records(&self) -> Result<Vec<KeyCountRecord>> {
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key_code, day, count, last_updated_ms FROM key_counts ORDER BY day, key_code",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key_code, day, count, last_updated_ms) = row?;
            let (Ok(key_code), Some(day)) = (KeyCode::try_from(key_code), date_key::parse_day_key(&day))
            else {
                tracing::warn!(key_code, day = %day, "skipping malformed key_counts row");
                continue;
            };
            out.push(KeyCountRecord {
                key_code,
                day,
                count: u64::try_from(count).unwrap_or(0),
                last_updated: from_ms(last_updated_ms),
            });
        }
        Ok(out)
    }

    /// Like [`StatsStore::try_increment`], but a storage failure is logged and the
    /// press is dropped.
    pub fn increment(&self, key_code: KeyCode) {
        if let Err(e) = self.try_increment(key_code) {
            tracing::error!(key_code, error = %e, "failed to record key press");
        }
    }

    /// Aggregated counts for `range`; empty on storage failure.
    pub fn query(&self, range: TimeRange) -> HashMap<KeyCode, u64> {
        self.try_query(range).unwrap_or_else(|e| {
            tracing::error!(?range, error = %e, "failed to query key counts");
            HashMap::new()
        })
    }

    pub fn reset(&self) {
        match self.try_reset() {
            Ok(()) => tracing::info!("key counts reset"),
            Err(e) => tracing::error!(error = %e, "failed to reset key counts"),
        }
    }

    pub fn cleanup(&self, retain_days: u32) {
        match self.try_cleanup(retain_days) {
            Ok(removed) => tracing::info!(retain_days, removed, "retention cleanup finished"),
            Err(e) => tracing::error!(retain_days, error = %e, "retention cleanup failed"),
        }
    }
}
