use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::Connection;

use crate::error::StoreError;
use crate::migrations;

/// Handle to the SQLite database. Cheap to clone; all access funnels through
/// the driver's single background connection, which serialises writers.
#[derive(Clone)]
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database at `path` and bring the schema current.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().await?
        } else {
            Connection::open(path).await?
        };
        let db = Self { conn };
        db.configure().await?;
        migrations::apply(&db).await?;
        Ok(db)
    }

    /// Purely in-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn configure(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA foreign_keys=ON;
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Run a closure against the raw connection. Transactional operations use
    /// this directly so the whole transaction executes in one hop.
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, tokio_rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.conn.call(f).await?)
    }

    /// Liveness probe used by `/health`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

/// Timestamps are stored as fixed-width RFC 3339 with microsecond precision,
/// which sorts lexicographically and matches the precision the API promises.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(ts)
}

pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_ts_opt(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn from_json_opt<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| from_json(&s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_and_ping() {
        let db = Db::open_in_memory().await.unwrap();
        db.ping().await.unwrap();
    }

    #[test]
    fn ts_is_fixed_width_and_sortable() {
        let a = ts(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc));
        let b = ts(DateTime::parse_from_rfc3339("2026-01-01T00:00:00.000001Z")
            .unwrap()
            .with_timezone(&Utc));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn ts_round_trip() {
        let now = bh_core::types::round_to_micros(Utc::now());
        let parsed = parse_ts(&ts(now)).unwrap();
        assert_eq!(parsed, now);
    }
}
