//! Storage handle - one open backend connection

use super::{Backend, StorageTarget};
use crate::{ConsolidatedRecord, Metrics, RelayError, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, Postgres, Sqlite, SqliteConnection, Transaction};
use tracing::{debug, warn};

/// An open connection owned by exactly one worker
pub enum StorageHandle {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

/// Row values bound to the INSERT statement
struct InsertRow {
    time: DateTime<Utc>,
    host: String,
    metrics: Json<Metrics>,
}

impl InsertRow {
    fn from_record(record: &ConsolidatedRecord) -> Result<Self> {
        let time = DateTime::<Utc>::from_timestamp(record.timestamp, 0)
            .ok_or(RelayError::InvalidTimestamp(record.timestamp))?;
        Ok(Self {
            time,
            host: record.host.clone(),
            metrics: Json(record.storage_metrics()),
        })
    }
}

impl StorageHandle {
    /// Open a new connection to the target
    pub async fn open(target: &StorageTarget) -> Result<Self> {
        let handle = match target.backend() {
            Backend::Postgres => PgConnection::connect(target.url())
                .await
                .map(StorageHandle::Postgres),
            Backend::Sqlite => SqliteConnection::connect(target.url())
                .await
                .map(StorageHandle::Sqlite),
        }
        .map_err(|e| target.storage_error(e))?;

        debug!(destination = %target, "opened storage handle");
        Ok(handle)
    }

    /// Insert all records in one transaction.
    ///
    /// Any failure rolls the whole transaction back; nothing from the batch
    /// stays visible.
    pub async fn insert_batch(
        &mut self,
        target: &StorageTarget,
        records: &[ConsolidatedRecord],
    ) -> Result<usize> {
        let rows = records
            .iter()
            .map(InsertRow::from_record)
            .collect::<Result<Vec<_>>>()?;
        let count = rows.len();
        let sql = target.insert_sql();

        match self {
            StorageHandle::Postgres(conn) => {
                let mut tx = conn.begin().await.map_err(|e| target.storage_error(e))?;
                match insert_postgres(&mut tx, sql, rows).await {
                    Ok(()) => tx.commit().await,
                    Err(e) => {
                        rollback(tx.rollback().await);
                        Err(e)
                    }
                }
            }
            StorageHandle::Sqlite(conn) => {
                let mut tx = conn.begin().await.map_err(|e| target.storage_error(e))?;
                match insert_sqlite(&mut tx, sql, rows).await {
                    Ok(()) => tx.commit().await,
                    Err(e) => {
                        rollback(tx.rollback().await);
                        Err(e)
                    }
                }
            }
        }
        .map_err(|e| target.storage_error(e))?;

        Ok(count)
    }

    /// Round-trip a trivial statement
    pub async fn ping(&mut self, target: &StorageTarget) -> Result<()> {
        match self {
            StorageHandle::Postgres(conn) => sqlx::query("SELECT 1").execute(conn).await.map(|_| ()),
            StorageHandle::Sqlite(conn) => sqlx::query("SELECT 1").execute(conn).await.map(|_| ()),
        }
        .map_err(|e| target.storage_error(e))
    }

    /// Close the connection; failures only matter to the log
    pub async fn close(self) {
        let closed = match self {
            StorageHandle::Postgres(conn) => conn.close().await,
            StorageHandle::Sqlite(conn) => conn.close().await,
        };
        if let Err(e) = closed {
            debug!(error = %e, "storage handle did not close cleanly");
        }
    }
}

async fn insert_postgres(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    rows: Vec<InsertRow>,
) -> std::result::Result<(), sqlx::Error> {
    for row in rows {
        sqlx::query(sql)
            .bind(row.time)
            .bind(row.host)
            .bind(row.metrics)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn insert_sqlite(
    tx: &mut Transaction<'_, Sqlite>,
    sql: &str,
    rows: Vec<InsertRow>,
) -> std::result::Result<(), sqlx::Error> {
    for row in rows {
        sqlx::query(sql)
            .bind(row.time)
            .bind(row.host)
            .bind(row.metrics)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn rollback(outcome: std::result::Result<(), sqlx::Error>) {
    if let Err(e) = outcome {
        warn!(error = %e, "rollback failed, relying on connection teardown");
    }
}
