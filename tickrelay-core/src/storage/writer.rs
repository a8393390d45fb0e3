//! Per-worker storage writer

use super::{HandlePolicy, StorageHandle, StorageTarget};
use crate::{ConsolidatedRecord, Result};
use std::sync::Arc;

/// Writes batches for one connection, honouring its handle policy
pub struct StorageWriter {
    target: Arc<StorageTarget>,
    policy: HandlePolicy,
    handle: Option<StorageHandle>,
}

impl StorageWriter {
    /// Create a writer; no connection is opened until the first write
    pub fn new(target: Arc<StorageTarget>, policy: HandlePolicy) -> Self {
        Self {
            target,
            policy,
            handle: None,
        }
    }

    /// Check if a persistent handle is currently held
    pub fn has_open_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Persist one batch as a single transaction.
    ///
    /// An empty batch is a no-op and never touches the backend. A per-batch
    /// handle is closed after the attempt whatever the outcome; a persistent
    /// handle is kept only while writes succeed.
    pub async fn write(&mut self, records: &[ConsolidatedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut handle = match self.handle.take() {
            Some(handle) => handle,
            None => StorageHandle::open(&self.target).await?,
        };

        let outcome = handle.insert_batch(&self.target, records).await;

        if self.policy == HandlePolicy::PerConnection && outcome.is_ok() {
            self.handle = Some(handle);
        } else {
            handle.close().await;
        }

        outcome
    }

    /// Release the persistent handle, if any
    pub async fn close(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use crate::RelayError;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use sqlx::{Connection, SqliteConnection};
    use tempfile::TempDir;

    const TABLE: &str = "netdata";

    async fn setup(dir: &TempDir) -> Arc<StorageTarget> {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display());
        let mut conn = SqliteConnection::connect(&url).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE netdata (
                time TEXT NOT NULL,
                host TEXT NOT NULL CHECK (host <> 'poison'),
                metrics TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();
        conn.close().await.unwrap();

        Arc::new(
            StorageTarget::new(&StorageConfig {
                url,
                table: TABLE.to_string(),
            })
            .unwrap(),
        )
    }

    async fn rows(target: &StorageTarget) -> Vec<(DateTime<Utc>, String, Value)> {
        let mut conn = SqliteConnection::connect(target.url()).await.unwrap();
        let rows: Vec<(DateTime<Utc>, String, String)> =
            sqlx::query_as("SELECT time, host, metrics FROM netdata ORDER BY time")
                .fetch_all(&mut conn)
                .await
                .unwrap();
        conn.close().await.unwrap();
        rows.into_iter()
            .map(|(time, host, metrics)| (time, host, serde_json::from_str(&metrics).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_write_commits_all_records() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir).await;
        let mut writer = StorageWriter::new(target.clone(), HandlePolicy::PerBatch);

        let records = vec![
            ConsolidatedRecord::new(100, "h1")
                .with_metric("cpu.user", 5)
                .with_metric("cpu.sys", 2),
            ConsolidatedRecord::new(101, "h1").with_metric("cpu.user", Value::Null),
        ];

        assert_eq!(writer.write(&records).await.unwrap(), 2);
        assert!(!writer.has_open_handle());

        let stored = rows(&target).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].0, DateTime::<Utc>::from_timestamp(100, 0).unwrap());
        assert_eq!(stored[0].1, "h1");
        assert_eq!(stored[0].2, json!({"cpu.user": 5, "cpu.sys": 2}));
        assert_eq!(stored[1].2, json!({"cpu.user": null}));
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_whole_batch() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir).await;
        let mut writer = StorageWriter::new(target.clone(), HandlePolicy::PerBatch);

        let records = vec![
            ConsolidatedRecord::new(100, "h1").with_metric("cpu.user", 5),
            ConsolidatedRecord::new(101, "h1").with_metric("cpu.user", 6),
            ConsolidatedRecord::new(102, "poison").with_metric("cpu.user", 7),
        ];

        let err = writer.write(&records).await.unwrap_err();
        assert!(err.is_storage());
        assert!(rows(&target).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir).await;
        let mut writer = StorageWriter::new(target.clone(), HandlePolicy::PerBatch);

        let records = vec![
            ConsolidatedRecord::new(100, "h1").with_metric("cpu.user", 5),
            ConsolidatedRecord::new(i64::MAX, "h1").with_metric("cpu.user", 6),
        ];

        let err = writer.write(&records).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidTimestamp(i64::MAX)));
        assert!(rows(&target).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_never_connects() {
        let target = Arc::new(
            StorageTarget::new(&StorageConfig {
                url: "sqlite:///nonexistent-dir/never/relay.db".to_string(),
                table: TABLE.to_string(),
            })
            .unwrap(),
        );
        let mut writer = StorageWriter::new(target, HandlePolicy::PerConnection);

        assert_eq!(writer.write(&[]).await.unwrap(), 0);
        assert!(!writer.has_open_handle());
    }

    #[tokio::test]
    async fn test_persistent_handle_is_reused() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir).await;
        let mut writer = StorageWriter::new(target.clone(), HandlePolicy::PerConnection);

        let first = vec![ConsolidatedRecord::new(100, "h1").with_metric("cpu.user", 5)];
        let second = vec![ConsolidatedRecord::new(101, "h1").with_metric("cpu.user", 6)];

        writer.write(&first).await.unwrap();
        assert!(writer.has_open_handle());
        writer.write(&second).await.unwrap();
        assert!(writer.has_open_handle());

        let poisoned = vec![ConsolidatedRecord::new(102, "poison").with_metric("cpu.user", 7)];
        assert!(writer.write(&poisoned).await.is_err());
        assert!(!writer.has_open_handle());

        writer.write(&[ConsolidatedRecord::new(103, "h1").with_metric("cpu.user", 8)])
            .await
            .unwrap();
        writer.close().await;

        assert_eq!(rows(&target).await.len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_is_storage_error() {
        let target = Arc::new(
            StorageTarget::new(&StorageConfig {
                url: "sqlite:///nonexistent-dir/never/relay.db".to_string(),
                table: TABLE.to_string(),
            })
            .unwrap(),
        );
        let mut writer = StorageWriter::new(target, HandlePolicy::PerBatch);

        let records = vec![ConsolidatedRecord::new(100, "h1").with_metric("cpu.user", 5)];
        let err = writer.write(&records).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_verify_reachable_storage() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir).await;
        crate::storage::verify(&target).await.unwrap();
    }
}
