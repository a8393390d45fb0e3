//! Storage writer - transactional batch persistence
//!
//! Each consolidated record becomes one `(time, host, metrics)` row in the
//! destination table. A batch is written in a single transaction, so it is
//! committed entirely or not at all.

mod handle;
mod writer;

pub use handle::StorageHandle;
pub use writer::StorageWriter;

use crate::{RelayError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Connection URL (`postgres://...` or `sqlite:...`)
    pub url: String,
    /// Destination table, optionally schema-qualified
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: crate::defaults::STORAGE_URL.to_string(),
            table: crate::defaults::TABLE.to_string(),
        }
    }
}

/// Relational backend selected by the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Pick the backend for a connection URL
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(RelayError::UnsupportedStorage(redact_url(url)))
        }
    }
}

/// When a worker's storage handle is opened and closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlePolicy {
    /// Open before each write, close after it
    PerBatch,
    /// Open on first write, reuse until the connection ends
    PerConnection,
}

/// Resolved, validated write destination shared by all workers
#[derive(Debug, Clone)]
pub struct StorageTarget {
    backend: Backend,
    url: String,
    insert_sql: String,
    destination: String,
}

impl StorageTarget {
    /// Validate a storage configuration
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let backend = Backend::from_url(&config.url)?;

        if !table_name_pattern().is_match(&config.table) {
            return Err(RelayError::InvalidTableName(config.table.clone()));
        }

        let insert_sql = match backend {
            Backend::Postgres => format!(
                "INSERT INTO {} (time, host, metrics) VALUES ($1, $2, $3)",
                config.table
            ),
            Backend::Sqlite => format!(
                "INSERT INTO {} (time, host, metrics) VALUES (?, ?, ?)",
                config.table
            ),
        };

        Ok(Self {
            backend,
            url: config.url.clone(),
            destination: format!("{} on {}", config.table, redact_url(&config.url)),
            insert_sql,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// Table and URL with credentials removed, for logs and errors
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub(crate) fn storage_error(&self, source: sqlx::Error) -> RelayError {
        RelayError::Storage {
            destination: self.destination.clone(),
            source,
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination)
    }
}

/// Check that the storage is reachable (startup check)
pub async fn verify(target: &StorageTarget) -> Result<()> {
    let mut handle = StorageHandle::open(target).await?;
    let outcome = handle.ping(target).await;
    handle.close().await;
    outcome
}

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("table name pattern is valid")
    })
}

/// Strip the password from a connection URL
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    match authority.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}://{}@{}{}", scheme, user, host, tail)
        }
        None => url.to_string(),
    }
}
