//! Relay configuration
//!
//! Resolved once at startup and shared read-only by every worker.

use crate::storage::{HandlePolicy, StorageConfig};
use crate::{RelayError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Connection lifecycle between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Keep the client socket, open a storage handle per batch
    #[default]
    PerBatch,
    /// Keep the client socket and one storage handle for the whole connection
    Persistent,
    /// Close the client socket right after each batch is read
    DropConn,
}

impl Lifecycle {
    /// Resolve the `dropconn` / `persistent` flags, which exclude each other
    pub fn from_flags(dropconn: bool, persistent: bool) -> Result<Self> {
        match (dropconn, persistent) {
            (true, true) => Err(RelayError::Config(
                "dropconn and persistent cannot be used together".to_string(),
            )),
            (true, false) => Ok(Lifecycle::DropConn),
            (false, true) => Ok(Lifecycle::Persistent),
            (false, false) => Ok(Lifecycle::PerBatch),
        }
    }

    /// Storage handle policy implied by this lifecycle
    pub fn handle_policy(&self) -> HandlePolicy {
        match self {
            Lifecycle::Persistent => HandlePolicy::PerConnection,
            Lifecycle::PerBatch | Lifecycle::DropConn => HandlePolicy::PerBatch,
        }
    }

    /// Check if the client socket survives a batch
    pub fn keeps_socket(&self) -> bool {
        !matches!(self, Lifecycle::DropConn)
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP listen address
    pub listen_addr: SocketAddr,
    /// Destination storage
    pub storage: StorageConfig,
    /// Quiet period that ends a batch
    pub timeout: Duration,
    /// Socket and storage handle lifecycle
    pub lifecycle: Lifecycle,
    /// Longest accepted line in bytes
    pub max_line_length: usize,
    /// Accept backlog
    pub listen_backlog: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], crate::defaults::LISTEN_PORT)),
            storage: StorageConfig::default(),
            timeout: crate::defaults::TIMEOUT,
            lifecycle: Lifecycle::default(),
            max_line_length: crate::defaults::MAX_LINE_LENGTH,
            listen_backlog: crate::defaults::LISTEN_BACKLOG,
        }
    }
}
