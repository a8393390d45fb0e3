//! tickrelay core - stream relay from metric agents to a relational table
//!
//! Agents hold a TCP connection open and emit one JSON object per metric per
//! line, with nothing marking where one collection tick ends. The relay:
//!
//! - **Framer**: ends a batch when the connection has been quiet for the
//!   configured timeout
//! - **Pivot**: merges all lines of a batch sharing a timestamp into one
//!   record keyed by metric name
//! - **Storage**: writes each batch's records in a single transaction
//! - **Relay**: accepts connections and runs one worker task per connection

pub mod config;
pub mod framer;
pub mod pivot;
pub mod relay;
pub mod stats;
pub mod storage;

mod error;
mod types;

#[cfg(test)]
mod testing;

pub use error::{RelayError, Result};
pub use types::*;

/// tickrelay version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// TCP port agents connect to
    pub const LISTEN_PORT: u16 = 13000;

    /// Accept backlog
    pub const LISTEN_BACKLOG: u32 = 1024;

    /// Quiet period that ends a batch
    pub const TIMEOUT: Duration = Duration::from_millis(500);

    /// Longest accepted line (1MB)
    pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

    /// Storage connection URL
    pub const STORAGE_URL: &str = "postgres://localhost/netdata";

    /// Destination table
    pub const TABLE: &str = "netdata";
}
