//! Connection acceptor - owns the listening socket

use super::worker::{Worker, WorkerSummary};
use crate::config::RelayConfig;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::storage::StorageTarget;
use crate::{RelayError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts client connections and supervises one worker task per connection
pub struct Acceptor {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    target: Arc<StorageTarget>,
    stats: Arc<RelayStats>,
}

impl Acceptor {
    /// Validate the storage target and bind the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: RelayConfig) -> Result<Self> {
        let target = StorageTarget::new(&config.storage)?;
        let listener = listen(config.listen_addr, config.listen_backlog)?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            target: Arc::new(target),
            stats: Arc::new(RelayStats::new()),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn target(&self) -> &Arc<StorageTarget> {
        &self.target
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Accept connections forever
    pub async fn run(self) -> StatsSnapshot {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then abort and reap the
    /// remaining workers. Aborted workers are counted as closed.
    pub async fn run_until<F>(self, shutdown: F) -> StatsSnapshot
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut workers: JoinSet<WorkerSummary> = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, destination = %self.target, "accepting connections");
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(active = workers.len(), "shutdown requested, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(&mut workers, stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => reap(joined),
            }
        }

        workers.abort_all();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Err(e) if e.is_cancelled() => self.stats.connection_closed(),
                other => reap(other),
            }
        }
        self.stats.snapshot()
    }

    fn dispatch(&self, workers: &mut JoinSet<WorkerSummary>, stream: TcpStream, peer: SocketAddr) {
        self.stats.connection_accepted();

        let worker = Worker::new(
            stream,
            peer,
            self.config.clone(),
            self.target.clone(),
            self.stats.clone(),
        );
        let span = info_span!("connection", id = %worker.id(), %peer);
        span.in_scope(|| info!("connection accepted"));

        workers.spawn(worker.run().instrument(span));
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let bind_error = |source| RelayError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(backlog).map_err(bind_error)
}

fn reap(joined: std::result::Result<WorkerSummary, JoinError>) {
    match joined {
        Ok(summary) => debug!(
            batches = summary.batches,
            records = summary.records,
            failed = summary.failed_batches,
            "worker finished"
        ),
        Err(e) if e.is_panic() => error!(error = %e, "worker panicked"),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn config(addr: SocketAddr) -> RelayConfig {
        RelayConfig {
            listen_addr: addr,
            storage: StorageConfig {
                url: "sqlite::memory:".to_string(),
                table: "netdata".to_string(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let acceptor = Acceptor::bind(config("127.0.0.1:0".parse().unwrap())).unwrap();
        assert_ne!(acceptor.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_port_in_use_is_bind_error() {
        let first = Acceptor::bind(config("127.0.0.1:0".parse().unwrap())).unwrap();
        let taken = first.local_addr().unwrap();

        let err = Acceptor::bind(config(taken)).err().unwrap();
        assert!(matches!(err, RelayError::Bind { addr, .. } if addr == taken));
        assert!(err.is_startup_fatal());
    }

    #[tokio::test]
    async fn test_invalid_table_fails_before_binding() {
        let mut bad = config("127.0.0.1:0".parse().unwrap());
        bad.storage.table = "netdata; DROP TABLE users".to_string();
        assert!(matches!(Acceptor::bind(bad), Err(RelayError::InvalidTableName(_))));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let acceptor = Acceptor::bind(config("127.0.0.1:0".parse().unwrap())).unwrap();
        let snapshot = acceptor.run_until(async {}).await;
        assert_eq!(snapshot, StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_aborted_workers_count_as_closed() {
        let acceptor = Acceptor::bind(config("127.0.0.1:0".parse().unwrap())).unwrap();
        let addr = acceptor.local_addr().unwrap();
        let stats = acceptor.stats();

        let client = TcpStream::connect(addr).await.unwrap();
        let shutdown = async move {
            while stats.snapshot().connections_accepted == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        let snapshot = acceptor.run_until(shutdown).await;
        assert_eq!(snapshot.connections_accepted, 1);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.active_connections(), 0);
        drop(client);
    }
}
