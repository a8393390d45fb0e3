//! Connection worker - owns one client connection end to end

use crate::config::RelayConfig;
use crate::framer::Framer;
use crate::pivot::pivot_report;
use crate::stats::RelayStats;
use crate::storage::{StorageTarget, StorageWriter};
use crate::Batch;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Accepted,
    Reading,
    Writing,
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Accepted => "accepted",
            WorkerState::Reading => "reading",
            WorkerState::Writing => "writing",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a worker did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub batches: u64,
    pub failed_batches: u64,
    pub records: u64,
}

/// Reads batches from one client, pivots them and persists them
pub struct Worker<S> {
    id: Uuid,
    peer: SocketAddr,
    config: Arc<RelayConfig>,
    framer: Option<Framer<S>>,
    writer: StorageWriter,
    stats: Arc<RelayStats>,
    state: WorkerState,
    summary: WorkerSummary,
}

impl<S: AsyncRead + Unpin> Worker<S> {
    /// Create a worker for an accepted connection
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: Arc<RelayConfig>,
        target: Arc<StorageTarget>,
        stats: Arc<RelayStats>,
    ) -> Self {
        let framer = Framer::new(stream, config.timeout, config.max_line_length);
        let writer = StorageWriter::new(target, config.lifecycle.handle_policy());

        Self {
            id: Uuid::new_v4(),
            peer,
            config,
            framer: Some(framer),
            writer,
            stats,
            state: WorkerState::Accepted,
            summary: WorkerSummary::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Serve the connection until the peer goes away (or, in drop mode,
    /// until one batch has been handled).
    pub async fn run(mut self) -> WorkerSummary {
        loop {
            self.transition(WorkerState::Reading);

            let Some(batch) = self.next_batch().await else {
                break;
            };

            if !self.config.lifecycle.keeps_socket() {
                // Peer reconnects for the next sample.
                self.framer = None;
                debug!("client socket closed before write");
            }

            self.transition(WorkerState::Writing);
            self.persist(batch).await;

            if self.framer.is_none() {
                break;
            }
        }

        self.transition(WorkerState::Closed);
        self.framer = None;

        let summary = self.summary;
        self.writer.close().await;
        self.stats.connection_closed();
        info!(
            batches = summary.batches,
            records = summary.records,
            "connection closed"
        );

        summary
    }

    async fn next_batch(&mut self) -> Option<Batch> {
        let framer = self.framer.as_mut()?;

        match framer.read_batch().await {
            Ok(Some(batch)) => {
                self.stats.batch_read();
                self.summary.batches += 1;
                Some(batch)
            }
            Ok(None) => {
                debug!("peer closed connection");
                None
            }
            Err(e) => {
                warn!(error = %e, "read failed, dropping connection");
                None
            }
        }
    }

    async fn persist(&mut self, batch: Batch) {
        let started = Instant::now();
        let report = pivot_report(&batch.text);

        let discarded = report.discarded() + batch.rejected;
        if discarded > 0 {
            self.stats.lines_discarded(discarded);
            debug!(
                malformed = report.malformed + batch.rejected,
                abandoned = report.abandoned,
                desync_line = ?report.desync,
                "lines discarded from batch"
            );
        }

        let outcome = self.writer.write(&report.records).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(written) => {
                self.stats.records_written(written);
                self.summary.records += written as u64;
                info!(records = written, peer = %self.peer, elapsed_ms, "batch stored");
            }
            Err(e) => {
                self.stats.batch_failed();
                self.summary.failed_batches += 1;
                error!(
                    error = %e,
                    records = report.records.len(),
                    lines = batch.lines,
                    peer = %self.peer,
                    elapsed_ms,
                    "batch dropped"
                );
            }
        }
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(from = %self.state, to = %next, "worker state");
        self.state = next;
    }
}
