//! Connection handling
//!
//! The [`Acceptor`] owns the listening socket and spawns one [`Worker`] task
//! per accepted connection. Workers share only the read-only configuration,
//! the storage target and the statistics counters; each owns its socket and
//! storage handle outright.

mod acceptor;
mod worker;

pub use acceptor::Acceptor;
pub use worker::{Worker, WorkerState, WorkerSummary};
