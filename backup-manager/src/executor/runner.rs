//! Execution strategies for archival workers.
//!
//! Both strategies drive the same [`ArchivalWorker`] and report only through
//! the progress channel; they differ in where the work runs.

use super::cancel::CancelHandle;
use super::message::ProgressSender;
use super::{ArchivalWorker, ArchiveJobSpec, Step, WorkerExit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Starts a worker off the caller's path and returns its join handle.
pub trait JobRunner: Send + Sync {
    fn run(&self, spec: ArchiveJobSpec, sink: ProgressSender, cancel: CancelHandle) -> JoinHandle<WorkerExit>;

    fn name(&self) -> &'static str;
}

/// Runs the worker to completion on tokio's blocking thread pool.
///
/// The worker shares nothing with the runtime except the channel and the
/// cancel gate; cancellation takes effect at the next batch boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRunner;

impl JobRunner for ThreadRunner {
    fn run(&self, spec: ArchiveJobSpec, sink: ProgressSender, cancel: CancelHandle) -> JoinHandle<WorkerExit> {
        let worker = ArchivalWorker::new(spec, sink, cancel);
        tokio::task::spawn_blocking(move || worker.run_to_completion())
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

/// Runs the worker as an async task that yields after every batch.
///
/// Suitable for single-threaded runtimes. A batch still blocks its runtime
/// thread while it runs, so batch bounds should stay small.
#[derive(Debug, Default, Clone, Copy)]
pub struct CooperativeRunner;

impl JobRunner for CooperativeRunner {
    fn run(&self, spec: ArchiveJobSpec, sink: ProgressSender, cancel: CancelHandle) -> JoinHandle<WorkerExit> {
        let mut worker = ArchivalWorker::new(spec, sink, cancel);
        tokio::spawn(async move {
            loop {
                match worker.step() {
                    Step::Continue => tokio::task::yield_now().await,
                    Step::Finished(exit) => return exit,
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "cooperative"
    }
}

/// Configured execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Thread,
    Cooperative,
}

impl ExecutionStrategy {
    pub fn runner(&self) -> Arc<dyn JobRunner> {
        match self {
            ExecutionStrategy::Thread => Arc::new(ThreadRunner),
            ExecutionStrategy::Cooperative => Arc::new(CooperativeRunner),
        }
    }
}
