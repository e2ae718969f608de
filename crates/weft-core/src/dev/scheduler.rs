//! Debounced, single-flight rebuild scheduling.

use super::DevOrchestrator;
use crate::bundler::{BuildResult, CancelToken};
use crate::error::BuildError;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

type Outcome = Result<Option<BuildResult>, BuildError>;

/// The rebuild work a [`RebuildScheduler`] drives.
pub trait Rebuild: Send + Sync + 'static {
    /// Start a new build generation, cancelling every older one.
    fn begin(&self) -> CancelToken;

    /// Rebuild after `changed`. Must return [`BuildError::Cancelled`] once
    /// `cancel` is superseded.
    fn rebuild(
        &self,
        changed: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<Option<BuildResult>, BuildError>;
}

impl Rebuild for DevOrchestrator {
    fn begin(&self) -> CancelToken {
        DevOrchestrator::begin(self)
    }

    fn rebuild(
        &self,
        changed: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<Option<BuildResult>, BuildError> {
        DevOrchestrator::rebuild(self, changed, cancel)
    }
}

struct InFlight {
    handle: JoinHandle<Outcome>,
    changed: Vec<PathBuf>,
    cancel: CancelToken,
}

enum Step {
    Changes(Option<Vec<PathBuf>>),
    Finished(Result<Outcome, JoinError>),
}

/// Turns a stream of changed-path batches into rebuilds.
///
/// Batches arriving within the debounce window are coalesced. At most one
/// rebuild runs at a time and at most one batch waits behind it; a batch
/// arriving mid-build supersedes the running build, whose paths are folded
/// back into the waiting batch when it reports cancellation.
pub struct RebuildScheduler<R: Rebuild = DevOrchestrator> {
    orchestrator: Arc<R>,
    debounce: Duration,
}

impl<R: Rebuild> RebuildScheduler<R> {
    #[must_use]
    pub fn new(orchestrator: Arc<R>, debounce: Duration) -> Self {
        Self {
            orchestrator,
            debounce,
        }
    }

    /// Run until `changes` is closed and the last rebuild has finished.
    ///
    /// Returns the number of rebuilds that ran to completion.
    pub async fn run(self, mut changes: mpsc::Receiver<Vec<PathBuf>>) -> usize {
        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        let mut in_flight: Option<InFlight> = None;
        let mut open = true;
        let mut completed = 0;

        loop {
            if in_flight.is_none() && !pending.is_empty() {
                in_flight = Some(self.start(std::mem::take(&mut pending)));
            }
            if !open && in_flight.is_none() {
                break;
            }

            let step = tokio::select! {
                batch = changes.recv(), if open => Step::Changes(batch),
                done = join(&mut in_flight) => Step::Finished(done),
            };

            match step {
                Step::Changes(Some(paths)) => {
                    pending.extend(paths);
                    open = self.coalesce(&mut changes, &mut pending).await;
                    if let Some(job) = &in_flight {
                        debug!(generation = job.cancel.generation(), "superseding running rebuild");
                        let _ = job.cancel.supersede();
                    }
                }
                Step::Changes(None) => open = false,
                Step::Finished(done) => {
                    let Some(job) = in_flight.take() else { continue };
                    match done {
                        Ok(Ok(Some(_))) => completed += 1,
                        Ok(Ok(None)) => {}
                        Ok(Err(BuildError::Cancelled)) => pending.extend(job.changed),
                        // Already reported to clients by the orchestrator.
                        Ok(Err(_)) => completed += 1,
                        Err(e) => error!(error = %e, "rebuild task panicked"),
                    }
                }
            }
        }
        info!(rebuilds = completed, "rebuild scheduler stopped");
        completed
    }

    /// Keep absorbing batches until the channel is quiet for one window.
    /// Returns false once the channel has closed.
    async fn coalesce(
        &self,
        changes: &mut mpsc::Receiver<Vec<PathBuf>>,
        pending: &mut BTreeSet<PathBuf>,
    ) -> bool {
        loop {
            match tokio::time::timeout(self.debounce, changes.recv()).await {
                Ok(Some(paths)) => pending.extend(paths),
                Ok(None) => return false,
                Err(_) => return true,
            }
        }
    }

    fn start(&self, changed: BTreeSet<PathBuf>) -> InFlight {
        let changed: Vec<PathBuf> = changed.into_iter().collect();
        let cancel = self.orchestrator.begin();
        info!(paths = changed.len(), generation = cancel.generation(), "rebuilding");

        let orchestrator = Arc::clone(&self.orchestrator);
        let task_changed = changed.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            orchestrator.rebuild(&task_changed, &task_cancel)
        });
        InFlight {
            handle,
            changed,
            cancel,
        }
    }
}

async fn join(job: &mut Option<InFlight>) -> Result<Outcome, JoinError> {
    match job {
        Some(job) => (&mut job.handle).await,
        None => std::future::pending().await,
    }
}
