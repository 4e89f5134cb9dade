//! The per-partition poll task and its supervisor channel.

use std::time::Duration;

use streamq_cache::CacheError;
use streamq_core::{PartitionKey, TopicName};
use streamq_flow::ExponentialBackoff;
use streamq_transport::{Codec, TransportError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::PollerError;
use crate::poller::PartitionPoller;

/// Fatal failures reported to the owning supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A poller hit a fatal error and stopped.
    PollerFailed {
        /// Partition whose poller stopped.
        partition: PartitionKey,
        /// Cause.
        error: PollerError,
    },
    /// A send failed with a fatal transport error.
    DispatchFailed {
        /// Destination topic.
        topic: TopicName,
        /// Cause.
        error: TransportError,
    },
}

/// How a poll task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    /// Stopped on request (or its cache was revoked).
    Stopped,
    /// Stopped on a fatal error, reported to the supervisor.
    Failed(PollerError),
    /// Did not stop within the grace period and was aborted.
    Aborted,
}

/// Drives a started poller until shutdown or a fatal error.
///
/// Shutdown is checked between polls, so an in-flight fetch always
/// completes and its records reach the cache. Transient failures back off
/// within the configured bounds; fatal ones are sent to `supervisor`.
pub async fn run_poller<C: Codec>(
    mut poller: PartitionPoller<C>,
    mut shutdown_rx: mpsc::Receiver<()>,
    supervisor: mpsc::UnboundedSender<SupervisorEvent>,
) -> PollerExit {
    let mut backoff = ExponentialBackoff::new(poller.config().backoff);
    let partition = poller.partition().clone();

    let exit = loop {
        match shutdown_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break PollerExit::Stopped,
        }

        match poller.poll().await {
            Ok(_) => backoff.reset(),
            Err(err) if err.is_transient() => {
                let delay = backoff.next_delay();
                warn!(
                    partition = %partition,
                    error = %err,
                    attempt = backoff.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transient poll failure, backing off"
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => break PollerExit::Stopped,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(PollerError::Shutdown | PollerError::Cache(CacheError::PartitionNotAssigned { .. })) => {
                break PollerExit::Stopped;
            }
            Err(err) => {
                error!(partition = %partition, error = %err, "Poller stopped on fatal error");
                let _ = supervisor.send(SupervisorEvent::PollerFailed {
                    partition: partition.clone(),
                    error: err.clone(),
                });
                break PollerExit::Failed(err);
            }
        }
    };

    poller.stop();
    exit
}

/// A running poll task.
#[derive(Debug)]
pub struct PollerHandle {
    partition: PartitionKey,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<PollerExit>,
}

impl PollerHandle {
    /// Spawns [`run_poller`] for a started poller.
    #[must_use]
    pub fn spawn<C: Codec>(
        poller: PartitionPoller<C>,
        supervisor: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let partition = poller.partition().clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_poller(poller, shutdown_rx, supervisor));
        Self {
            partition,
            shutdown_tx,
            task,
        }
    }

    /// Partition polled.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Returns true once the task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the task to stop and waits up to `grace` for it to finish its
    /// in-flight fetch. Aborts it after that.
    pub async fn stop(mut self, grace: Duration) -> PollerExit {
        let _ = self.shutdown_tx.try_send(());
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(exit)) => {
                debug!(partition = %self.partition, ?exit, "Poll task ended");
                exit
            }
            Ok(Err(err)) => {
                error!(partition = %self.partition, error = %err, "Poll task panicked");
                PollerExit::Aborted
            }
            Err(_) => {
                warn!(partition = %self.partition, "Poll task exceeded grace period, aborting");
                self.task.abort();
                PollerExit::Aborted
            }
        }
    }
}
