//! Dedicated task draining the replication stream into the coordinator.

use crate::coordinator::{ApplyOutcome, StateCoordinator};
use crate::replication::{ReplicationMessage, ReplicationStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Totals for one consumer lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub applied: u64,
    pub stale: u64,
    pub out_of_order: u64,
    pub ignored: u64,
    /// Messages still queued when the shutdown timeout elapsed.
    pub abandoned: usize,
}

impl ConsumerReport {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Stale => self.stale += 1,
            ApplyOutcome::OutOfOrder => self.out_of_order += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
        }
    }
}

pub struct ReplicationConsumer {
    shutdown_tx: Option<oneshot::Sender<Duration>>,
    handle: JoinHandle<ConsumerReport>,
}

impl ReplicationConsumer {
    /// Spawns the consumer on the current tokio runtime.
    pub fn spawn(coordinator: Arc<StateCoordinator>, stream: ReplicationStream) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(coordinator, stream, shutdown_rx));
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Stops accepting frames, applies what is already queued for at most
    /// `timeout`, and returns the lifetime totals.
    pub async fn shutdown(mut self, timeout: Duration) -> ConsumerReport {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have ended with its stream.
            let _ = tx.send(timeout);
        }
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!("❌ Replication consumer task failed: {}", e);
                ConsumerReport::default()
            }
        }
    }
}

async fn run(
    coordinator: Arc<StateCoordinator>,
    mut stream: ReplicationStream,
    mut shutdown_rx: oneshot::Receiver<Duration>,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();
    info!("📡 Replication consumer started");

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(message) => apply(&coordinator, message, &mut report).await,
                None => {
                    debug!("Replication stream ended");
                    return report;
                }
            },
            requested = &mut shutdown_rx => {
                let timeout = requested.unwrap_or(Duration::ZERO);
                stream.close();
                drain(&coordinator, &mut stream, &mut report, timeout).await;
                info!(
                    "🛑 Replication consumer stopped ({} applied, {} stale, {} out of order)",
                    report.applied, report.stale, report.out_of_order
                );
                return report;
            }
        }
    }
}

async fn drain(
    coordinator: &Arc<StateCoordinator>,
    stream: &mut ReplicationStream,
    report: &mut ConsumerReport,
    timeout: Duration,
) {
    let remaining = async {
        while let Some(message) = stream.next().await {
            apply(coordinator, message, report).await;
        }
    };
    if tokio::time::timeout(timeout, remaining).await.is_err() {
        report.abandoned = stream.pending();
        warn!(
            "⚠️ Shutdown timeout after {:?}: abandoning {} queued replication message(s)",
            timeout, report.abandoned
        );
    }
}

async fn apply(coordinator: &Arc<StateCoordinator>, message: ReplicationMessage, report: &mut ConsumerReport) {
    let coordinator = coordinator.clone();
    // The coordinator blocks on store I/O and identity locks.
    match tokio::task::spawn_blocking(move || coordinator.handle_replication_message(message)).await {
        Ok(outcome) => report.record(outcome),
        Err(e) => error!("Replication apply task failed: {}", e),
    }
}
