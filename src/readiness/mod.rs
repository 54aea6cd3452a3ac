//! Readiness barrier that holds the hand-off until every required address
//! answers a remote shell handshake.
//!
//! One worker task runs per distinct address. Workers own their attempt
//! counters and record success into a shared completion set; the gate
//! releases only when that set covers every address.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::probe::{ConnectivityProbe, ProbeTarget};
use crate::retry::{RetryPolicy, sleep_or_cancel};

/// Errors raised by [`ReadinessGate::wait`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReadinessError {
    /// Raised when the retry budget ran out before every address answered.
    #[error("hosts never became reachable: {}", .unreachable.join(", "))]
    ConnectivityTimeout {
        /// Addresses that never completed a handshake, in ascending order.
        unreachable: Vec<String>,
    },
    /// Raised when the wait was cancelled.
    #[error("readiness wait cancelled")]
    Cancelled,
}

/// Attempts each address needed before its first successful handshake.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadinessReport {
    attempts: BTreeMap<String, u32>,
}

impl ReadinessReport {
    /// Attempts made against `address`, counting the successful one.
    #[must_use]
    pub fn attempts(&self, address: &str) -> Option<u32> {
        self.attempts.get(address).copied()
    }

    /// Addresses that were proven reachable.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.attempts.keys().map(String::as_str)
    }

    /// Returns `true` when there was nothing to probe.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

enum WorkerOutcome {
    Ready { address: String, attempts: u32 },
    Exhausted,
    Cancelled,
}

/// Blocks until a set of hosts is reachable or a retry budget runs out.
#[derive(Debug)]
pub struct ReadinessGate<Q> {
    probe: Arc<Q>,
    policy: RetryPolicy,
}

impl<Q: ConnectivityProbe + 'static> ReadinessGate<Q> {
    /// Creates a gate probing with `probe` under `policy`.
    #[must_use]
    pub const fn new(probe: Arc<Q>, policy: RetryPolicy) -> Self {
        Self { probe, policy }
    }

    /// Waits until every target has answered at least once. Targets sharing
    /// an address are probed once.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::ConnectivityTimeout`] listing the addresses
    /// that never answered, or [`ReadinessError::Cancelled`] when `cancel`
    /// fires first.
    pub async fn wait(
        &self,
        targets: Vec<ProbeTarget>,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, ReadinessError> {
        let distinct: BTreeMap<String, ProbeTarget> = targets
            .into_iter()
            .map(|target| (target.address.clone(), target))
            .collect();
        if distinct.is_empty() {
            warn!("no addresses to probe; skipping readiness wait");
            return Ok(ReadinessReport::default());
        }

        let completed = Arc::new(Mutex::new(BTreeSet::new()));
        let mut workers = JoinSet::new();
        for target in distinct.values().cloned() {
            workers.spawn(run_worker(
                Arc::clone(&self.probe),
                target,
                self.policy,
                Arc::clone(&completed),
                cancel.clone(),
            ));
        }

        let mut report = ReadinessReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(WorkerOutcome::Ready { address, attempts }) => {
                    report.attempts.insert(address, attempts);
                }
                Ok(WorkerOutcome::Exhausted | WorkerOutcome::Cancelled) => {}
                Err(err) => warn!(error = %err, "readiness worker aborted"),
            }
        }

        let done = completed.lock().await;
        if done.len() == distinct.len() {
            info!(hosts = done.len(), "all hosts reachable");
            Ok(report)
        } else if cancel.is_cancelled() {
            Err(ReadinessError::Cancelled)
        } else {
            let unreachable = distinct
                .keys()
                .filter(|address| !done.contains(*address))
                .cloned()
                .collect();
            Err(ReadinessError::ConnectivityTimeout { unreachable })
        }
    }
}

async fn run_worker<Q: ConnectivityProbe>(
    probe: Arc<Q>,
    target: ProbeTarget,
    policy: RetryPolicy,
    completed: Arc<Mutex<BTreeSet<String>>>,
    cancel: CancellationToken,
) -> WorkerOutcome {
    let started = Instant::now();
    let mut attempts = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return WorkerOutcome::Cancelled;
        }
        attempts = attempts.saturating_add(1);
        match probe.probe(&target).await {
            Ok(()) => {
                completed.lock().await.insert(target.address.clone());
                debug!(address = %target.address, attempts, "host reachable");
                return WorkerOutcome::Ready {
                    address: target.address,
                    attempts,
                };
            }
            Err(err) => debug!(address = %target.address, attempts, error = %err, "probe failed"),
        }
        if policy.is_exhausted(attempts, started) {
            warn!(address = %target.address, attempts, "retry budget exhausted");
            return WorkerOutcome::Exhausted;
        }
        if sleep_or_cancel(policy.interval, &cancel).await {
            return WorkerOutcome::Cancelled;
        }
    }
}
