//! Orchestrator states and the trace of states a run passed through.

use std::fmt;

use tracing::debug;

/// States of a provisioning run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProvisionPhase {
    /// Looking up the stack before deciding what to submit.
    Idle,
    /// Submitting a create or update.
    Submitting,
    /// Waiting for the stack to leave its in-progress state.
    Polling,
    /// The stack completed and its outputs are available.
    OutputsReady,
    /// Routing and credentials have been persisted.
    RoutingBuilt,
    /// Waiting for the hosts to answer handshakes.
    ReadinessWait,
    /// Every host is reachable.
    Done,
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::OutputsReady => "outputs-ready",
            Self::RoutingBuilt => "routing-built",
            Self::ReadinessWait => "readiness-wait",
            Self::Done => "done",
        })
    }
}

/// Ordered record of the phases a run entered, starting at
/// [`ProvisionPhase::Idle`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseTrace {
    phases: Vec<ProvisionPhase>,
}

impl Default for PhaseTrace {
    fn default() -> Self {
        Self {
            phases: vec![ProvisionPhase::Idle],
        }
    }
}

impl PhaseTrace {
    /// Records a transition into `next`.
    pub fn enter(&mut self, next: ProvisionPhase) {
        debug!(from = %self.current(), to = %next, "provision phase transition");
        self.phases.push(next);
    }

    /// Most recent phase.
    #[must_use]
    pub fn current(&self) -> ProvisionPhase {
        self.phases.last().copied().unwrap_or(ProvisionPhase::Idle)
    }

    /// Every phase entered so far, in order.
    #[must_use]
    pub fn phases(&self) -> &[ProvisionPhase] {
        &self.phases
    }
}
