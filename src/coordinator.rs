//! Phase alignment across actor instances.
//!
//! Every instance waits at a barrier before each phase, so phase N+1 starts
//! for nobody until every instance has left phase N. Inside a phase, bounded
//! instances run to completion; unbounded ones run until the last bounded
//! instance of that phase finishes, or until shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug)]
struct PhaseGate {
    /// Bounded instances still running this phase
    remaining: AtomicUsize,
    /// Cancelled when the phase is over for unbounded instances
    done: CancellationToken,
}

#[derive(Debug)]
pub struct PhaseCoordinator {
    barrier: Barrier,
    gates: Vec<PhaseGate>,
    shutdown: CancellationToken,
}

impl PhaseCoordinator {
    /// `blocking[p]` is the number of bounded instances in phase `p`.
    pub fn new(participants: usize, blocking: &[usize], shutdown: CancellationToken) -> Self {
        let gates = blocking
            .iter()
            .map(|&count| PhaseGate {
                remaining: AtomicUsize::new(count),
                done: shutdown.child_token(),
            })
            .collect();
        Self {
            barrier: Barrier::new(participants),
            gates,
            shutdown,
        }
    }

    pub fn phase_count(&self) -> usize {
        self.gates.len()
    }

    /// Wait for every instance to reach `phase`. Returns false once the
    /// workload is shutting down.
    pub async fn enter_phase(&self, phase: usize) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        tokio::select! {
            result = self.barrier.wait() => {
                if result.is_leader() {
                    info!("Starting phase {}", phase);
                }
                !self.shutdown.is_cancelled()
            }
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// Token that ends this instance's iterations in `phase`.
    pub fn stop_token(&self, phase: usize, blocking: bool) -> CancellationToken {
        match self.gates.get(phase) {
            Some(gate) if !blocking => gate.done.clone(),
            _ => self.shutdown.clone(),
        }
    }

    /// Record that an instance left `phase`.
    pub fn finish_phase(&self, phase: usize, blocking: bool) {
        if !blocking {
            return;
        }
        if let Some(gate) = self.gates.get(phase) {
            if gate.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                info!("All bounded actors finished phase {}", phase);
                gate.done.cancel();
            }
        }
    }

    /// Stop the whole workload at the next iteration boundary.
    pub fn abort(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
