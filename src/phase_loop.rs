//! Per-actor phase configuration and the iteration driver.
//!
//! Each actor compiles one config per phase up front. A phase is either a
//! no-op or an [`ActorPhase`] carrying its bound (`Repeat` and/or
//! `Duration`), its `MinDelay` and the actor-specific config. During the run
//! the actor asks [`Iterations::next`] before every iteration; the driver
//! applies the bound, paces and watches for cancellation.

use crate::pacing::sleep_remainder;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workload_core::{ActorContext, ConfigError, DurationSpec, PhaseContext};

/// When a phase is done. With both limits set, both must be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationBound {
    pub repeat: Option<u64>,
    pub duration: Option<Duration>,
}

impl IterationBound {
    pub fn from_phase(phase: &PhaseContext<'_>) -> Result<Self, ConfigError> {
        let repeat: Option<u64> = phase.get_optional("Repeat")?;
        let duration: Option<DurationSpec> = phase.get_optional("Duration")?;
        Ok(Self {
            repeat,
            duration: duration.map(Duration::from),
        })
    }

    pub fn is_bounded(&self) -> bool {
        self.repeat.is_some() || self.duration.is_some()
    }

    /// Whether a phase that completed `completed` iterations over `elapsed`
    /// is finished. Never true for an unbounded phase.
    pub fn is_satisfied(&self, completed: u64, elapsed: Duration) -> bool {
        self.is_bounded()
            && self.repeat.map_or(true, |n| completed >= n)
            && self.duration.map_or(true, |d| elapsed >= d)
    }
}

/// One active phase of an actor.
#[derive(Debug)]
pub struct ActorPhase<C> {
    index: usize,
    bound: IterationBound,
    min_delay: Duration,
    config: C,
}

impl<C> ActorPhase<C> {
    pub fn new(index: usize, bound: IterationBound, min_delay: Duration, config: C) -> Self {
        Self {
            index,
            bound,
            min_delay,
            config,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bound(&self) -> IterationBound {
        self.bound
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// Start driving this phase. `stop` ends the phase at the next
    /// iteration boundary.
    pub fn iterations(&self, stop: CancellationToken) -> Iterations {
        Iterations::new(self.bound, self.min_delay, stop)
    }
}

/// An actor's phases in workload order. `None` marks a no-op phase.
#[derive(Debug)]
pub struct PhaseLoop<C> {
    phases: Vec<Option<ActorPhase<C>>>,
}

impl<C> PhaseLoop<C> {
    /// Compile every phase of an actor; `build` produces the actor-specific
    /// config for each non-Nop phase.
    pub fn build<F>(actor: ActorContext<'_>, mut build: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&PhaseContext<'_>) -> Result<C, ConfigError>,
    {
        let mut phases = Vec::new();
        for phase in actor.phases() {
            if phase.is_nop()? {
                phases.push(None);
                continue;
            }
            let bound = IterationBound::from_phase(&phase)?;
            let min_delay = phase
                .get_optional::<DurationSpec>("MinDelay")?
                .map(Duration::from)
                .unwrap_or_default();
            let config = build(&phase)?;
            phases.push(Some(ActorPhase::new(phase.index(), bound, min_delay, config)));
        }
        Ok(Self { phases })
    }

    /// The active phase at `index`; `None` for no-op or missing phases.
    pub fn phase(&self, index: usize) -> Option<&ActorPhase<C>> {
        self.phases.get(index).and_then(Option::as_ref)
    }

    /// Whether the phase at `index` holds the workload in that phase until
    /// it finishes on its own.
    pub fn is_blocking(&self, index: usize) -> bool {
        self.phase(index).is_some_and(|p| p.bound.is_bounded())
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn active_phases(&self) -> impl Iterator<Item = &ActorPhase<C>> {
        self.phases.iter().flatten()
    }
}

/// Iteration driver for one phase of one actor instance.
#[derive(Debug)]
pub struct Iterations {
    bound: IterationBound,
    min_delay: Duration,
    stop: CancellationToken,
    phase_start: Instant,
    completed: u64,
    current: Option<Instant>,
}

impl Iterations {
    pub fn new(bound: IterationBound, min_delay: Duration, stop: CancellationToken) -> Self {
        Self {
            bound,
            min_delay,
            stop,
            phase_start: Instant::now(),
            completed: 0,
            current: None,
        }
    }

    /// Finish the previous iteration, if any, and decide whether another
    /// one runs. Sleeps out `MinDelay` between iterations; cancellation cuts
    /// the sleep short and ends the phase.
    pub async fn next(&mut self) -> bool {
        if let Some(started) = self.current.take() {
            self.completed += 1;
            if self.is_done() {
                return false;
            }
            if self.min_delay.is_zero() {
                // Unpaced loops must still let other instances on this worker run
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = sleep_remainder(started, self.min_delay) => {}
                    _ = self.stop.cancelled() => return false,
                }
            }
        }

        if self.stop.is_cancelled() || self.is_done() {
            return false;
        }
        self.current = Some(Instant::now());
        true
    }

    fn is_done(&self) -> bool {
        self.bound.is_satisfied(self.completed, self.phase_start.elapsed())
    }

    /// Iterations finished so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}
