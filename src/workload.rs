//! Workload orchestration: builds every actor up front, connects one client
//! per instance and drives all instances through the phases together.

use crate::actors::{build_blueprint, Actor, ActorBlueprint, ActorResources};
use crate::coordinator::PhaseCoordinator;
use crate::error::ActorError;
use crate::metrics::{ActorIdentity, MetricsRegistry};
use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use workload_core::{BackendClientFactory, ConfigError, WorkloadConfig};

/// Golden-ratio increment used to spread instance seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// A compiled workload, ready to run.
pub struct Workload {
    config: WorkloadConfig,
    blueprints: Vec<Arc<dyn ActorBlueprint>>,
    phase_count: usize,
}

/// An actor instance that stopped with an error.
#[derive(Debug)]
pub struct ActorFailure {
    pub actor: ActorIdentity,
    pub error: ActorError,
}

/// What happened during [`Workload::run`].
#[derive(Debug)]
pub struct RunSummary {
    pub instances: usize,
    pub phases: usize,
    pub failures: Vec<ActorFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Workload {
    /// Compile every actor. All configuration errors surface here, before
    /// anything connects.
    pub fn from_config(config: WorkloadConfig) -> Result<Self, ConfigError> {
        let blueprints = config
            .actors
            .iter()
            .map(|actor| build_blueprint(config.actor_context(actor)))
            .collect::<Result<Vec<_>, _>>()?;
        let phase_count = config.phase_count();
        Ok(Self {
            config,
            blueprints,
            phase_count,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_config(WorkloadConfig::from_yaml(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_config(WorkloadConfig::from_file(path)?)
    }

    pub fn seed(&self) -> u64 {
        self.config.seed()
    }

    /// Override the workload's `Seed`.
    pub fn set_seed(&mut self, seed: u64) {
        self.config.seed = Some(seed);
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn blueprints(&self) -> &[Arc<dyn ActorBlueprint>] {
        &self.blueprints
    }

    pub fn phase_count(&self) -> usize {
        self.phase_count
    }

    /// Total actor instances across all actors.
    pub fn instance_count(&self) -> usize {
        self.blueprints.iter().map(|b| b.threads()).sum()
    }

    /// Number of bounded instances in each phase.
    pub fn blocking_per_phase(&self) -> Vec<usize> {
        (0..self.phase_count)
            .map(|phase| {
                self.blueprints
                    .iter()
                    .filter(|b| b.is_blocking(phase))
                    .map(|b| b.threads())
                    .sum()
            })
            .collect()
    }

    fn instance_seed(&self, index: usize) -> u64 {
        self.seed() ^ (index as u64 + 1).wrapping_mul(SEED_STRIDE)
    }

    /// Run every phase to completion, or until `shutdown` fires or an actor
    /// instance fails.
    pub async fn run(
        &self,
        factory: &dyn BackendClientFactory,
        metrics: &MetricsRegistry,
        shutdown: CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let started = Instant::now();
        let instances = self.instance_count();
        info!(
            "Starting workload: {} actor(s), {} instance(s), {} phase(s), seed {}",
            self.blueprints.len(),
            instances,
            self.phase_count,
            self.seed()
        );

        // Connect everything before the first phase starts
        let mut actors = Vec::with_capacity(instances);
        for blueprint in &self.blueprints {
            for instance in 0..blueprint.threads() {
                let identity = ActorIdentity::new(blueprint.name(), instance);
                let client = factory
                    .connect(&identity.to_string())
                    .await
                    .map_err(|source| ActorError::Connect {
                        actor: identity.clone(),
                        source,
                    })
                    .with_context(|| format!("Failed to set up {identity}"))?;
                let rng = StdRng::seed_from_u64(self.instance_seed(actors.len()));
                debug!("Connected {}", identity);
                let actor = blueprint.clone().instantiate(ActorResources {
                    identity,
                    client,
                    rng,
                    metrics: metrics.clone(),
                });
                actors.push((blueprint.clone(), actor));
            }
        }

        let coordinator = Arc::new(PhaseCoordinator::new(
            instances,
            &self.blocking_per_phase(),
            shutdown.child_token(),
        ));

        let mut tasks = JoinSet::new();
        for (blueprint, actor) in actors {
            tasks.spawn(run_instance(actor, blueprint, coordinator.clone()));
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (actor, result) = joined.context("Actor task panicked")?;
            if let Err(error) = result {
                failures.push(ActorFailure { actor, error });
            }
        }

        let summary = RunSummary {
            instances,
            phases: self.phase_count,
            failures,
            elapsed: started.elapsed(),
        };
        info!(
            "Workload finished in {:.2}s with {} failed instance(s)",
            summary.elapsed.as_secs_f64(),
            summary.failures.len()
        );
        Ok(summary)
    }
}

async fn run_instance(
    mut actor: Box<dyn Actor>,
    blueprint: Arc<dyn ActorBlueprint>,
    coordinator: Arc<PhaseCoordinator>,
) -> (ActorIdentity, Result<(), ActorError>) {
    let identity = actor.identity().clone();

    for phase in 0..coordinator.phase_count() {
        if !coordinator.enter_phase(phase).await {
            debug!("{} stopping before phase {}", identity, phase);
            break;
        }
        let blocking = blueprint.is_blocking(phase);
        let result = actor
            .run_phase(phase, coordinator.stop_token(phase, blocking))
            .await;
        coordinator.finish_phase(phase, blocking);

        if let Err(e) = result {
            error!("{} failed: {}", identity, e);
            coordinator.abort();
            return (identity, Err(e));
        }
    }
    (identity, Ok(()))
}
