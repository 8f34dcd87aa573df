//! `CrudActor`: runs a list of configured operations against one collection
//! per iteration.

use super::{Actor, ActorBlueprint, ActorResources};
use crate::dispatch::{ConfiguredOperation, DispatchTarget};
use crate::error::ActorError;
use crate::metrics::ActorIdentity;
use crate::phase_loop::PhaseLoop;
use crate::session::SessionState;
use crate::strategy::{ExecutionStrategy, ExecutionStrategyOptions, OperationMetrics};
use async_trait::async_trait;
use rand::rngs::StdRng;
use serde_yaml::Value as YamlValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use workload_core::{ActorContext, BackendClient, ConfigError, Namespace, PhaseContext};

/// One phase of a `CrudActor`.
#[derive(Debug)]
pub struct CrudPhase {
    pub namespace: Namespace,
    pub operations: Vec<ConfiguredOperation>,
    pub strategy: ExecutionStrategyOptions,
}

impl CrudPhase {
    pub fn from_phase(phase: &PhaseContext<'_>) -> Result<Self, ConfigError> {
        let namespace = Namespace::new(
            phase.get::<String>("Database")?,
            phase.get::<String>("Collection")?,
        );
        let scope = phase.scope();

        // Keys on the phase win over actor-level ones as a pair, so a phase
        // can replace an actor-wide `Operations` list with a single `Operation`.
        let (list, single) = match (phase.raw_local("Operations"), phase.raw_local("Operation")) {
            (None, None) => (phase.raw("Operations"), phase.raw("Operation")),
            local => local,
        };

        let operations = match (list, single) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidField {
                    scope,
                    field: "Operations".to_string(),
                    message: "cannot be combined with 'Operation'".to_string(),
                })
            }
            (None, None) => {
                return Err(ConfigError::MissingField {
                    scope,
                    field: "Operations".to_string(),
                })
            }
            (None, Some(single)) => vec![ConfiguredOperation::from_yaml(single, &scope)?],
            (Some(list), None) => parse_operation_list(list, &scope)?,
        };

        Ok(Self {
            namespace,
            operations,
            strategy: phase.get_or("ExecutionStrategy", ExecutionStrategyOptions::default())?,
        })
    }
}

fn parse_operation_list(
    list: &YamlValue,
    scope: &str,
) -> Result<Vec<ConfiguredOperation>, ConfigError> {
    let items = list.as_sequence().ok_or_else(|| ConfigError::InvalidField {
        scope: scope.to_string(),
        field: "Operations".to_string(),
        message: "expected a list".to_string(),
    })?;
    if items.is_empty() {
        return Err(ConfigError::InvalidField {
            scope: scope.to_string(),
            field: "Operations".to_string(),
            message: "must contain at least one operation".to_string(),
        });
    }
    items
        .iter()
        .map(|item| ConfiguredOperation::from_yaml(item, scope))
        .collect()
}

#[derive(Debug)]
pub struct CrudBlueprint {
    name: String,
    threads: usize,
    phases: PhaseLoop<CrudPhase>,
}

impl CrudBlueprint {
    pub fn build(actor: ActorContext<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: actor.name().to_string(),
            threads: actor.threads(),
            phases: PhaseLoop::build(actor, CrudPhase::from_phase)?,
        })
    }

    pub fn phases(&self) -> &PhaseLoop<CrudPhase> {
        &self.phases
    }
}

impl ActorBlueprint for CrudBlueprint {
    fn name(&self) -> &str {
        &self.name
    }

    fn actor_type(&self) -> &'static str {
        "CrudActor"
    }

    fn threads(&self) -> usize {
        self.threads
    }

    fn phase_count(&self) -> usize {
        self.phases.len()
    }

    fn is_blocking(&self, phase: usize) -> bool {
        self.phases.is_blocking(phase)
    }

    fn instantiate(self: Arc<Self>, resources: ActorResources) -> Box<dyn Actor> {
        Box::new(CrudActor::new(self, resources))
    }
}

pub struct CrudActor {
    identity: ActorIdentity,
    blueprint: Arc<CrudBlueprint>,
    client: Box<dyn BackendClient>,
    rng: StdRng,
    session: SessionState,
    strategy: ExecutionStrategy,
    /// Per phase, one entry per operation; empty for no-op phases
    metrics: Vec<Vec<OperationMetrics>>,
}

impl CrudActor {
    pub fn new(blueprint: Arc<CrudBlueprint>, resources: ActorResources) -> Self {
        let ActorResources {
            identity,
            client,
            rng,
            metrics: registry,
        } = resources;

        let metrics = (0..blueprint.phases.len())
            .map(|index| match blueprint.phases.phase(index) {
                Some(phase) => phase
                    .config()
                    .operations
                    .iter()
                    .map(|op| OperationMetrics::for_operation(&registry, &identity, op))
                    .collect(),
                None => Vec::new(),
            })
            .collect();

        Self {
            identity,
            blueprint,
            client,
            rng,
            session: SessionState::new(),
            strategy: ExecutionStrategy::new(ExecutionStrategyOptions::default()),
            metrics,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }
}

#[async_trait]
impl Actor for CrudActor {
    fn identity(&self) -> &ActorIdentity {
        &self.identity
    }

    async fn run_phase(&mut self, phase: usize, stop: CancellationToken) -> Result<(), ActorError> {
        let Self {
            identity,
            blueprint,
            client,
            rng,
            session,
            strategy,
            metrics,
        } = self;

        let Some(active) = blueprint.phases.phase(phase) else {
            debug!("{} has nothing to do in phase {}", identity, phase);
            return Ok(());
        };
        let config = active.config();
        let phase_metrics = metrics.get(phase).map(Vec::as_slice).unwrap_or_default();
        strategy.set_options(config.strategy.clone());

        info!(
            "{} starting phase {} on {} ({} operation(s))",
            identity,
            phase,
            config.namespace,
            config.operations.len()
        );

        let mut iterations = active.iterations(stop);
        let mut result = Ok(());
        'iterations: while iterations.next().await {
            debug!("{} iteration {}", identity, iterations.completed());
            for (operation, op_metrics) in config.operations.iter().zip(phase_metrics) {
                let prepared = operation.prepare(rng);
                let mut target = DispatchTarget {
                    client: &mut **client,
                    namespace: &config.namespace,
                    session: &mut *session,
                };
                if let Err(source) = strategy
                    .attempt(operation, &prepared, op_metrics, &mut target)
                    .await
                {
                    result = Err(ActorError::Operation {
                        actor: identity.clone(),
                        phase,
                        source,
                    });
                    break 'iterations;
                }
            }
        }

        if session.is_active() {
            warn!(
                "{} left a transaction open at the end of phase {}; aborting it",
                identity, phase
            );
            if let Err(e) = client.abort_transaction().await {
                warn!("{} failed to abort transaction: {}", identity, e);
            }
            session.mark_aborted();
        }

        info!(
            "{} finished phase {} after {} iteration(s), {} failure(s)",
            identity,
            phase,
            iterations.completed(),
            strategy.failures()
        );
        result
    }
}
