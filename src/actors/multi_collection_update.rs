//! `MultiCollectionUpdate`: each iteration runs one `updateMany` against a
//! collection picked uniformly from `Collection0 .. Collection{N-1}`.

use super::{Actor, ActorBlueprint, ActorResources};
use crate::dispatch::{
    compile_template, CompiledCommand, CompiledWrite, ConfiguredOperation, DispatchTarget,
    OperationKind,
};
use crate::error::ActorError;
use crate::metrics::ActorIdentity;
use crate::phase_loop::PhaseLoop;
use crate::session::SessionState;
use crate::strategy::{ExecutionStrategy, ExecutionStrategyOptions, OperationMetrics};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use serde_yaml::Value as YamlValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use workload_core::{ActorContext, BackendClient, ConfigError, Namespace, PhaseContext};

#[derive(Debug)]
pub struct MultiCollectionUpdatePhase {
    pub database: String,
    pub collection_count: u64,
    pub operation: ConfiguredOperation,
    pub strategy: ExecutionStrategyOptions,
}

impl MultiCollectionUpdatePhase {
    pub fn from_phase(phase: &PhaseContext<'_>) -> Result<Self, ConfigError> {
        let scope = phase.scope();
        let collection_count: u64 = phase.get("CollectionCount")?;
        if collection_count == 0 {
            return Err(ConfigError::InvalidField {
                scope,
                field: "CollectionCount".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let match_all = YamlValue::Mapping(Default::default());
        let filter = compile_template(
            &scope,
            "UpdateFilter",
            phase.raw("UpdateFilter").unwrap_or(&match_all),
        )?;
        let update: YamlValue = phase.get("Update")?;
        let update = compile_template(&scope, "Update", &update)?;

        let operation = ConfiguredOperation::new(
            OperationKind::UpdateMany,
            CompiledCommand::Write(CompiledWrite::UpdateMany {
                filter,
                update,
                upsert: false,
            }),
        )
        .with_metrics_name("updateTime");

        Ok(Self {
            database: phase.get("Database")?,
            collection_count,
            operation,
            strategy: phase.get_or("ExecutionStrategy", ExecutionStrategyOptions::default())?,
        })
    }

    /// Namespace of the collection with the given number.
    pub fn namespace(&self, number: u64) -> Namespace {
        Namespace::new(self.database.clone(), format!("Collection{number}"))
    }
}

#[derive(Debug)]
pub struct MultiCollectionUpdateBlueprint {
    name: String,
    threads: usize,
    phases: PhaseLoop<MultiCollectionUpdatePhase>,
}

impl MultiCollectionUpdateBlueprint {
    pub fn build(actor: ActorContext<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: actor.name().to_string(),
            threads: actor.threads(),
            phases: PhaseLoop::build(actor, MultiCollectionUpdatePhase::from_phase)?,
        })
    }
}

impl ActorBlueprint for MultiCollectionUpdateBlueprint {
    fn name(&self) -> &str {
        &self.name
    }

    fn actor_type(&self) -> &'static str {
        "MultiCollectionUpdate"
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
        Box::new(MultiCollectionUpdate::new(self, resources))
    }
}

pub struct MultiCollectionUpdate {
    identity: ActorIdentity,
    blueprint: Arc<MultiCollectionUpdateBlueprint>,
    client: Box<dyn BackendClient>,
    rng: StdRng,
    session: SessionState,
    strategy: ExecutionStrategy,
    metrics: OperationMetrics,
}

impl MultiCollectionUpdate {
    pub fn new(blueprint: Arc<MultiCollectionUpdateBlueprint>, resources: ActorResources) -> Self {
        let ActorResources {
            identity,
            client,
            rng,
            metrics: registry,
        } = resources;
        let metrics = OperationMetrics::with_timer(registry.timer(&identity, "updateTime"))
            .with_updated(registry.counter(&identity, "updatedDocuments"));

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
}

#[async_trait]
impl Actor for MultiCollectionUpdate {
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
            return Ok(());
        };
        let config = active.config();
        strategy.set_options(config.strategy.clone());
        info!(
            "{} starting phase {} across {} collection(s) in {}",
            identity, phase, config.collection_count, config.database
        );

        let mut iterations = active.iterations(stop);
        while iterations.next().await {
            let number = rng.random_range(0..config.collection_count);
            let namespace = config.namespace(number);
            debug!("{} updating {}", identity, namespace);

            // Arguments are evaluated before the timer starts
            let prepared = config.operation.prepare(rng);
            let mut target = DispatchTarget {
                client: &mut **client,
                namespace: &namespace,
                session: &mut *session,
            };
            strategy
                .attempt(&config.operation, &prepared, metrics, &mut target)
                .await
                .map_err(|source| ActorError::Operation {
                    actor: identity.clone(),
                    phase,
                    source,
                })?;
        }

        info!(
            "{} finished phase {} after {} update(s)",
            identity,
            phase,
            iterations.completed()
        );
        Ok(())
    }
}
