//! Actor registry and the traits every actor type implements.
//!
//! An actor type is compiled once from its configuration into an
//! [`ActorBlueprint`]; the workload then instantiates the blueprint once per
//! `Threads` with per-instance resources.

mod crud;
mod multi_collection_update;

pub use crud::{CrudActor, CrudBlueprint};
pub use multi_collection_update::{MultiCollectionUpdate, MultiCollectionUpdateBlueprint};

use crate::error::ActorError;
use crate::metrics::{ActorIdentity, MetricsRegistry};
use async_trait::async_trait;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workload_core::{ActorContext, BackendClient, ConfigError};

/// Everything one actor instance owns.
pub struct ActorResources {
    pub identity: ActorIdentity,
    pub client: Box<dyn BackendClient>,
    pub rng: StdRng,
    pub metrics: MetricsRegistry,
}

/// A running actor instance.
#[async_trait]
pub trait Actor: Send {
    fn identity(&self) -> &ActorIdentity;

    /// Run `phase` until its bound is met or `stop` fires. No-op phases
    /// return immediately.
    async fn run_phase(&mut self, phase: usize, stop: CancellationToken) -> Result<(), ActorError>;
}

/// Compiled configuration of one actor, shared by all its instances.
pub trait ActorBlueprint: Send + Sync {
    fn name(&self) -> &str;

    fn actor_type(&self) -> &'static str;

    fn threads(&self) -> usize;

    fn phase_count(&self) -> usize;

    /// Whether instances hold the workload in `phase` until they finish.
    fn is_blocking(&self, phase: usize) -> bool;

    fn instantiate(self: Arc<Self>, resources: ActorResources) -> Box<dyn Actor>;
}

type BuildFn = fn(ActorContext<'_>) -> Result<Arc<dyn ActorBlueprint>, ConfigError>;

static ACTOR_TYPES: &[(&str, BuildFn)] = &[
    ("CrudActor", build_crud),
    ("MultiCollectionUpdate", build_multi_collection_update),
];

fn build_crud(actor: ActorContext<'_>) -> Result<Arc<dyn ActorBlueprint>, ConfigError> {
    Ok(Arc::new(CrudBlueprint::build(actor)?))
}

fn build_multi_collection_update(
    actor: ActorContext<'_>,
) -> Result<Arc<dyn ActorBlueprint>, ConfigError> {
    Ok(Arc::new(MultiCollectionUpdateBlueprint::build(actor)?))
}

/// Registered actor type names.
pub fn actor_types() -> impl Iterator<Item = &'static str> {
    ACTOR_TYPES.iter().map(|(name, _)| *name)
}

/// Compile an actor definition through the registry.
pub fn build_blueprint(actor: ActorContext<'_>) -> Result<Arc<dyn ActorBlueprint>, ConfigError> {
    let build = ACTOR_TYPES
        .iter()
        .find(|(name, _)| *name == actor.actor_type())
        .map(|(_, build)| build)
        .ok_or_else(|| ConfigError::UnknownActorType {
            actor: actor.name().to_string(),
            actor_type: actor.actor_type().to_string(),
        })?;
    build(actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::WorkloadConfig;

    #[test]
    fn test_unknown_actor_type() {
        let config = WorkloadConfig::from_yaml(
            "Actors:\n- Name: X\n  Type: HelloWorld\n  Phases:\n  - Nop: true\n",
        )
        .unwrap();
        let err = build_blueprint(config.actor_context(&config.actors[0]))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownActorType { .. }));
    }

    #[test]
    fn test_registry_names() {
        let names: Vec<_> = actor_types().collect();
        assert_eq!(names, vec!["CrudActor", "MultiCollectionUpdate"]);
    }
}
