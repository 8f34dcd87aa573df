//! Core types for docstress workloads.
//!
//! This crate provides the foundational types shared by the engine, the
//! expression evaluator and the backend clients:
//!
//! - [`Value`] / [`Document`] - concrete evaluated values
//! - [`WorkloadConfig`] - workload files and phase-level lookups
//! - [`BackendClient`] - the narrow interface to the data store
//!
//! # Architecture
//!
//! ```text
//! workload-core (this crate)
//!    │
//!    ├─── workload-generator  (compiles and evaluates value templates)
//!    ├─── workload-mongodb    (BackendClient over the MongoDB driver)
//!    └─── docstress           (phase loop, dispatcher, execution strategy)
//! ```

pub mod backend;
pub mod config;
pub mod duration;
pub mod options;
pub mod values;

// Re-exports for convenience
pub use backend::{
    apply_bulk_write, ApplyWrite, BackendClient, BackendClientFactory, BackendCommand,
    BackendError, BackendOutcome, BulkWriteFailure, ItemOutcome, Namespace, WriteCounts,
    WriteModel,
};
pub use config::{ActorConfig, ActorContext, ConfigError, PhaseContext, WorkloadConfig};
pub use duration::{parse_duration, DurationSpec};
pub use options::{OperationOptions, ReadConcern, ReadPreference, TransactionOptions, WriteConcern};
pub use values::{document_size, yaml_to_value, Document, Value};
