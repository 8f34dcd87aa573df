//! docstress library
//!
//! A synthetic-load engine for document stores. A workload file describes
//! actors, each running a list of phases; every phase repeats a set of
//! operations (inserts, updates, bulk writes, transactions, reads) with
//! arguments generated from value templates.
//!
//! # Layout
//!
//! - [`workload`] - compiles a workload and runs all actor instances
//! - [`coordinator`] - aligns phase boundaries across instances
//! - [`phase_loop`] - per-phase bounds and the iteration driver
//! - [`dispatch`] - operation registry, compilation and invocation
//! - [`strategy`] - retries, failure classification and metrics per call
//! - [`pacing`] - minimum delay between iterations
//! - [`actors`] - the actor registry (`CrudActor`, `MultiCollectionUpdate`)
//! - [`testing`] - an in-memory backend for tests
//!
//! # CLI Usage
//!
//! ```bash
//! # Run a workload against a local MongoDB
//! docstress run --workload demos/crud.yml --mongodb-uri mongodb://localhost:27017
//!
//! # Check a workload without connecting
//! docstress run --workload demos/crud.yml --dry-run
//! ```

pub mod actors;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod pacing;
pub mod phase_loop;
pub mod session;
pub mod strategy;
pub mod testing;
pub mod workload;

pub use dispatch::{ConfiguredOperation, OperationKind, OperationOutcome};
pub use error::{ActorError, OperationError};
pub use metrics::{ActorIdentity, MetricsRegistry, MetricsReport};
pub use session::{SessionState, TransactionState};
pub use strategy::{ExecutionStrategy, ExecutionStrategyOptions};
pub use workload::{ActorFailure, RunSummary, Workload};
