//! MongoDB backend for docstress.
//!
//! Implements [`workload_core::BackendClient`] with the official driver.
//! Each actor instance gets its own client handle over a shared connection
//! pool, and its own session once it starts a transaction.

pub mod bulk;
pub mod client;
pub mod convert;
pub mod error;

pub use client::{MongoBackendClient, MongoClientFactory};
pub use error::{classify, MongoBackendError};
