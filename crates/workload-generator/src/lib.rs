//! Value templates for docstress workloads.
//!
//! Templates are written in YAML. Plain values are literals; a single-key
//! mapping whose key starts with `^` is a generator:
//!
//! ```rust
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use workload_generator::DocumentExpression;
//!
//! let template: serde_yaml::Value = serde_yaml::from_str(r#"
//! user: { ^Pattern: "user_{rand:4}" }
//! age: { ^RandomInt: { min: 18, max: 80 } }
//! status: { ^Choose: { from: [active, idle], weights: [3, 1] } }
//! "#).unwrap();
//!
//! let expr = DocumentExpression::compile(&template).unwrap();
//! let mut rng = StdRng::seed_from_u64(42);
//! let doc = expr.evaluate(&mut rng);
//! assert!(doc.contains_key("age"));
//! ```
//!
//! # Generators
//!
//! - `^RandomInt` - uniform integer in `[min, max]`
//! - `^RandomDouble` - uniform double in `[min, max]`
//! - `^RandomBool` - boolean with `trueWeight` probability of true
//! - `^RandomString` - `length` characters from `alphabet`
//! - `^Choose` - one of `from`, optionally `weights`
//! - `^Pattern` - string with `{uuid}` and `{rand:N}` placeholders
//! - `^Uuid` - UUID string
//! - `^Array` - `number` evaluations of `of`
//! - `^Verbatim` - value passed through without interpretation

pub mod error;
pub mod expression;
pub mod generators;

// Re-exports for convenience
pub use error::ExpressionError;
pub use expression::{DocumentExpression, Expression};
pub use generators::Generator;
