//! Numeric value generators.

use rand::Rng;
use workload_core::Value;

/// Generate a random integer in the given range (inclusive).
pub fn generate_int_range<R: Rng>(rng: &mut R, min: i64, max: i64) -> Value {
    Value::int(rng.random_range(min..=max))
}

/// Generate a random double in the given range (inclusive).
pub fn generate_double_range<R: Rng>(rng: &mut R, min: f64, max: f64) -> Value {
    Value::Double(rng.random_range(min..=max))
}

/// Generate a boolean that is true with probability `true_weight`.
pub fn generate_weighted_bool<R: Rng>(rng: &mut R, true_weight: f64) -> Value {
    Value::Bool(rng.random_bool(true_weight))
}
