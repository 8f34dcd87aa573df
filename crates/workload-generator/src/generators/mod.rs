//! Generator nodes.
//!
//! A generator is written in a template as a single-key mapping whose key
//! starts with `^`, for example `{^RandomInt: {min: 0, max: 10}}`. This
//! module parses the parameters once and draws values from the random stream
//! on every evaluation.

pub mod numeric;
pub mod string;
pub mod uuid;

use crate::error::ExpressionError;
use crate::expression::Expression;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use workload_core::{yaml_to_value, Value};

/// How many elements an `^Array` produces.
#[derive(Debug, Clone)]
pub enum Count {
    Fixed(usize),
    Random { min: usize, max: usize },
}

impl Count {
    fn draw<R: Rng>(&self, rng: &mut R) -> usize {
        match self {
            Self::Fixed(n) => *n,
            Self::Random { min, max } => rng.random_range(*min..=*max),
        }
    }
}

/// A compiled generator node.
#[derive(Debug, Clone)]
pub enum Generator {
    RandomInt { min: i64, max: i64 },
    RandomDouble { min: f64, max: f64 },
    RandomBool { true_weight: f64 },
    RandomString { length: usize, alphabet: Vec<char> },
    Choose {
        from: Vec<Expression>,
        weights: Option<WeightedIndex<f64>>,
    },
    Pattern { pattern: String },
    Uuid,
    Array { of: Box<Expression>, number: Count },
    Verbatim(Value),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IntRangeParams {
    min: i64,
    max: i64,
    #[serde(default)]
    distribution: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DoubleRangeParams {
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct BoolParams {
    #[serde(default = "default_true_weight")]
    true_weight: f64,
}

fn default_true_weight() -> f64 {
    0.5
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StringParams {
    length: usize,
    #[serde(default)]
    alphabet: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChooseParams {
    from: Vec<YamlValue>,
    #[serde(default)]
    weights: Option<Vec<f64>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ArrayParams {
    of: YamlValue,
    number: YamlValue,
}

fn params<T: DeserializeOwned>(name: &str, value: &YamlValue) -> Result<T, ExpressionError> {
    // `^Uuid: {}` and `^RandomBool: {}` may also be written with a null body
    let value = if value.is_null() {
        YamlValue::Mapping(Default::default())
    } else {
        value.clone()
    };
    serde_yaml::from_value(value).map_err(|e| ExpressionError::invalid(name, e.to_string()))
}

impl Generator {
    /// Compile a generator from its `^Name` (without the caret) and parameters.
    pub fn compile(name: &str, value: &YamlValue) -> Result<Self, ExpressionError> {
        match name {
            "RandomInt" => {
                let p: IntRangeParams = params(name, value)?;
                if let Some(dist) = p.distribution.as_deref() {
                    if dist != "uniform" {
                        return Err(ExpressionError::invalid(
                            name,
                            format!("unsupported distribution '{dist}'"),
                        ));
                    }
                }
                if p.min > p.max {
                    return Err(ExpressionError::invalid(
                        name,
                        format!("min {} is greater than max {}", p.min, p.max),
                    ));
                }
                Ok(Self::RandomInt {
                    min: p.min,
                    max: p.max,
                })
            }
            "RandomDouble" => {
                let p: DoubleRangeParams = params(name, value)?;
                if !(p.min <= p.max) {
                    return Err(ExpressionError::invalid(
                        name,
                        format!("min {} is greater than max {}", p.min, p.max),
                    ));
                }
                Ok(Self::RandomDouble {
                    min: p.min,
                    max: p.max,
                })
            }
            "RandomBool" => {
                let p: BoolParams = params(name, value)?;
                if !(0.0..=1.0).contains(&p.true_weight) {
                    return Err(ExpressionError::invalid(
                        name,
                        "trueWeight must be between 0 and 1",
                    ));
                }
                Ok(Self::RandomBool {
                    true_weight: p.true_weight,
                })
            }
            "RandomString" => {
                let p: StringParams = params(name, value)?;
                let alphabet: Vec<char> = p
                    .alphabet
                    .as_deref()
                    .unwrap_or(string::DEFAULT_ALPHABET)
                    .chars()
                    .collect();
                if alphabet.is_empty() {
                    return Err(ExpressionError::invalid(name, "alphabet is empty"));
                }
                Ok(Self::RandomString {
                    length: p.length,
                    alphabet,
                })
            }
            "Choose" => {
                let p: ChooseParams = params(name, value)?;
                if p.from.is_empty() {
                    return Err(ExpressionError::invalid(name, "'from' is empty"));
                }
                let weights = match p.weights {
                    None => None,
                    Some(w) if w.len() != p.from.len() => {
                        return Err(ExpressionError::invalid(
                            name,
                            format!("{} weights for {} choices", w.len(), p.from.len()),
                        ))
                    }
                    Some(w) => Some(
                        WeightedIndex::new(w)
                            .map_err(|e| ExpressionError::invalid(name, e.to_string()))?,
                    ),
                };
                let from = p
                    .from
                    .iter()
                    .map(Expression::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Choose { from, weights })
            }
            "Pattern" => {
                let pattern = value.as_str().ok_or_else(|| {
                    ExpressionError::invalid(name, "expected a pattern string")
                })?;
                Ok(Self::Pattern {
                    pattern: pattern.to_string(),
                })
            }
            "Uuid" => Ok(Self::Uuid),
            "Array" => {
                let p: ArrayParams = params(name, value)?;
                let of = Expression::compile(&p.of)?;
                let number = compile_count(&p.number)?;
                Ok(Self::Array {
                    of: Box::new(of),
                    number,
                })
            }
            "Verbatim" => Ok(Self::Verbatim(yaml_to_value(value))),
            other => Err(ExpressionError::UnknownGenerator(other.to_string())),
        }
    }

    /// Draw a value.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Value {
        match self {
            Self::RandomInt { min, max } => numeric::generate_int_range(rng, *min, *max),

            Self::RandomDouble { min, max } => numeric::generate_double_range(rng, *min, *max),

            Self::RandomBool { true_weight } => numeric::generate_weighted_bool(rng, *true_weight),

            Self::RandomString { length, alphabet } => {
                string::generate_random_string(rng, *length, alphabet)
            }

            Self::Choose { from, weights } => {
                let idx = match weights {
                    Some(dist) => dist.sample(rng),
                    None => rng.random_range(0..from.len()),
                };
                from[idx].evaluate(rng)
            }

            Self::Pattern { pattern } => string::generate_pattern(pattern, rng),

            Self::Uuid => uuid::generate_uuid(rng),

            Self::Array { of, number } => {
                let n = number.draw(rng);
                Value::Array((0..n).map(|_| of.evaluate(rng)).collect())
            }

            Self::Verbatim(value) => value.clone(),
        }
    }
}

/// `number` of an `^Array`: a non-negative integer or a `^RandomInt`.
fn compile_count(value: &YamlValue) -> Result<Count, ExpressionError> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n)
            .map(Count::Fixed)
            .map_err(|_| ExpressionError::invalid("Array", "number is too large"));
    }

    match Expression::compile(value)? {
        Expression::Generator(Generator::RandomInt { min, max }) if min >= 0 => {
            let to_usize = |v: i64| {
                usize::try_from(v)
                    .map_err(|_| ExpressionError::invalid("Array", "number is too large"))
            };
            Ok(Count::Random {
                min: to_usize(min)?,
                max: to_usize(max)?,
            })
        }
        _ => Err(ExpressionError::invalid(
            "Array",
            "number must be a non-negative integer or a non-negative ^RandomInt",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn yaml(s: &str) -> YamlValue {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_compile_random_int() {
        let g = Generator::compile("RandomInt", &yaml("{min: 1, max: 3}")).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let v = g.generate(&mut rng).as_i64().unwrap();
            assert!((1..=3).contains(&v));
        }
    }

    #[test]
    fn test_random_int_rejects_inverted_range() {
        let err = Generator::compile("RandomInt", &yaml("{min: 5, max: 1}")).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidParameters { .. }));
    }

    #[test]
    fn test_random_int_rejects_unknown_distribution() {
        assert!(Generator::compile(
            "RandomInt",
            &yaml("{min: 0, max: 1, distribution: poisson}")
        )
        .is_err());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        assert!(Generator::compile("RandomInt", &yaml("{min: 0, max: 1, mean: 3}")).is_err());
    }

    #[test]
    fn test_choose_with_weights() {
        let g = Generator::compile("Choose", &yaml("{from: [a, b], weights: [0, 1]}")).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(g.generate(&mut rng), Value::from("b"));
        }
    }

    #[test]
    fn test_choose_rejects_mismatched_weights() {
        assert!(Generator::compile("Choose", &yaml("{from: [a, b], weights: [1]}")).is_err());
        assert!(Generator::compile("Choose", &yaml("{from: []}")).is_err());
    }

    #[test]
    fn test_array_with_random_count() {
        let g = Generator::compile(
            "Array",
            &yaml("{of: {^RandomInt: {min: 0, max: 9}}, number: {^RandomInt: {min: 2, max: 4}}}"),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            match g.generate(&mut rng) {
                Value::Array(items) => assert!((2..=4).contains(&items.len())),
                other => panic!("expected array, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_array_rejects_string_count() {
        assert!(Generator::compile("Array", &yaml("{of: 1, number: many}")).is_err());
    }

    #[test]
    fn test_uuid_accepts_null_body() {
        assert!(matches!(
            Generator::compile("Uuid", &YamlValue::Null).unwrap(),
            Generator::Uuid
        ));
    }

    #[test]
    fn test_unknown_generator() {
        let err = Generator::compile("FastRandom", &yaml("{}")).unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownGenerator(_)));
    }
}
