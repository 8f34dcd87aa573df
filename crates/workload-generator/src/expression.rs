//! Compiled value templates.

use crate::error::ExpressionError;
use crate::generators::Generator;
use rand::Rng;
use serde_yaml::Value as YamlValue;
use workload_core::{yaml_to_value, Document, Value};

/// An immutable template tree.
///
/// Evaluation only reads the tree, so one compiled expression can be shared
/// by every actor instance; each caller brings its own random stream.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Scalar copied through unchanged
    Literal(Value),
    /// Document whose field values are themselves templates
    Document(Vec<(String, Expression)>),
    /// Array whose elements are templates
    Array(Vec<Expression>),
    /// `^Name` node drawing from the random stream
    Generator(Generator),
}

impl Expression {
    /// Compile a YAML template.
    pub fn compile(template: &YamlValue) -> Result<Self, ExpressionError> {
        match template {
            YamlValue::Sequence(items) => Ok(Self::Array(
                items
                    .iter()
                    .map(Self::compile)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            YamlValue::Mapping(map) => {
                if map.len() == 1 {
                    if let Some((YamlValue::String(key), params)) = map.iter().next() {
                        if let Some(name) = key.strip_prefix('^') {
                            return Ok(Self::Generator(Generator::compile(name, params)?));
                        }
                    }
                }

                let mut fields = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let key = workload_core::values::yaml_key(key)
                        .ok_or_else(|| ExpressionError::UnsupportedKey(format!("{key:?}")))?;
                    fields.push((key, Self::compile(value)?));
                }
                Ok(Self::Document(fields))
            }
            YamlValue::Tagged(tagged) => Self::compile(&tagged.value),
            scalar => Ok(Self::Literal(yaml_to_value(scalar))),
        }
    }

    /// Produce a concrete value.
    pub fn evaluate<R: Rng>(&self, rng: &mut R) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Document(fields) => Value::Document(
                fields
                    .iter()
                    .map(|(k, e)| (k.clone(), e.evaluate(rng)))
                    .collect(),
            ),
            Self::Array(items) => Value::Array(items.iter().map(|e| e.evaluate(rng)).collect()),
            Self::Generator(generator) => generator.generate(rng),
        }
    }

    /// Whether evaluation ever consults the random stream.
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Document(fields) => fields.iter().all(|(_, e)| e.is_constant()),
            Self::Array(items) => items.iter().all(Self::is_constant),
            Self::Generator(Generator::Verbatim(_)) => true,
            Self::Generator(_) => false,
        }
    }
}

/// A template guaranteed to evaluate to a document (filters, updates,
/// documents to insert).
#[derive(Debug, Clone)]
pub struct DocumentExpression(Vec<(String, Expression)>);

impl DocumentExpression {
    /// Compile a template whose top level must be a mapping.
    pub fn compile(template: &YamlValue) -> Result<Self, ExpressionError> {
        match Expression::compile(template)? {
            Expression::Document(fields) => Ok(Self(fields)),
            other => Err(ExpressionError::UnexpectedShape {
                expected: "a document".to_string(),
                found: describe(&other).to_string(),
            }),
        }
    }

    /// The empty document `{}`.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn evaluate<R: Rng>(&self, rng: &mut R) -> Document {
        self.0
            .iter()
            .map(|(k, e)| (k.clone(), e.evaluate(rng)))
            .collect()
    }
}

fn describe(expression: &Expression) -> &'static str {
    match expression {
        Expression::Literal(v) => v.kind(),
        Expression::Document(_) => "document",
        Expression::Array(_) => "array",
        Expression::Generator(_) => "generator",
    }
}
