//! Expression parser port and the template parser
//!
//! Evaluation is an external collaborator: the store hands it a
//! [`ParseContext`] and gets back the rendered text or value plus the keys the
//! result depends on. [`TemplateParser`] covers plain `$(namespace:name)`
//! substitution.

use regex::Regex;
use sa_core::{ValueType, VariableValue};
use std::collections::HashSet;
use thiserror::Error;

use crate::store::ParseContext;

/// Expression evaluation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Invalid expression: {0}")]
    Invalid(String),

    #[error("Expression produced {actual}, expected {expected}")]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },
}

/// Result of substituting variables into a text
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub text: String,
    /// Keys the text depends on
    pub variable_ids: HashSet<String>,
}

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteResult {
    pub value: Result<VariableValue, ExpressionError>,
    /// Keys the value depends on, also reported on failure
    pub variable_ids: HashSet<String>,
}

/// Parses and evaluates user expressions
pub trait ExpressionParser: Send + Sync {
    fn parse_variables(&self, text: &str, ctx: &ParseContext<'_>) -> ParseResult;

    fn execute_expression(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
        required_type: Option<ValueType>,
    ) -> ExecuteResult;
}

const REFERENCE_PATTERN: &str = r"\$\(([A-Za-z0-9_\-]+:[^)\s]+)\)";

/// `$(namespace:name)` substitution
///
/// An expression consisting of a single reference evaluates to the raw value
/// of that variable. Anything else is substituted as text and then read back
/// as a boolean, a number or a string.
#[derive(Debug, Clone)]
pub struct TemplateParser {
    reference: Regex,
}

impl TemplateParser {
    pub fn new() -> Result<Self, ExpressionError> {
        let reference = Regex::new(REFERENCE_PATTERN)
            .map_err(|e| ExpressionError::Invalid(format!("Invalid reference pattern: {}", e)))?;
        Ok(Self { reference })
    }

    fn substitute(&self, text: &str, ctx: &ParseContext<'_>) -> ParseResult {
        let mut variable_ids = HashSet::new();
        let rendered = self.reference.replace_all(text, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            variable_ids.insert(ctx.dependency_of(key));
            ctx.value_of(key).to_string()
        });

        ParseResult {
            text: rendered.into_owned(),
            variable_ids,
        }
    }
}

impl ExpressionParser for TemplateParser {
    fn parse_variables(&self, text: &str, ctx: &ParseContext<'_>) -> ParseResult {
        self.substitute(text, ctx)
    }

    fn execute_expression(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
        required_type: Option<ValueType>,
    ) -> ExecuteResult {
        let trimmed = text.trim();

        let (value, variable_ids) = match self.reference.captures(trimmed) {
            Some(caps) if caps.get(0).is_some_and(|m| m.as_str() == trimmed) => {
                let key = &caps[1];
                let deps = HashSet::from([ctx.dependency_of(key)]);
                (ctx.value_of(key), deps)
            }
            _ => {
                let parsed = self.substitute(trimmed, ctx);
                (read_literal(&parsed.text), parsed.variable_ids)
            }
        };

        let value = match required_type {
            Some(expected) if expected != value.value_type() => {
                Err(ExpressionError::TypeMismatch {
                    expected,
                    actual: value.value_type(),
                })
            }
            _ => Ok(value),
        };

        ExecuteResult {
            value,
            variable_ids,
        }
    }
}

fn read_literal(text: &str) -> VariableValue {
    match text {
        "" => VariableValue::Undefined,
        "true" => VariableValue::Boolean(true),
        "false" => VariableValue::Boolean(false),
        _ => match text.parse::<f64>() {
            Ok(n) if n.is_finite() => VariableValue::Number(n),
            _ => VariableValue::String(text.to_string()),
        },
    }
}
