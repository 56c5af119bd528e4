//! Rule condition parsing and evaluation
//!
//! A condition is a single comparison `<field> <op> <number>`, for example
//! `usage > 80` or `heap_usage >= 95.5`. Conditions are parsed once into a
//! [`Condition`] and then evaluated against each sample's [`FieldValues`].

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Field, FieldValues};

static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(>=|<=|==|!=|>|<)\s*(\S+)\s*$")
        .expect("condition pattern is valid")
});

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
}

impl Operator {
    /// Symbol as written in conditions
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    /// Apply the comparison
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Gte => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl FromStr for Operator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => Err(ConditionError::UnknownOperator(other.to_string())),
        }
    }
}

/// Parsed single-predicate condition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub threshold: f64,
}

impl Condition {
    /// Parse a condition string
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Empty);
        }

        let caps = CONDITION_RE
            .captures(trimmed)
            .ok_or_else(|| ConditionError::Syntax(trimmed.to_string()))?;

        let field = caps[1]
            .parse::<Field>()
            .map_err(|()| ConditionError::UnknownField(caps[1].to_string()))?;
        let operator = caps[2].parse::<Operator>()?;

        let literal = &caps[3];
        let threshold = literal
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ConditionError::InvalidNumber(literal.to_string()))?;

        Ok(Self {
            field,
            operator,
            threshold,
        })
    }

    /// Evaluate against a field set; missing fields count as 0
    pub fn evaluate(&self, fields: &FieldValues) -> bool {
        self.operator.compare(fields.get(self.field), self.threshold)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.field,
            self.operator.symbol(),
            self.threshold
        )
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check that a condition string is well formed
pub fn validate(condition: &str) -> Result<(), ConditionError> {
    Condition::parse(condition).map(|_| ())
}

/// Parse and evaluate in one step
pub fn evaluate(condition: &str, fields: &FieldValues) -> Result<bool, ConditionError> {
    Ok(Condition::parse(condition)?.evaluate(fields))
}

/// Reasons a condition string is rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("malformed condition '{0}' (expected '<field> <op> <number>')")]
    Syntax(String),

    #[error("unknown field '{0}' (expected one of active, idle, pending, max, usage, timeout, heap_usage, cpu_usage)")]
    UnknownField(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("threshold '{0}' is not a finite number")]
    InvalidNumber(String),
}
