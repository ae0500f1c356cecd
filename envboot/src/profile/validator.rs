//! Collection validators
//!
//! A [`Validator`] is the schema constraint a document database enforces on
//! writes: required fields plus per-field type, range and pattern rules.
//! Clients call [`Validator::check`] before accepting a document.

use std::collections::BTreeMap;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::client::Document;

/// Field type accepted by a validator rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Double,
    Bool,
    Date,
    Object,
    Array,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Double => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Date => value
                .as_str()
                .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

/// Constraint on a single field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FieldKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldRule {
    pub fn of(kind: FieldKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Schema constraint attached to a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validator {
    pub required: Vec<String>,
    pub properties: BTreeMap<String, FieldRule>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be of type {expected:?}")]
    WrongType { field: String, expected: FieldKind },

    #[error("field '{field}' value {value} is outside [{minimum:?}, {maximum:?}]")]
    OutOfRange {
        field: String,
        value: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    },

    #[error("field '{field}' does not match pattern {pattern}")]
    PatternMismatch { field: String, pattern: String },

    #[error("invalid pattern for field '{field}': {reason}")]
    InvalidPattern { field: String, reason: String },
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    pub fn property(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.properties.insert(field.into(), rule);
        self
    }

    /// Compile every pattern once; used when a profile is validated
    pub fn compile_patterns(&self) -> Result<(), ValidationError> {
        for (field, rule) in &self.properties {
            if let Some(pattern) = &rule.pattern {
                Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
                    field: field.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Check a document against this validator, reporting the first violation
    pub fn check(&self, document: &Document) -> Result<(), ValidationError> {
        for field in &self.required {
            if !document.contains_key(field) {
                return Err(ValidationError::MissingField(field.clone()));
            }
        }

        for (field, rule) in &self.properties {
            let Some(value) = document.get(field) else {
                continue;
            };
            Self::check_field(field, rule, value)?;
        }
        Ok(())
    }

    fn check_field(field: &str, rule: &FieldRule, value: &Value) -> Result<(), ValidationError> {
        if let Some(kind) = rule.kind {
            if !kind.matches(value) {
                return Err(ValidationError::WrongType {
                    field: field.to_string(),
                    expected: kind,
                });
            }
        }

        if rule.minimum.is_some() || rule.maximum.is_some() {
            if let Some(number) = value.as_f64() {
                let below = rule.minimum.map_or(false, |min| number < min);
                let above = rule.maximum.map_or(false, |max| number > max);
                if below || above {
                    return Err(ValidationError::OutOfRange {
                        field: field.to_string(),
                        value: number,
                        minimum: rule.minimum,
                        maximum: rule.maximum,
                    });
                }
            }
        }

        if let (Some(pattern), Some(text)) = (&rule.pattern, value.as_str()) {
            let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
                field: field.to_string(),
                reason: e.to_string(),
            })?;
            if !regex.is_match(text) {
                return Err(ValidationError::PatternMismatch {
                    field: field.to_string(),
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }
}
