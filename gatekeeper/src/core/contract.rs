//! Result payload contracts.
//!
//! A task's final payload is only forwarded downstream when it satisfies the
//! caller's contract. The shipped contract is a JSON Schema.

use jsonschema::Validator;
use serde_json::Value;

use crate::error::ConfigError;

/// Schema for the structured review report produced by the review orchestrator.
pub const REVIEW_REPORT_SCHEMA: &str = include_str!("../../schemas/review_report.schema.json");

pub trait PayloadContract {
    /// Check `payload`, returning every violation on failure.
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>>;
}

/// Contract backed by a compiled JSON Schema.
pub struct JsonSchemaContract {
    validator: Validator,
}

impl JsonSchemaContract {
    pub fn new(schema: &Value) -> Result<Self, ConfigError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| ConfigError::invalid(format!("invalid result schema: {err}")))?;
        Ok(Self { validator })
    }

    pub fn from_json_str(schema: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(schema)
            .map_err(|err| ConfigError::invalid(format!("parse result schema: {err}")))?;
        Self::new(&value)
    }

    pub fn review_report() -> Result<Self, ConfigError> {
        Self::from_json_str(REVIEW_REPORT_SCHEMA)
    }
}

impl PayloadContract for JsonSchemaContract {
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>> {
        if self.validator.is_valid(payload) {
            return Ok(());
        }
        Err(self
            .validator
            .iter_errors(payload)
            .map(|err| err.to_string())
            .collect())
    }
}

/// Accepts any payload. Useful when the caller validates downstream.
pub struct AcceptAny;

impl PayloadContract for AcceptAny {
    fn validate(&self, _payload: &Value) -> Result<(), Vec<String>> {
        Ok(())
    }
}

impl<C: PayloadContract + ?Sized> PayloadContract for &C {
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>> {
        (**self).validate(payload)
    }
}

impl<C: PayloadContract + ?Sized> PayloadContract for std::sync::Arc<C> {
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>> {
        (**self).validate(payload)
    }
}
