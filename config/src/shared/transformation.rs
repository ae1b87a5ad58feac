use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::ValidationError;

/// A transformer parameter value as written in configuration.
///
/// Values coming from environment variables always arrive as strings, so the conversions accept
/// the textual form of booleans and integers as well.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    String(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("expected {expected}, got `{found}`")]
pub struct ParamValueError {
    pub expected: &'static str,
    pub found: String,
}

impl ParamValue {
    pub fn as_str(&self) -> Result<&str, ParamValueError> {
        match self {
            ParamValue::String(value) => Ok(value),
            other => Err(other.mismatch("a string")),
        }
    }

    pub fn to_i64(&self) -> Result<i64, ParamValueError> {
        match self {
            ParamValue::Int(value) => Ok(*value),
            ParamValue::String(value) => value
                .trim()
                .parse()
                .map_err(|_| self.mismatch("an integer")),
            ParamValue::Bool(_) => Err(self.mismatch("an integer")),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ParamValueError> {
        match self {
            ParamValue::Bool(value) => Ok(*value),
            ParamValue::String(value) => match value.trim().to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.mismatch("a boolean")),
            },
            ParamValue::Int(_) => Err(self.mismatch("a boolean")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> ParamValueError {
        ParamValueError {
            expected,
            found: self.to_string(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::String(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_owned())
    }
}

/// Binds a parameter to a column of the row being transformed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicParamConfig {
    pub column: String,
}

/// One transformer applied to a table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Registered transformer name, e.g. `RandomInt`.
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub dynamic_params: BTreeMap<String, DynamicParamConfig>,
}

impl TransformerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_dynamic_param(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.dynamic_params.insert(
            name.into(),
            DynamicParamConfig {
                column: column.into(),
            },
        );
        self
    }
}

/// Ordered transformers for one table. They run in the listed order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableTransformationConfig {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

impl TableTransformationConfig {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self
            .transformers
            .iter()
            .any(|transformer| transformer.name.trim().is_empty())
        {
            return Err(ValidationError::EmptyTransformerName(self.qualified_name()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_values_deserialize_untagged() {
        let config: TransformerConfig = serde_json::from_str(
            r#"{
                "name": "RandomInt",
                "params": {"column": "id", "min": 1, "max": "100", "keep_null": false},
                "dynamic_params": {"max": {"column": "limit"}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.params["column"], ParamValue::String("id".to_string()));
        assert_eq!(config.params["min"], ParamValue::Int(1));
        assert_eq!(config.params["max"].to_i64().unwrap(), 100);
        assert!(!config.params["keep_null"].to_bool().unwrap());
        assert_eq!(config.dynamic_params["max"].column, "limit");
    }

    #[test]
    fn conversions_report_the_offending_value() {
        let err = ParamValue::from("ten").to_i64().unwrap_err();
        assert_eq!(err.expected, "an integer");
        assert_eq!(err.found, "ten");

        assert!(ParamValue::Int(1).to_bool().is_err());
        assert!(ParamValue::Bool(true).as_str().is_err());
        assert!(ParamValue::from("TRUE").to_bool().unwrap());
    }

    #[test]
    fn empty_transformer_name_is_rejected() {
        let table = TableTransformationConfig {
            schema: "public".to_string(),
            name: "users".to_string(),
            transformers: vec![TransformerConfig::new(" ")],
        };

        assert!(matches!(
            table.validate(),
            Err(ValidationError::EmptyTransformerName(name)) if name == "public.users"
        ));
    }
}
