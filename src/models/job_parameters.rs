//! Job parameters: the immutable, typed key/value set that identifies a job instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{value}"),
            ParameterValue::Long(value) => write!(f, "{value}"),
            ParameterValue::Double(value) => write!(f, "{value}"),
            ParameterValue::Date(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    /// Identifying parameters take part in the job instance identity
    pub identifying: bool,
}

/// Immutable parameter set. Keys are kept sorted so equal sets compare and hash
/// identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    /// Only the identifying parameters
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Normalized identity string used to key job instances
    pub fn identity_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| format!("{k}={}", p.value))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Start a builder pre-filled with these parameters
    pub fn to_builder(&self) -> JobParametersBuilder {
        JobParametersBuilder {
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .parameters
            .iter()
            .map(|(k, p)| format!("{k}={}", p.value))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    fn add(mut self, key: impl Into<String>, value: ParameterValue, identifying: bool) -> Self {
        self.parameters
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    pub fn add_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, ParameterValue::String(value.into()), true)
    }

    pub fn add_long(self, key: impl Into<String>, value: i64) -> Self {
        self.add(key, ParameterValue::Long(value), true)
    }

    pub fn add_double(self, key: impl Into<String>, value: f64) -> Self {
        self.add(key, ParameterValue::Double(value), true)
    }

    pub fn add_date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(key, ParameterValue::Date(value), true)
    }

    /// Add a parameter that does not contribute to the instance identity
    pub fn add_non_identifying(self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.add(key, value, false)
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.parameters.remove(key);
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_insertion_order() {
        let first = JobParameters::builder()
            .add_string("input", "a.csv")
            .add_long("run.id", 3)
            .build();
        let second = JobParameters::builder()
            .add_long("run.id", 3)
            .add_string("input", "a.csv")
            .build();

        assert_eq!(first, second);
        assert_eq!(first.identity_key(), "input=a.csv;run.id=3");
    }

    #[test]
    fn test_non_identifying_parameters_excluded_from_identity() {
        let params = JobParameters::builder()
            .add_string("input", "a.csv")
            .add_non_identifying("attempt", ParameterValue::Long(2))
            .build();

        assert_eq!(params.identity_key(), "input=a.csv");
        assert_eq!(params.identifying().len(), 1);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_typed_getters() {
        let params = JobParameters::builder()
            .add_string("name", "daily")
            .add_long("count", 5)
            .add_double("ratio", 0.5)
            .build();

        assert_eq!(params.get_string("name"), Some("daily"));
        assert_eq!(params.get_long("count"), Some(5));
        assert_eq!(params.get_double("ratio"), Some(0.5));
        assert_eq!(params.get_long("name"), None);
        assert_eq!(params.get_date("missing"), None);
    }
}
