use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{BatchError, BatchResult};
use crate::models::JobParameters;

/// Checks job parameters before anything is created in the repository
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> BatchResult<()>;
}

impl<F> JobParametersValidator for F
where
    F: Fn(&JobParameters) -> BatchResult<()> + Send + Sync,
{
    fn validate(&self, parameters: &JobParameters) -> BatchResult<()> {
        self(parameters)
    }
}

/// Required and optional key checks.
///
/// Every required key must be present. When optional keys are declared, keys outside
/// the required and optional sets are rejected; with no optional keys anything extra
/// is accepted.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new<R, O, S, T>(required_keys: R, optional_keys: O) -> BatchResult<Self>
    where
        R: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let required_keys: BTreeSet<String> = required_keys.into_iter().map(Into::into).collect();
        let optional_keys: BTreeSet<String> = optional_keys.into_iter().map(Into::into).collect();
        let overlap: Vec<&String> = required_keys.intersection(&optional_keys).collect();
        if !overlap.is_empty() {
            return Err(BatchError::Configuration(format!(
                "keys cannot be both required and optional: {overlap:?}"
            )));
        }
        Ok(Self {
            required_keys,
            optional_keys,
        })
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> BatchResult<()> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .map(String::as_str)
            .filter(|key| !parameters.contains_key(key))
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::Validation(format!(
                "job parameters do not contain required keys: {missing:?}"
            )));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .keys()
                .filter(|key| !self.required_keys.contains(*key) && !self.optional_keys.contains(*key))
                .collect();
            if !unexpected.is_empty() {
                return Err(BatchError::Validation(format!(
                    "job parameters contain keys that are neither required nor optional: {unexpected:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Runs every validator in order, stopping at the first failure
#[derive(Clone, Default)]
pub struct CompositeJobParametersValidator {
    validators: Vec<Arc<dyn JobParametersValidator>>,
}

impl CompositeJobParametersValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl JobParametersValidator for CompositeJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> BatchResult<()> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.validate(parameters))
    }
}

/// Derives the parameters of the next job instance from the previous ones
pub trait JobParametersIncrementer: Send + Sync {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

pub const RUN_ID_KEY: &str = "run.id";

fn next_run_id(previous: Option<&JobParameters>, key: &str) -> i64 {
    previous.and_then(|p| p.get_long(key)).unwrap_or(0) + 1
}

/// Keeps the previous parameters and bumps a run id
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self {
            key: RUN_ID_KEY.to_string(),
        }
    }
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let builder = previous
            .map(JobParameters::to_builder)
            .unwrap_or_else(JobParameters::builder);
        builder
            .add_long(self.key.clone(), next_run_id(previous, &self.key))
            .build()
    }
}

/// Drops the previous parameters, keeping only the bumped run id
#[derive(Debug, Clone)]
pub struct ClearRunIdIncrementer {
    key: String,
}

impl Default for ClearRunIdIncrementer {
    fn default() -> Self {
        Self {
            key: RUN_ID_KEY.to_string(),
        }
    }
}

impl ClearRunIdIncrementer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl JobParametersIncrementer for ClearRunIdIncrementer {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters {
        JobParameters::builder()
            .add_long(self.key.clone(), next_run_id(previous, &self.key))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validator_required_and_optional() {
        let validator = DefaultJobParametersValidator::new(["input"], ["limit"]).unwrap();

        let ok = JobParameters::builder()
            .add_string("input", "a.csv")
            .add_long("limit", 5)
            .build();
        assert!(validator.validate(&ok).is_ok());

        let missing = JobParameters::builder().add_long("limit", 5).build();
        assert!(matches!(validator.validate(&missing), Err(BatchError::Validation(_))));

        let extra = ok.to_builder().add_string("unexpected", "x").build();
        assert!(matches!(validator.validate(&extra), Err(BatchError::Validation(_))));
    }

    #[test]
    fn test_default_validator_without_optional_accepts_extras() {
        let validator = DefaultJobParametersValidator::new(["input"], Vec::<String>::new()).unwrap();
        let params = JobParameters::builder()
            .add_string("input", "a.csv")
            .add_string("anything", "goes")
            .build();
        assert!(validator.validate(&params).is_ok());
    }

    #[test]
    fn test_overlapping_keys_rejected() {
        let result = DefaultJobParametersValidator::new(["input"], ["input"]);
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn test_composite_validator_stops_at_first_failure() {
        let composite = CompositeJobParametersValidator::new()
            .with(DefaultJobParametersValidator::new(["input"], Vec::<String>::new()).unwrap())
            .with(|params: &JobParameters| -> BatchResult<()> {
                match params.get_long("limit") {
                    Some(limit) if limit < 0 => Err(BatchError::Validation("negative limit".to_string())),
                    _ => Ok(()),
                }
            });

        let negative = JobParameters::builder()
            .add_string("input", "a.csv")
            .add_long("limit", -1)
            .build();
        assert_eq!(
            composite.validate(&negative),
            Err(BatchError::Validation("negative limit".to_string()))
        );
    }

    #[test]
    fn test_run_id_incrementers() {
        let first = RunIdIncrementer::new().get_next(None);
        assert_eq!(first.get_long("run.id"), Some(1));

        let previous = JobParameters::builder()
            .add_long("run.id", 4)
            .add_string("input", "a.csv")
            .build();
        let next = RunIdIncrementer::new().get_next(Some(&previous));
        assert_eq!(next.get_long("run.id"), Some(5));
        assert_eq!(next.get_string("input"), Some("a.csv"));

        let cleared = ClearRunIdIncrementer::new().get_next(Some(&previous));
        assert_eq!(cleared.get_long("run.id"), Some(5));
        assert_eq!(cleared.len(), 1);

        let custom = ClearRunIdIncrementer::with_key("batch.seq").get_next(None);
        assert_eq!(custom.get_long("batch.seq"), Some(1));
    }
}
