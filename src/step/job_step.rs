use std::sync::Arc;

use crate::job::Job;
use crate::models::{JobExecution, JobParameters, StepExecution};

/// Derives the parameters a job step launches its child job with
pub trait JobParametersExtractor: Send + Sync {
    fn get_job_parameters(&self, job: &JobExecution, step: &StepExecution) -> JobParameters;
}

impl<F> JobParametersExtractor for F
where
    F: Fn(&JobExecution, &StepExecution) -> JobParameters + Send + Sync,
{
    fn get_job_parameters(&self, job: &JobExecution, step: &StepExecution) -> JobParameters {
        self(job, step)
    }
}

/// Copies the parent's parameters (unless disabled) and adds the listed keys, looked
/// up in the step context first and the job context second
#[derive(Debug, Clone)]
pub struct DefaultJobParametersExtractor {
    keys: Vec<String>,
    use_all_parent_parameters: bool,
}

impl Default for DefaultJobParametersExtractor {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            use_all_parent_parameters: true,
        }
    }
}

impl DefaultJobParametersExtractor {
    pub fn new<K, S>(keys: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            use_all_parent_parameters: true,
        }
    }

    pub fn use_all_parent_parameters(mut self, enabled: bool) -> Self {
        self.use_all_parent_parameters = enabled;
        self
    }
}

impl JobParametersExtractor for DefaultJobParametersExtractor {
    fn get_job_parameters(&self, job: &JobExecution, step: &StepExecution) -> JobParameters {
        let mut builder = if self.use_all_parent_parameters {
            job.parameters.to_builder()
        } else {
            JobParameters::builder()
        };

        for key in &self.keys {
            let value = step
                .execution_context
                .get_value(key)
                .or_else(|| job.execution_context.get_value(key));
            builder = match value {
                Some(serde_json::Value::String(s)) => builder.add_string(key.clone(), s.clone()),
                Some(serde_json::Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
                    (Some(long), _) => builder.add_long(key.clone(), long),
                    (None, Some(double)) => builder.add_double(key.clone(), double),
                    _ => builder,
                },
                _ => builder,
            };
        }
        builder.build()
    }
}

/// Step kind running another job as its unit of work
#[derive(Clone)]
pub struct JobStep {
    pub(crate) job: Arc<Job>,
    pub(crate) extractor: Arc<dyn JobParametersExtractor>,
}

impl JobStep {
    pub fn new(job: Arc<Job>) -> Self {
        Self {
            job,
            extractor: Arc::new(DefaultJobParametersExtractor::default()),
        }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }
}
