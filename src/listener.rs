//! # Listeners
//!
//! Callback hooks for job, step, chunk, skip and retry events. Listeners are registered
//! explicitly on builders and every callback has a no-op default, so implementors only
//! override what they need.
//!
//! A listener that returns an error never gets retried or skipped: the step or job it
//! is attached to fails. The only callback whose return value steers execution is
//! [`StepExecutionListener::after_step`], which may override the step's exit status.

use async_trait::async_trait;

use crate::error::{BatchResult, ItemError, ListenerError, Stage, StepError};
use crate::flow::pattern_matches;
use crate::models::{ExitStatus, JobExecutionHandle, StepExecution};

#[async_trait]
pub trait JobExecutionListener: Send + Sync {
    async fn before_job(&self, _job: &JobExecutionHandle) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called after the job's flow finished, whatever its outcome
    async fn after_job(&self, _job: &JobExecutionHandle) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[async_trait]
pub trait StepExecutionListener: Send + Sync {
    async fn before_step(
        &self,
        _step: &mut StepExecution,
        _job: &JobExecutionHandle,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called after the step ran, also when it failed. A returned exit status is
    /// combined into the step's exit status.
    async fn after_step(
        &self,
        _step: &mut StepExecution,
        _job: &JobExecutionHandle,
    ) -> Result<Option<ExitStatus>, ListenerError> {
        Ok(None)
    }
}

/// Position of a chunk within its step execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkContext {
    pub step_name: String,
    pub step_execution_id: i64,
    pub job_execution_id: i64,
    pub chunk_number: u64,
}

#[async_trait]
pub trait ChunkListener: Send + Sync {
    async fn before_chunk(&self, _chunk: &ChunkContext) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called after the chunk's transaction committed
    async fn after_chunk(&self, _chunk: &ChunkContext) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called after the chunk's transaction rolled back
    async fn after_chunk_error(
        &self,
        _chunk: &ChunkContext,
        _error: &StepError,
    ) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Skip notifications, delivered once per skipped item after the chunk committed
#[async_trait]
pub trait SkipListener<I: Send + Sync, O: Send + Sync>: Send + Sync {
    async fn on_skip_in_read(&self, _error: &ItemError) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn on_skip_in_process(&self, _item: &I, _error: &ItemError) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn on_skip_in_write(&self, _item: &O, _error: &ItemError) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[async_trait]
pub trait RetryListener: Send + Sync {
    /// Called before every re-execution of a failed stage. `attempt` counts retries of
    /// the current item starting at 1.
    async fn on_retry(
        &self,
        _stage: Stage,
        _attempt: u32,
        _error: &ItemError,
    ) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Copies selected step context keys into the job context when the step ends with one
/// of the configured exit codes, so later steps can read them.
#[derive(Debug, Clone)]
pub struct ExecutionContextPromotionListener {
    keys: Vec<String>,
    statuses: Vec<String>,
    strict: bool,
}

impl ExecutionContextPromotionListener {
    pub fn new<K, S>(keys: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            statuses: vec![ExitStatus::COMPLETED.to_string()],
            strict: false,
        }
    }

    /// Exit code patterns (`*` and `?` wildcards allowed) that trigger promotion
    pub fn with_statuses<K, S>(mut self, statuses: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Fail the step when a promoted key is missing from its context
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validate the listener's own configuration
    pub fn validate(&self) -> BatchResult<()> {
        if self.keys.is_empty() {
            return Err(crate::error::BatchError::Configuration(
                "execution context promotion listener needs at least one key".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StepExecutionListener for ExecutionContextPromotionListener {
    async fn after_step(
        &self,
        step: &mut StepExecution,
        job: &JobExecutionHandle,
    ) -> Result<Option<ExitStatus>, ListenerError> {
        let exit_code = step.exit_status.exit_code.as_str();
        if !self
            .statuses
            .iter()
            .any(|pattern| pattern_matches(pattern, exit_code))
        {
            return Ok(None);
        }

        let mut promoted = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            match step.execution_context.get_value(key) {
                Some(value) => promoted.push((key.clone(), value.clone())),
                None if self.strict => {
                    return Err(ListenerError::new(
                        "after_step",
                        format!("key '{key}' not found in context of step {}", step.step_name),
                    ))
                }
                None => {}
            }
        }

        job.with_mut(|execution| {
            for (key, value) in promoted {
                execution.execution_context.put_value(key, value);
            }
        });
        Ok(None)
    }
}
