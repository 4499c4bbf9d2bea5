//! # Job Repository
//!
//! Persistence collaborator the engine records every execution through. Storage is
//! external: the engine only talks to the [`JobRepository`] trait.
//! [`InMemoryJobRepository`] is the bundled implementation used for single-process
//! runs and tests.
//!
//! [`JobMetadataStore`] is the narrower contract used by the metadata purge job to
//! find and delete old job instances.

pub mod in_memory;

pub use in_memory::InMemoryJobRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BatchResult;
use crate::models::{
    ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution,
};

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Instance identified by job name and identifying parameters
    async fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobInstance>>;

    async fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<JobInstance>;

    /// Create a new execution of `instance`, seeded with `context`
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
        context: ExecutionContext,
    ) -> BatchResult<JobExecution>;

    async fn update_job_execution(&self, execution: &JobExecution) -> BatchResult<()>;

    async fn get_job_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>>;

    /// Most recent execution of the instance identified by name and parameters
    async fn get_last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobExecution>>;

    /// All executions of an instance, oldest first
    async fn get_job_executions(&self, instance: &JobInstance) -> BatchResult<Vec<JobExecution>>;

    async fn create_step_execution(
        &self,
        job_execution_id: i64,
        step_name: &str,
    ) -> BatchResult<StepExecution>;

    async fn update_step_execution(&self, execution: &StepExecution) -> BatchResult<()>;

    /// Most recent execution of the named step across all executions of `instance`
    async fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> BatchResult<Option<StepExecution>>;

    /// Number of times the named step was started for `instance`
    async fn get_step_execution_count(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> BatchResult<u32>;

    /// Parameters of the most recently created instance of the job
    async fn get_last_job_parameters(&self, job_name: &str) -> BatchResult<Option<JobParameters>>;
}

/// Metadata maintenance operations
#[async_trait]
pub trait JobMetadataStore: Send + Sync {
    /// Highest instance id that has an execution created before `base_date`
    async fn max_job_instance_id_created_before(
        &self,
        base_date: DateTime<Utc>,
    ) -> BatchResult<Option<i64>>;

    async fn min_job_instance_id(&self) -> BatchResult<Option<i64>>;

    /// Delete instances with `low <= id <= high` together with their executions,
    /// returning the number of instances removed
    async fn delete_job_instances_in_range(&self, low: i64, high: i64) -> BatchResult<u64>;
}
