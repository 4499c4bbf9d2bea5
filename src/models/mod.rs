//! # Execution Models
//!
//! Plain data records describing what a job is being run with and what happened when
//! it ran.
//!
//! ## Core Types
//!
//! - [`JobParameters`]: typed, immutable parameter set identifying a [`JobInstance`]
//! - [`JobExecution`] / [`StepExecution`]: run records with status, timestamps, counters
//! - [`StepContribution`]: per-chunk counts folded into a step execution at commit
//! - [`ExecutionContext`]: restart state persisted with job and step executions
//! - [`ExitStatus`]: free-form exit code driving flow transitions

pub mod execution_context;
pub mod exit_status;
pub mod job_execution;
pub mod job_parameters;
pub mod step_execution;

pub use execution_context::{namespaced_key, ExecutionContext, NamespacedContext};
pub use exit_status::ExitStatus;
pub use job_execution::{JobExecution, JobExecutionHandle, JobInstance};
pub use job_parameters::{JobParameter, JobParameters, JobParametersBuilder, ParameterValue};
pub use step_execution::{StepContribution, StepExecution};
