use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{ExecutionContext, ExitStatus, JobParameters, StepExecution};
use crate::state_machine::{job_target_state, BatchStatus, JobEvent, StateMachineResult};

/// Logical run of a job, identified by job name and identifying parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    /// Normalized identifying parameters, see [`JobParameters::identity_key`]
    pub job_key: String,
}

/// One attempt at running a job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub step_executions: Vec<StepExecution>,
    pub execution_context: ExecutionContext,
    pub failures: Vec<String>,
}

impl JobExecution {
    pub fn new(id: i64, instance: JobInstance, parameters: JobParameters) -> Self {
        Self {
            id,
            instance,
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    /// Apply a state machine event, stamping start/end times
    pub fn transition(&mut self, event: JobEvent) -> StateMachineResult<BatchStatus> {
        let target = job_target_state(self.status, &event)?;
        let now = Utc::now();
        if target == BatchStatus::Started {
            self.start_time = Some(now);
        }
        if target.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(now);
        }
        if let Some(message) = event.error_message() {
            self.failures.push(message.to_string());
        }
        self.status = target;
        self.last_updated = Some(now);
        Ok(target)
    }

    /// Latest execution of the named step in this job execution
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }

    /// Every failure message recorded on the job and its steps
    pub fn all_failures(&self) -> Vec<String> {
        let mut failures = self.failures.clone();
        for step in &self.step_executions {
            failures.extend(step.failures.iter().cloned());
        }
        failures
    }
}

/// Shared, mutable view of a running job execution.
///
/// Steps running in split branches or partitions all record into the same execution.
/// Guards are only ever held inside the closures passed to [`JobExecutionHandle::with`]
/// and [`JobExecutionHandle::with_mut`], never across an await point.
#[derive(Debug, Clone)]
pub struct JobExecutionHandle {
    inner: Arc<RwLock<JobExecution>>,
    stop_requested: Arc<AtomicBool>,
}

impl JobExecutionHandle {
    pub fn new(execution: JobExecution) -> Self {
        Self {
            inner: Arc::new(RwLock::new(execution)),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.read().id
    }

    pub fn snapshot(&self) -> JobExecution {
        self.inner.read().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&JobExecution) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut JobExecution) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn parameters(&self) -> JobParameters {
        self.inner.read().parameters.clone()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> JobInstance {
        JobInstance {
            id: 1,
            job_name: "import".to_string(),
            job_key: String::new(),
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let mut execution = JobExecution::new(1, instance(), JobParameters::new());
        execution.transition(JobEvent::Start).unwrap();
        assert!(execution.start_time.is_some());
        execution.transition(JobEvent::Complete).unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(execution.end_time.is_some());
    }

    #[test]
    fn test_handle_shares_state() {
        let handle = JobExecutionHandle::new(JobExecution::new(7, instance(), JobParameters::new()));
        let clone = handle.clone();

        clone.with_mut(|job| job.execution_context.put_long("count", 3));
        clone.request_stop();

        assert_eq!(handle.id(), 7);
        assert!(handle.is_stop_requested());
        assert_eq!(handle.with(|job| job.execution_context.get_long("count")), Some(3));
    }

    #[test]
    fn test_latest_step_execution_by_name() {
        let mut execution = JobExecution::new(1, instance(), JobParameters::new());
        execution.step_executions.push(StepExecution::new(1, 1, "a"));
        let mut second = StepExecution::new(2, 1, "a");
        second.failures.push("boom".to_string());
        execution.step_executions.push(second);

        assert_eq!(execution.step_execution("a").map(|s| s.id), Some(2));
        assert_eq!(execution.all_failures(), vec!["boom".to_string()]);
    }
}
