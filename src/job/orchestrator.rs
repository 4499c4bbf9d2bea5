use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::Job;
use crate::error::{BatchError, BatchResult};
use crate::flow::{FlowEngine, FlowExecution};
use crate::logging::{log_error, log_job_operation};
use crate::models::{ExecutionContext, ExitStatus, JobExecution, JobExecutionHandle, JobParameters};
use crate::repository::JobRepository;
use crate::state_machine::{BatchStatus, JobEvent};
use crate::step::{EngineServices, StepExecutor};
use crate::transaction::TransactionManager;

/// Top-level driver turning a [`Job`] and its parameters into a recorded execution.
///
/// Executions started through an orchestrator are tracked while they run, so the
/// same orchestrator can [`stop`](JobOrchestrator::stop) them.
#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    services: EngineServices,
    running: Arc<DashMap<i64, JobExecutionHandle>>,
}

impl JobOrchestrator {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        transaction_manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self::from_services(EngineServices::new(repository, transaction_manager))
    }

    pub fn from_services(services: EngineServices) -> Self {
        Self {
            services,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Ids of executions currently running through this orchestrator
    pub fn running_executions(&self) -> Vec<i64> {
        self.running.iter().map(|entry| *entry.key()).collect()
    }

    /// Run `job` with `parameters`.
    ///
    /// Returns the finished execution, whatever its status. Errors are reserved for
    /// invalid parameters, restart conflicts and flows with no matching transition.
    #[instrument(skip_all, fields(job_name = %job.name()))]
    pub async fn run(&self, job: Arc<Job>, parameters: JobParameters) -> BatchResult<JobExecution> {
        if let Some(validator) = &job.validator {
            validator.validate(&parameters)?;
        }

        let repository = Arc::clone(&self.services.repository);
        let (instance, context) = match repository
            .get_last_job_execution(job.name(), &parameters)
            .await?
        {
            Some(last) => {
                self.check_restart(&job, &parameters, &last)?;
                info!(
                    instance_id = last.instance.id,
                    previous_execution_id = last.id,
                    previous_status = %last.status,
                    "♻️ JOB: Restarting job instance"
                );
                (last.instance, last.execution_context)
            }
            None => {
                let instance = match repository.get_job_instance(job.name(), &parameters).await? {
                    Some(instance) => instance,
                    None => repository.create_job_instance(job.name(), &parameters).await?,
                };
                (instance, ExecutionContext::new())
            }
        };

        let execution = repository
            .create_job_execution(&instance, &parameters, context)
            .await?;
        let handle = JobExecutionHandle::new(execution);
        let execution_id = handle.id();
        self.running.insert(execution_id, handle.clone());

        let result = self.execute(&job, &handle).await;
        self.running.remove(&execution_id);
        result
    }

    /// Run `job` with the parameters its incrementer derives from the last instance
    pub async fn start_next_instance(&self, job: Arc<Job>) -> BatchResult<JobExecution> {
        let incrementer = job.incrementer.clone().ok_or_else(|| {
            BatchError::Configuration(format!(
                "job {} has no parameters incrementer",
                job.name()
            ))
        })?;
        let previous = self
            .services
            .repository
            .get_last_job_parameters(job.name())
            .await?;
        let parameters = incrementer.get_next(previous.as_ref());
        self.run(job, parameters).await
    }

    /// Ask a running execution to stop at its next chunk or tasklet boundary
    pub async fn stop(&self, execution_id: i64) -> BatchResult<()> {
        let handle = self
            .running
            .get(&execution_id)
            .map(|entry| entry.value().clone());
        let Some(handle) = handle else {
            return match self.services.repository.get_job_execution(execution_id).await? {
                Some(_) => Err(BatchError::JobExecutionNotRunning(execution_id)),
                None => Err(BatchError::NoSuchJobExecution(execution_id)),
            };
        };

        handle.request_stop();
        let snapshot = handle.with_mut(|execution| {
            if execution.status != BatchStatus::Stopping {
                execution.transition(JobEvent::RequestStop)?;
            }
            Ok::<_, BatchError>(execution.clone())
        })?;
        self.services.repository.update_job_execution(&snapshot).await?;
        log_job_operation("stop", snapshot.job_name(), Some(execution_id), "STOPPING", None);
        Ok(())
    }

    /// Mark a stopped, failed or unknown execution as abandoned so it is never
    /// restarted
    pub async fn abandon(&self, execution_id: i64) -> BatchResult<JobExecution> {
        let mut execution = self
            .services
            .repository
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(execution_id))?;
        if self.running.contains_key(&execution_id) || execution.status.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning {
                job_name: execution.job_name().to_string(),
                execution_id,
            });
        }

        execution.transition(JobEvent::Abandon)?;
        self.services.repository.update_job_execution(&execution).await?;
        log_job_operation("abandon", execution.job_name(), Some(execution_id), "ABANDONED", None);
        Ok(execution)
    }

    fn check_restart(
        &self,
        job: &Job,
        parameters: &JobParameters,
        last: &JobExecution,
    ) -> BatchResult<()> {
        if !job.restartable {
            return Err(BatchError::JobRestart(format!(
                "job instance of {} already exists and the job is not restartable",
                job.name()
            )));
        }
        if last.status.is_running() {
            return Err(BatchError::JobExecutionAlreadyRunning {
                job_name: job.name().to_string(),
                execution_id: last.id,
            });
        }
        match last.status {
            BatchStatus::Completed | BatchStatus::Abandoned => {
                Err(BatchError::JobInstanceAlreadyComplete {
                    job_name: job.name().to_string(),
                    parameters: parameters.to_string(),
                })
            }
            BatchStatus::Unknown => Err(BatchError::JobRestart(format!(
                "execution {} of {} ended in an unknown state and cannot be restarted",
                last.id,
                job.name()
            ))),
            _ => match last
                .step_executions
                .iter()
                .find(|step| step.status == BatchStatus::Unknown)
            {
                Some(step) => Err(BatchError::JobRestart(format!(
                    "step {} of execution {} ended in an unknown state",
                    step.step_name, last.id
                ))),
                None => Ok(()),
            },
        }
    }

    async fn execute(&self, job: &Job, handle: &JobExecutionHandle) -> BatchResult<JobExecution> {
        let repository = Arc::clone(&self.services.repository);
        let execution_id = handle.id();

        let started = handle.with_mut(|execution| {
            execution.transition(JobEvent::Start)?;
            Ok::<_, BatchError>(execution.clone())
        })?;
        repository.update_job_execution(&started).await?;
        log_job_operation(
            "start",
            job.name(),
            Some(execution_id),
            "STARTED",
            Some(&started.parameters.to_string()),
        );

        let mut before_failure = None;
        for listener in &job.listeners {
            if let Err(error) = listener.before_job(handle).await {
                before_failure = Some(BatchError::from(error));
                break;
            }
        }

        let mut rethrow = None;
        let outcome = match before_failure {
            Some(error) => Err(error),
            None => {
                let engine = FlowEngine::new(StepExecutor::new(self.services.clone()));
                engine.execute(Arc::clone(&job.flow), handle.clone()).await
            }
        };
        match outcome {
            Ok(flow) => handle.with_mut(|execution| finish_from_flow(execution, flow, handle.is_stop_requested()))?,
            Err(error) => {
                log_error("job_orchestrator", "execute", &error.to_string(), Some(job.name()));
                handle.with_mut(|execution| fail(execution, &error.to_string()))?;
                if matches!(error, BatchError::Flow(_)) {
                    rethrow = Some(error);
                }
            }
        }

        for listener in job.listeners.iter().rev() {
            if let Err(error) = listener.after_job(handle).await {
                warn!(error = %error, "⚠️ JOB: after_job listener failed");
                handle.with_mut(|execution| {
                    execution.status = execution.status.upgrade_to(BatchStatus::Failed);
                    execution.exit_status = execution
                        .exit_status
                        .and(&ExitStatus::with_description(ExitStatus::FAILED, error.to_string()));
                    execution.failures.push(error.to_string());
                });
            }
        }

        let finished = handle.snapshot();
        repository.update_job_execution(&finished).await?;
        log_job_operation(
            "finish",
            job.name(),
            Some(execution_id),
            &finished.status.to_string(),
            Some(&finished.exit_status.to_string()),
        );

        match rethrow {
            Some(error) => Err(error),
            None => Ok(finished),
        }
    }
}

/// Map the flow's terminal status onto the job execution
fn finish_from_flow(
    execution: &mut JobExecution,
    flow: FlowExecution,
    stop_requested: bool,
) -> BatchResult<()> {
    match flow.status {
        BatchStatus::Completed if stop_requested => {
            execution.transition(JobEvent::Stop)?;
        }
        BatchStatus::Completed => {
            execution.transition(JobEvent::Complete)?;
        }
        BatchStatus::Stopped => {
            execution.transition(JobEvent::Stop)?;
        }
        BatchStatus::Unknown => {
            execution.status = BatchStatus::Unknown;
            execution.end_time = Some(chrono::Utc::now());
        }
        status => {
            execution.transition(JobEvent::Fail(format!("job flow ended with status {status}")))?;
        }
    }
    execution.exit_status = flow.exit_status;
    Ok(())
}

fn fail(execution: &mut JobExecution, message: &str) -> BatchResult<()> {
    execution.transition(JobEvent::Fail(message.to_string()))?;
    execution.exit_status = ExitStatus::with_description(ExitStatus::FAILED, message);
    Ok(())
}
