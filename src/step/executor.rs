use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use super::partition::aggregate_workers;
use super::{PartitionStep, Step, StepContext, StepKind, StepRunStatus, TaskExecutor};
use crate::error::{BatchError, BatchResult, StepError, StepResult};
use crate::flow::FlowEngine;
use crate::job::JobOrchestrator;
use crate::logging::{log_error, log_step_operation};
use crate::models::{ExecutionContext, ExitStatus, JobExecutionHandle, StepExecution};
use crate::state_machine::{BatchStatus, StepEvent};

use super::EngineServices;

/// Result of handing a step to the executor
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub execution: StepExecution,
    /// The step had already completed for this job instance and was not run again;
    /// `execution` is the earlier record
    pub replayed: bool,
}

/// Runs a step through its full lifecycle: restart decision, start limit, listeners,
/// the step's work and the final persisted status
#[derive(Debug, Clone)]
pub struct StepExecutor {
    services: EngineServices,
}

impl StepExecutor {
    pub fn new(services: EngineServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn run(
        &self,
        step: Arc<Step>,
        job: JobExecutionHandle,
    ) -> BoxFuture<'static, BatchResult<StepOutcome>> {
        self.run_seeded(step, job, None)
    }

    /// Run a step whose first execution starts from `seed` instead of an empty context
    pub fn run_seeded(
        &self,
        step: Arc<Step>,
        job: JobExecutionHandle,
        seed: Option<ExecutionContext>,
    ) -> BoxFuture<'static, BatchResult<StepOutcome>> {
        let executor = self.clone();
        let span = info_span!(
            "step",
            step_name = %step.name(),
            kind = step.kind().kind_name(),
            job_execution_id = job.id()
        );
        async move { executor.run_inner(step, job, seed).await }
            .instrument(span)
            .boxed()
    }

    async fn run_inner(
        &self,
        step: Arc<Step>,
        job: JobExecutionHandle,
        seed: Option<ExecutionContext>,
    ) -> BatchResult<StepOutcome> {
        let repository = Arc::clone(&self.services.repository);
        let (instance, job_execution_id) = job.with(|j| (j.instance.clone(), j.id));

        // Executions recorded earlier in this same job execution do not count as a
        // previous run
        let last = repository
            .get_last_step_execution(&instance, step.name())
            .await?
            .filter(|last| last.job_execution_id != job_execution_id);

        if let Some(last) = &last {
            match last.status {
                BatchStatus::Unknown => {
                    return Err(BatchError::JobRestart(format!(
                        "step {} ended in an unknown state in execution {}; fix its status before restarting",
                        step.name(),
                        last.job_execution_id
                    )));
                }
                BatchStatus::Completed if !step.allow_start_if_complete => {
                    return Ok(self.replay(&step, job_execution_id, last.clone()));
                }
                BatchStatus::Abandoned => {
                    return Ok(self.replay(&step, job_execution_id, last.clone()));
                }
                _ => {}
            }
        }

        let start_count = repository
            .get_step_execution_count(&instance, step.name())
            .await?;
        if start_count >= step.start_limit {
            return Err(BatchError::StartLimitExceeded {
                step_name: step.name().to_string(),
                limit: step.start_limit,
            });
        }

        let context = match last {
            Some(last) if last.status != BatchStatus::Completed => {
                debug!(previous = last.id, "♻️ STEP: Restarting from previous execution context");
                last.execution_context
            }
            _ => seed.unwrap_or_default(),
        };

        let mut execution = repository
            .create_step_execution(job_execution_id, step.name())
            .await?;
        execution.execution_context = context;
        execution.transition(StepEvent::Start)?;
        repository.update_step_execution(&execution).await?;
        log_step_operation(
            "start",
            Some(job_execution_id),
            Some(execution.id),
            step.name(),
            "STARTED",
            None,
        );

        let mut before_error = None;
        for listener in &step.listeners {
            if let Err(error) = listener.before_step(&mut execution, &job).await {
                before_error = Some(StepError::Listener(error));
                break;
            }
        }

        let context = StepContext::new(self.services.clone(), job.clone(), execution);
        let result = match before_error {
            Some(error) => Err(error),
            None => self.execute_kind(&step, &context).await,
        };

        let mut execution = context.snapshot();
        match result {
            Ok(StepRunStatus::Completed) => {
                execution.exit_status = execution.exit_status.and(&ExitStatus::completed());
                execution.transition(StepEvent::Complete)?;
            }
            Ok(StepRunStatus::Stopped) | Err(StepError::Interrupted) => {
                execution.exit_status = execution.exit_status.and(&ExitStatus::stopped());
                execution.transition(StepEvent::Stop)?;
            }
            Err(error) => {
                let message = error.to_string();
                log_error("step_executor", "execute", &message, Some(step.name()));
                execution.exit_status = execution
                    .exit_status
                    .and(&ExitStatus::with_description(ExitStatus::FAILED, message.clone()));
                execution.transition(StepEvent::fail_with_error(message))?;
            }
        }

        for listener in step.listeners.iter().rev() {
            match listener.after_step(&mut execution, &job).await {
                Ok(Some(exit_status)) => {
                    execution.exit_status = execution.exit_status.and(&exit_status);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "⚠️ STEP: after_step listener failed");
                    execution.status = execution.status.upgrade_to(BatchStatus::Failed);
                    execution.exit_status = execution.exit_status.and(&ExitStatus::with_description(
                        ExitStatus::FAILED,
                        error.to_string(),
                    ));
                    execution.failures.push(error.to_string());
                }
            }
        }

        repository.update_step_execution(&execution).await?;
        job.with_mut(|j| j.step_executions.push(execution.clone()));
        log_step_operation(
            "finish",
            Some(job_execution_id),
            Some(execution.id),
            step.name(),
            &execution.status.to_string(),
            Some(&execution.exit_status.to_string()),
        );

        Ok(StepOutcome {
            execution,
            replayed: false,
        })
    }

    fn replay(&self, step: &Step, job_execution_id: i64, last: StepExecution) -> StepOutcome {
        info!(
            previous_job_execution_id = last.job_execution_id,
            status = %last.status,
            "⏭️ STEP: Already complete for this instance, not running again"
        );
        log_step_operation(
            "replay",
            Some(job_execution_id),
            Some(last.id),
            step.name(),
            &last.status.to_string(),
            None,
        );
        StepOutcome {
            execution: last,
            replayed: true,
        }
    }

    async fn execute_kind(&self, step: &Step, context: &StepContext) -> StepResult<StepRunStatus> {
        match &step.kind {
            StepKind::Tasklet(tasklet) => tasklet.run(context).await,
            StepKind::Chunk(chunk) => chunk.run(context).await,
            StepKind::Flow(flow) => {
                let result = FlowEngine::new(self.clone())
                    .execute(Arc::clone(flow), context.job.clone())
                    .await
                    .map_err(|error| StepError::Execution(error.to_string()))?;
                context.with_execution(|e| e.exit_status = e.exit_status.and(&result.exit_status));
                match result.status {
                    BatchStatus::Completed => Ok(StepRunStatus::Completed),
                    BatchStatus::Stopped => Ok(StepRunStatus::Stopped),
                    status => Err(StepError::Execution(format!(
                        "flow {} ended with status {status}",
                        flow.name()
                    ))),
                }
            }
            StepKind::Job(job_step) => {
                let parent = context.job.snapshot();
                let parameters = job_step
                    .extractor
                    .get_job_parameters(&parent, &context.snapshot());
                let child = JobOrchestrator::from_services(self.services.clone())
                    .run(Arc::clone(&job_step.job), parameters)
                    .await
                    .map_err(|error| StepError::Execution(error.to_string()))?;
                context.with_execution(|e| e.exit_status = e.exit_status.and(&child.exit_status));
                if child.status.is_unsuccessful() {
                    return Err(StepError::Execution(format!(
                        "job {} (execution {}) ended with status {}",
                        child.job_name(),
                        child.id,
                        child.status
                    )));
                }
                Ok(if child.status == BatchStatus::Stopped {
                    StepRunStatus::Stopped
                } else {
                    StepRunStatus::Completed
                })
            }
            StepKind::Partition(partition) => self.run_partitions(partition, context).await,
        }
    }

    async fn run_partitions(
        &self,
        partition: &PartitionStep,
        context: &StepContext,
    ) -> StepResult<StepRunStatus> {
        let workers = partition
            .worker_steps()
            .map_err(|error| StepError::Execution(error.to_string()))?;
        debug!(workers = workers.len(), "🔀 PARTITION: Dispatching worker steps");

        let mut outcomes = Vec::with_capacity(workers.len());
        match partition.executor {
            TaskExecutor::Sync => {
                for (worker, seed) in workers {
                    outcomes.push(self.run_seeded(worker, context.job.clone(), Some(seed)).await);
                }
            }
            TaskExecutor::Concurrent => {
                let mut running = JoinSet::new();
                for (worker, seed) in workers {
                    running.spawn(self.run_seeded(worker, context.job.clone(), Some(seed)));
                }
                while let Some(joined) = running.join_next().await {
                    outcomes.push(joined.unwrap_or_else(|join_error| {
                        Err(BatchError::InvalidState(format!(
                            "partition worker task failed: {join_error}"
                        )))
                    }));
                }
            }
        }

        let mut executed = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(outcome) if outcome.replayed => {}
                Ok(outcome) => executed.push(outcome.execution),
                Err(error) => errors.push(error.to_string()),
            }
        }

        context.with_execution(|manager| aggregate_workers(manager, &executed));

        let worst = executed
            .iter()
            .fold(BatchStatus::Completed, |worst, worker| worst.upgrade_to(worker.status));
        let failed: Vec<&str> = executed
            .iter()
            .filter(|worker| worker.status.is_unsuccessful())
            .map(|worker| worker.step_name.as_str())
            .collect();

        if !errors.is_empty() || !failed.is_empty() {
            let mut reasons = errors;
            reasons.extend(failed.iter().map(|name| format!("worker {name} failed")));
            return Err(StepError::Execution(reasons.join("; ")));
        }
        Ok(if worst == BatchStatus::Stopped {
            StepRunStatus::Stopped
        } else {
            StepRunStatus::Completed
        })
    }
}
