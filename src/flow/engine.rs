use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, Instrument};

use super::transition::resolve;
use super::{Flow, FlowExecution, FlowNode, TransitionTarget};
use crate::error::{BatchError, BatchResult};
use crate::models::{ExitStatus, JobExecutionHandle, StepExecution};
use crate::state_machine::BatchStatus;
use crate::step::{StepExecutor, TaskExecutor};

/// What a finished node hands to transition resolution
struct NodeResult {
    status: BatchStatus,
    exit_status: ExitStatus,
    /// Node was a step replayed from an earlier execution
    replayed: bool,
}

/// Walks a [`Flow`] from its start state until a terminal transition
#[derive(Debug, Clone)]
pub struct FlowEngine {
    executor: StepExecutor,
}

impl FlowEngine {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    pub fn execute(
        &self,
        flow: Arc<Flow>,
        job: JobExecutionHandle,
    ) -> BoxFuture<'static, BatchResult<FlowExecution>> {
        let engine = self.clone();
        let span = info_span!("flow", flow_name = %flow.name(), job_execution_id = job.id());
        async move { engine.execute_inner(flow, job).await }
            .instrument(span)
            .boxed()
    }

    async fn execute_inner(&self, flow: Arc<Flow>, job: JobExecutionHandle) -> BatchResult<FlowExecution> {
        let mut current = flow.start_state().to_string();
        let mut last_step: Option<StepExecution> = None;
        let mut previous_replayed = false;

        loop {
            if job.is_stop_requested() {
                info!(state = %current, "🛑 FLOW: Stop requested, ending flow");
                return Ok(FlowExecution::new(BatchStatus::Stopped, ExitStatus::stopped()));
            }

            let state = flow.state(&current)?;
            let result = match &state.node {
                FlowNode::Step(step) => {
                    let outcome = self.executor.run(Arc::clone(step), job.clone()).await?;
                    let result = NodeResult {
                        status: outcome.execution.status,
                        exit_status: outcome.execution.exit_status.clone(),
                        replayed: outcome.replayed,
                    };
                    last_step = Some(outcome.execution);
                    result
                }
                FlowNode::Decider { name, decider } => {
                    let exit_code = job.with(|execution| decider.decide(execution, last_step.as_ref()));
                    debug!(decider = %name, exit_code = %exit_code, "🔀 FLOW: Decider routed");
                    NodeResult {
                        status: BatchStatus::Completed,
                        exit_status: ExitStatus::new(exit_code),
                        replayed: previous_replayed,
                    }
                }
                FlowNode::Split {
                    name,
                    flows,
                    executor,
                } => {
                    let joined = self.execute_split(name, flows, *executor, &job).await?;
                    last_step = job.with(|execution| execution.step_executions.last().cloned());
                    NodeResult {
                        status: joined.status,
                        exit_status: joined.exit_status,
                        replayed: false,
                    }
                }
                FlowNode::Flow(nested) => {
                    let finished = self.execute(Arc::clone(nested), job.clone()).await?;
                    NodeResult {
                        status: finished.status,
                        exit_status: finished.exit_status,
                        replayed: false,
                    }
                }
            };

            if result.status == BatchStatus::Stopped {
                info!(state = %current, "🛑 FLOW: Node stopped, ending flow");
                return Ok(FlowExecution::new(BatchStatus::Stopped, result.exit_status));
            }

            let transition = resolve(&state.transitions, &result.exit_status).ok_or_else(|| {
                BatchError::Flow(format!(
                    "flow {}: no transition from state {} matches exit code {}",
                    flow.name(),
                    current,
                    result.exit_status.exit_code
                ))
            })?;
            debug!(
                from = %current,
                exit_code = %result.exit_status.exit_code,
                pattern = %transition.pattern,
                to = %transition.target,
                "➡️ FLOW: Transition"
            );

            match &transition.target {
                TransitionTarget::Node(next) => {
                    current = next.clone();
                    previous_replayed = result.replayed;
                }
                TransitionTarget::End(exit_code) => {
                    let exit_status = ExitStatus::new(
                        exit_code.clone().unwrap_or_else(|| ExitStatus::COMPLETED.to_string()),
                    );
                    return Ok(FlowExecution::new(BatchStatus::Completed, exit_status));
                }
                TransitionTarget::Fail => {
                    let exit_status = result.exit_status.replace_exit_code(ExitStatus::FAILED);
                    return Ok(FlowExecution::new(BatchStatus::Failed, exit_status));
                }
                // A stop reached again after its step was replayed means the stop already
                // happened in an earlier execution
                TransitionTarget::Stop if result.replayed => {
                    return Ok(FlowExecution::new(BatchStatus::Completed, ExitStatus::completed()));
                }
                TransitionTarget::StopAndRestart(next) if result.replayed => {
                    current = next.clone();
                    previous_replayed = false;
                }
                TransitionTarget::Stop | TransitionTarget::StopAndRestart(_) => {
                    return Ok(FlowExecution::new(BatchStatus::Stopped, ExitStatus::stopped()));
                }
            }
        }
    }

    /// Run every branch to the end, then fold their statuses: FAILED beats STOPPED
    /// beats COMPLETED. A branch error is reported once all branches finished.
    async fn execute_split(
        &self,
        name: &str,
        flows: &[Arc<Flow>],
        executor: TaskExecutor,
        job: &JobExecutionHandle,
    ) -> BatchResult<FlowExecution> {
        debug!(split = %name, branches = flows.len(), "🔀 FLOW: Entering split");
        let mut results = Vec::with_capacity(flows.len());
        match executor {
            TaskExecutor::Sync => {
                for flow in flows {
                    results.push(self.execute(Arc::clone(flow), job.clone()).await);
                }
            }
            TaskExecutor::Concurrent => {
                let mut branches = JoinSet::new();
                for flow in flows {
                    branches.spawn(self.execute(Arc::clone(flow), job.clone()));
                }
                while let Some(joined) = branches.join_next().await {
                    results.push(joined.unwrap_or_else(|join_error| {
                        Err(BatchError::InvalidState(format!(
                            "split {name} branch task failed: {join_error}"
                        )))
                    }));
                }
            }
        }

        let mut status = BatchStatus::Completed;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(branch) => status = status.upgrade_to(branch.status),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        info!(split = %name, status = %status, "🔀 FLOW: Split joined");
        Ok(FlowExecution::new(status, ExitStatus::new(status.to_string())))
    }
}
