use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ExceptionHandler, RepeatStatus, RepeatTemplate, StepContext, StepRunStatus, TaskletContext};
use crate::error::{ItemError, Stage, StepError, StepResult};
use crate::models::StepContribution;

/// Single unit of step work, called repeatedly while it returns
/// [`RepeatStatus::Continuable`]. Every call runs in its own transaction and its
/// contribution is committed to the step execution afterwards.
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError>;
}

/// Tasklet backed by a synchronous closure
pub struct FnTasklet<F> {
    execute_fn: F,
}

impl<F> FnTasklet<F>
where
    F: Fn(&mut StepContribution, &TaskletContext) -> Result<RepeatStatus, ItemError> + Send + Sync,
{
    pub fn new(execute_fn: F) -> Self {
        Self { execute_fn }
    }
}

#[async_trait]
impl<F> Tasklet for FnTasklet<F>
where
    F: Fn(&mut StepContribution, &TaskletContext) -> Result<RepeatStatus, ItemError> + Send + Sync,
{
    async fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError> {
        (self.execute_fn)(contribution, context)
    }
}

/// Step kind repeating a tasklet
#[derive(Clone)]
pub struct TaskletStep {
    pub(crate) tasklet: Arc<dyn Tasklet>,
    pub(crate) repeat: RepeatTemplate,
    pub(crate) exception_handler: ExceptionHandler,
}

impl TaskletStep {
    pub fn new(tasklet: Arc<dyn Tasklet>) -> Self {
        Self {
            tasklet,
            repeat: RepeatTemplate::default(),
            exception_handler: ExceptionHandler::default(),
        }
    }

    pub(crate) async fn run(&self, context: &StepContext) -> StepResult<StepRunStatus> {
        let tasklet_context = TaskletContext::new(context.clone());
        let transaction_manager = &context.services.transaction_manager;
        let mut iterations = 0_u64;
        let mut suppressed = 0_u32;

        loop {
            if context.is_stop_requested() {
                debug!(iterations, "🛑 TASKLET: Stop requested, leaving at iteration boundary");
                return Ok(StepRunStatus::Stopped);
            }

            let transaction = transaction_manager.begin().await?;
            let mut contribution = StepContribution::new();
            let result = self.tasklet.execute(&mut contribution, &tasklet_context).await;
            iterations += 1;

            let status = match result {
                Ok(status) => {
                    if let Err(error) = context.commit_contribution(&contribution).await {
                        transaction_manager.rollback(transaction).await?;
                        context.record_rollback();
                        return Err(error);
                    }
                    transaction_manager.commit(transaction).await?;
                    status
                }
                Err(error) => {
                    transaction_manager.rollback(transaction).await?;
                    context.record_rollback();
                    let error = StepError::Fatal {
                        stage: Stage::Tasklet,
                        error,
                    };
                    if !self.exception_handler.suppresses(&error, suppressed) {
                        return Err(error);
                    }
                    suppressed += 1;
                    RepeatStatus::Continuable
                }
            };

            if self.repeat.is_complete(status, iterations) {
                debug!(iterations, "✅ TASKLET: Finished");
                return Ok(StepRunStatus::Completed);
            }
        }
    }
}
