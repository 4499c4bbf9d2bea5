use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{ExceptionHandler, StepContext, StepRunStatus, TaskExecutor};
use crate::chunk::ChunkHandler;
use crate::error::{StepError, StepResult};

/// Step kind looping a chunk pipeline until its reader is exhausted
#[derive(Clone)]
pub struct ChunkStep {
    pub(crate) handler: Arc<dyn ChunkHandler>,
    pub(crate) executor: TaskExecutor,
    pub(crate) throttle_limit: usize,
    pub(crate) exception_handler: ExceptionHandler,
}

impl ChunkStep {
    pub fn new(handler: Arc<dyn ChunkHandler>) -> Self {
        Self {
            handler,
            executor: TaskExecutor::Sync,
            throttle_limit: 4,
            exception_handler: ExceptionHandler::default(),
        }
    }

    pub fn handler(&self) -> &Arc<dyn ChunkHandler> {
        &self.handler
    }

    pub(crate) async fn run(&self, context: &StepContext) -> StepResult<StepRunStatus> {
        self.handler.open(context).await?;
        let result = match self.executor {
            TaskExecutor::Sync => self.run_sequential(context).await,
            TaskExecutor::Concurrent => self.run_concurrent(context).await,
        };
        let closed = self.handler.close().await;
        let status = result?;
        closed?;
        Ok(status)
    }

    async fn run_sequential(&self, context: &StepContext) -> StepResult<StepRunStatus> {
        let mut chunk_number = 0_u64;
        let mut suppressed = 0_u32;
        loop {
            if context.is_stop_requested() {
                debug!(chunks = chunk_number, "🛑 CHUNK: Stop requested, leaving at chunk boundary");
                return Ok(StepRunStatus::Stopped);
            }

            chunk_number += 1;
            match self.handler.process_chunk(context, chunk_number).await {
                Ok(result) if result.exhausted => return Ok(StepRunStatus::Completed),
                Ok(_) => {}
                Err(error) => {
                    if !self.exception_handler.suppresses(&error, suppressed) {
                        return Err(error);
                    }
                    suppressed += 1;
                }
            }
        }
    }

    /// Keep up to `throttle_limit` chunks in flight until one of them exhausts the
    /// reader, then wait for the rest
    async fn run_concurrent(&self, context: &StepContext) -> StepResult<StepRunStatus> {
        let throttle_limit = self.throttle_limit;
        let mut in_flight = JoinSet::new();
        let mut chunk_number = 0_u64;
        let mut suppressed = 0_u32;
        let mut exhausted = false;
        let mut stopped = false;
        let mut failure: Option<StepError> = None;

        loop {
            while !exhausted && !stopped && failure.is_none() && in_flight.len() < throttle_limit {
                if context.is_stop_requested() {
                    stopped = true;
                    break;
                }
                chunk_number += 1;
                let handler = Arc::clone(&self.handler);
                let context = context.clone();
                let number = chunk_number;
                in_flight.spawn(async move { handler.process_chunk(&context, number).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(result)) => exhausted |= result.exhausted,
                Ok(Err(error)) => {
                    if self.exception_handler.suppresses(&error, suppressed) {
                        suppressed += 1;
                    } else if failure.is_none() {
                        failure = Some(error);
                    }
                }
                Err(join_error) => {
                    warn!(error = %join_error, "⚠️ CHUNK: Chunk task did not complete");
                    if failure.is_none() {
                        failure = Some(StepError::Execution(format!(
                            "chunk task failed: {join_error}"
                        )));
                    }
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None if stopped => Ok(StepRunStatus::Stopped),
            None => Ok(StepRunStatus::Completed),
        }
    }
}
