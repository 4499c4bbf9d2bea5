use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::{ChunkHandler, ChunkResult};
use crate::error::{ItemError, Stage, StepError, StepResult};
use crate::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::listener::{ChunkContext, ChunkListener, RetryListener, SkipListener};
use crate::models::StepContribution;
use crate::policy::{Decision, FatalReason, FaultTolerancePolicy};
use crate::step::{SkipCounter, StepContext};
use crate::transaction::TransactionId;

/// Items skipped in the current chunk, reported to skip listeners after commit
struct ChunkSkips<I, O> {
    read: Vec<ItemError>,
    process: Vec<(I, ItemError)>,
    write: Vec<(O, ItemError)>,
}

impl<I, O> Default for ChunkSkips<I, O> {
    fn default() -> Self {
        Self {
            read: Vec::new(),
            process: Vec::new(),
            write: Vec::new(),
        }
    }
}

struct ChunkState<I, O> {
    contribution: StepContribution,
    skips: ChunkSkips<I, O>,
    /// Step-wide skip budget shared with concurrently running chunks
    skip_counter: SkipCounter,
    /// Skips this chunk reserved from `skip_counter`
    reserved_skips: u64,
}

impl<I, O> ChunkState<I, O> {
    fn new(skip_counter: SkipCounter) -> Self {
        Self {
            contribution: StepContribution::new(),
            skips: ChunkSkips::default(),
            skip_counter,
            reserved_skips: 0,
        }
    }

    fn skips_so_far(&self) -> u64 {
        self.skip_counter.current()
    }

    /// Policy decision for `error`. A skip only stands once it is reserved from the
    /// step-wide budget.
    fn decide(&mut self, policy: &FaultTolerancePolicy, error: &ItemError, retries: u32) -> Decision {
        match policy.decide(error, retries, self.skips_so_far()) {
            Decision::Skip if self.skip_counter.try_reserve(u64::from(policy.skip_limit)) => {
                self.reserved_skips += 1;
                Decision::Skip
            }
            Decision::Skip => Decision::Fatal(FatalReason::SkipLimitExceeded),
            other => other,
        }
    }

    fn release_skips(&mut self) {
        self.skip_counter.release(self.reserved_skips);
        self.reserved_skips = 0;
    }
}

enum Processed<O> {
    Output(O),
    Filtered,
    Skipped,
}

/// Reader/processor/writer pipeline with optional retry and skip handling.
///
/// Reader and writer sit behind async mutexes so concurrently running chunks of the
/// same step share them safely. Each `read` takes the reader lock for one item only,
/// so items of one chunk are read in reader order while chunks may interleave.
pub struct ChunkProcessor<I, O> {
    reader: Arc<AsyncMutex<Box<dyn ItemReader<I>>>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Arc<AsyncMutex<Box<dyn ItemWriter<O>>>>,
    chunk_size: usize,
    policy: Option<FaultTolerancePolicy>,
    chunk_listeners: Vec<Arc<dyn ChunkListener>>,
    skip_listeners: Vec<Arc<dyn SkipListener<I, O>>>,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
}

impl<I, O> ChunkProcessor<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(
        reader: Box<dyn ItemReader<I>>,
        processor: Arc<dyn ItemProcessor<I, O>>,
        writer: Box<dyn ItemWriter<O>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            reader: Arc::new(AsyncMutex::new(reader)),
            processor,
            writer: Arc::new(AsyncMutex::new(writer)),
            chunk_size: chunk_size.max(1),
            policy: None,
            chunk_listeners: Vec::new(),
            skip_listeners: Vec::new(),
            retry_listeners: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: FaultTolerancePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_chunk_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.chunk_listeners.push(listener);
        self
    }

    pub fn with_skip_listener(mut self, listener: Arc<dyn SkipListener<I, O>>) -> Self {
        self.skip_listeners.push(listener);
        self
    }

    pub fn with_retry_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    async fn before_retry(
        &self,
        state: &mut ChunkState<I, O>,
        policy: &FaultTolerancePolicy,
        stage: Stage,
        attempt: u32,
        error: &ItemError,
    ) -> StepResult<()> {
        state.contribution.retry_count += 1;
        warn!(
            stage = %stage,
            attempt = attempt,
            retry_limit = policy.retry_limit,
            error = %error,
            "🔁 RETRY: Retrying failed {stage}"
        );
        for listener in &self.retry_listeners {
            listener.on_retry(stage, attempt, error).await?;
        }
        policy.backoff.pause(attempt).await;
        Ok(())
    }

    async fn read_item(&self, state: &mut ChunkState<I, O>) -> StepResult<Option<I>> {
        let mut retries = 0_u32;
        loop {
            let result = self.reader.lock().await.read().await;
            let error = match result {
                Ok(Some(item)) => {
                    state.contribution.increment_read_count();
                    return Ok(Some(item));
                }
                Ok(None) => return Ok(None),
                Err(error) => error,
            };

            let Some(policy) = &self.policy else {
                return Err(StepError::Fatal {
                    stage: Stage::Read,
                    error,
                });
            };
            match state.decide(policy, &error, retries) {
                Decision::Retry => {
                    retries += 1;
                    self.before_retry(state, policy, Stage::Read, retries, &error)
                        .await?;
                }
                Decision::Skip => {
                    state.contribution.read_skip_count += 1;
                    warn!(error = %error, skips = state.skips_so_far(), "⏭️ SKIP: Skipping unreadable item");
                    state.skips.read.push(error);
                    retries = 0;
                }
                Decision::Fatal(reason) => {
                    return Err(policy.fatal_error(reason, Stage::Read, error));
                }
            }
        }
    }

    async fn process_item(&self, item: &I, state: &mut ChunkState<I, O>) -> StepResult<Processed<O>> {
        let mut retries = 0_u32;
        loop {
            let error = match self.processor.process(item.clone()).await {
                Ok(Some(output)) => return Ok(Processed::Output(output)),
                Ok(None) => return Ok(Processed::Filtered),
                Err(error) => error,
            };

            let Some(policy) = &self.policy else {
                return Err(StepError::Fatal {
                    stage: Stage::Process,
                    error,
                });
            };
            match state.decide(policy, &error, retries) {
                Decision::Retry => {
                    retries += 1;
                    self.before_retry(state, policy, Stage::Process, retries, &error)
                        .await?;
                }
                Decision::Skip => {
                    state.contribution.process_skip_count += 1;
                    warn!(error = %error, skips = state.skips_so_far(), "⏭️ SKIP: Skipping item in process");
                    state.skips.process.push((item.clone(), error));
                    return Ok(Processed::Skipped);
                }
                Decision::Fatal(reason) => {
                    return Err(policy.fatal_error(reason, Stage::Process, error));
                }
            }
        }
    }

    /// Process `items`, returning each surviving input with its output and the number
    /// of filtered items
    async fn process_items(
        &self,
        items: &[I],
        state: &mut ChunkState<I, O>,
    ) -> StepResult<(Vec<(I, O)>, u64)> {
        let mut outputs = Vec::with_capacity(items.len());
        let mut filtered = 0;
        for item in items {
            match self.process_item(item, state).await? {
                Processed::Output(output) => outputs.push((item.clone(), output)),
                Processed::Filtered => filtered += 1,
                Processed::Skipped => {}
            }
        }
        Ok((outputs, filtered))
    }

    async fn process_and_write(&self, items: Vec<I>, state: &mut ChunkState<I, O>) -> StepResult<()> {
        let (mut outputs, mut filtered) = self.process_items(&items, state).await?;
        let mut retries = 0_u32;

        while !outputs.is_empty() {
            let chunk: Vec<O> = outputs.iter().map(|(_, output)| output.clone()).collect();
            let result = self.writer.lock().await.write(&chunk).await;
            let error = match result {
                Ok(()) => {
                    state.contribution.increment_write_count(chunk.len() as u64);
                    break;
                }
                Err(error) => error,
            };

            let Some(policy) = &self.policy else {
                return Err(StepError::Fatal {
                    stage: Stage::Write,
                    error,
                });
            };
            match state.decide(policy, &error, retries) {
                Decision::Retry => {
                    retries += 1;
                    self.before_retry(state, policy, Stage::Write, retries, &error)
                        .await?;
                    if !policy.processor_non_transactional {
                        let inputs: Vec<I> = outputs.into_iter().map(|(input, _)| input).collect();
                        let (reprocessed, refiltered) = self.process_items(&inputs, state).await?;
                        outputs = reprocessed;
                        filtered += refiltered;
                    }
                }
                Decision::Skip => {
                    self.scan(outputs, state, policy).await?;
                    break;
                }
                Decision::Fatal(reason) => {
                    return Err(policy.fatal_error(reason, Stage::Write, error));
                }
            }
        }

        state.contribution.filter_count += filtered;
        Ok(())
    }

    /// Write items one at a time to isolate and skip the ones the writer rejects
    async fn scan(
        &self,
        outputs: Vec<(I, O)>,
        state: &mut ChunkState<I, O>,
        policy: &FaultTolerancePolicy,
    ) -> StepResult<()> {
        info!(items = outputs.len(), "🔍 SCAN: Writing chunk item by item to isolate failure");

        for (input, output) in outputs {
            let output = if policy.processor_non_transactional {
                output
            } else {
                match self.process_item(&input, state).await? {
                    Processed::Output(output) => output,
                    Processed::Filtered => {
                        state.contribution.filter_count += 1;
                        continue;
                    }
                    Processed::Skipped => continue,
                }
            };

            let result = self
                .writer
                .lock()
                .await
                .write(std::slice::from_ref(&output))
                .await;
            let Err(error) = result else {
                state.contribution.increment_write_count(1);
                continue;
            };

            match state.decide(policy, &error, policy.retry_limit) {
                Decision::Skip => {
                    state.contribution.write_skip_count += 1;
                    warn!(error = %error, skips = state.skips_so_far(), "⏭️ SKIP: Skipping item in write");
                    state.skips.write.push((output, error));
                }
                Decision::Retry => {
                    return Err(policy.fatal_error(FatalReason::RetryExhausted, Stage::Write, error));
                }
                Decision::Fatal(reason) => {
                    return Err(policy.fatal_error(reason, Stage::Write, error));
                }
            }
        }
        Ok(())
    }

    /// Fill the chunk from the reader and push it through processor and writer.
    /// Returns the number of items read and whether the reader is exhausted.
    async fn fill_and_write(&self, state: &mut ChunkState<I, O>) -> StepResult<(usize, bool)> {
        let mut items = Vec::with_capacity(self.chunk_size);
        let mut exhausted = false;
        while items.len() < self.chunk_size {
            match self.read_item(state).await? {
                Some(item) => items.push(item),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        let items_read = items.len();
        if !items.is_empty() {
            self.process_and_write(items, state).await?;
        }
        Ok((items_read, exhausted))
    }

    /// Record stream positions and counters, then persist the step execution
    async fn commit(
        &self,
        context: &StepContext,
        state: &ChunkState<I, O>,
        transaction: TransactionId,
    ) -> StepResult<()> {
        let _commit = context.lock_commits().await;

        let mut execution_context = context.with_execution(|s| s.execution_context.clone());
        self.reader
            .lock()
            .await
            .update(&mut execution_context)
            .await
            .map_err(|error| StepError::Fatal {
                stage: Stage::Read,
                error,
            })?;
        self.writer
            .lock()
            .await
            .update(&mut execution_context)
            .await
            .map_err(|error| StepError::Fatal {
                stage: Stage::Write,
                error,
            })?;

        let snapshot = context.with_execution(|s| {
            s.apply(&state.contribution);
            s.execution_context = execution_context;
            s.clone()
        });
        context
            .services
            .repository
            .update_step_execution(&snapshot)
            .await?;
        context
            .services
            .transaction_manager
            .commit(transaction)
            .await
    }

    async fn rollback(
        &self,
        context: &StepContext,
        chunk: &ChunkContext,
        transaction: TransactionId,
        error: &StepError,
    ) -> StepResult<()> {
        context
            .services
            .transaction_manager
            .rollback(transaction)
            .await?;
        context.record_rollback();
        warn!(
            step_name = %chunk.step_name,
            chunk = chunk.chunk_number,
            error = %error,
            "↩️ CHUNK: Rolled back"
        );
        for listener in &self.chunk_listeners {
            listener.after_chunk_error(chunk, error).await?;
        }
        Ok(())
    }

    async fn notify_skips(&self, skips: &ChunkSkips<I, O>) -> StepResult<()> {
        for listener in &self.skip_listeners {
            for error in &skips.read {
                listener.on_skip_in_read(error).await?;
            }
            for (item, error) in &skips.process {
                listener.on_skip_in_process(item, error).await?;
            }
            for (item, error) in &skips.write {
                listener.on_skip_in_write(item, error).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<I, O> ChunkHandler for ChunkProcessor<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn policy(&self) -> Option<&FaultTolerancePolicy> {
        self.policy.as_ref()
    }

    async fn open(&self, context: &StepContext) -> StepResult<()> {
        let mut execution_context = context.with_execution(|s| s.execution_context.clone());
        self.reader
            .lock()
            .await
            .open(&mut execution_context)
            .await
            .map_err(|error| StepError::Fatal {
                stage: Stage::Read,
                error,
            })?;
        self.writer
            .lock()
            .await
            .open(&mut execution_context)
            .await
            .map_err(|error| StepError::Fatal {
                stage: Stage::Write,
                error,
            })?;
        context.with_execution(|s| s.execution_context = execution_context);
        Ok(())
    }

    async fn process_chunk(&self, context: &StepContext, chunk_number: u64) -> StepResult<ChunkResult> {
        let chunk = ChunkContext {
            step_name: context.step_name(),
            step_execution_id: context.step_execution_id(),
            job_execution_id: context.job.id(),
            chunk_number,
        };
        for listener in &self.chunk_listeners {
            listener.before_chunk(&chunk).await?;
        }

        let transaction = context.services.transaction_manager.begin().await?;
        let mut state = ChunkState::new(context.skip_counter());

        let outcome = match self.fill_and_write(&mut state).await {
            Ok(outcome) => self
                .commit(context, &state, transaction)
                .await
                .map(|()| outcome),
            Err(error) => Err(error),
        };
        let (items_read, exhausted) = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                state.release_skips();
                self.rollback(context, &chunk, transaction, &error).await?;
                return Err(error);
            }
        };

        debug!(
            step_name = %chunk.step_name,
            chunk = chunk_number,
            read = state.contribution.read_count,
            written = state.contribution.write_count,
            filtered = state.contribution.filter_count,
            skipped = state.contribution.skip_count(),
            exhausted = exhausted,
            "📦 CHUNK: Committed"
        );

        self.notify_skips(&state.skips).await?;
        for listener in &self.chunk_listeners {
            listener.after_chunk(&chunk).await?;
        }

        Ok(ChunkResult {
            items_read,
            exhausted,
            contribution: state.contribution,
        })
    }

    async fn close(&self) -> StepResult<()> {
        let reader_closed = self.reader.lock().await.close().await;
        let writer_closed = self.writer.lock().await.close().await;
        reader_closed.map_err(|error| StepError::Fatal {
            stage: Stage::Read,
            error,
        })?;
        writer_closed.map_err(|error| StepError::Fatal {
            stage: Stage::Write,
            error,
        })
    }
}
