//! Fluent builders for every step kind.
//!
//! ```rust,ignore
//! let step = StepBuilder::new("load")
//!     .config(&config)
//!     .chunk::<String, Record>(100)
//!     .reader(reader)
//!     .processor(parser)
//!     .writer(writer)
//!     .fault_tolerant()
//!     .skip(kinds::PARSE)
//!     .retry(kinds::TIMEOUT)
//!     .retry_limit(3)
//!     .build()?;
//! ```

use std::sync::Arc;

use super::{
    ChunkStep, DefaultJobParametersExtractor, ExceptionHandler, JobParametersExtractor,
    JobStep, PartitionStep, Partitioner, RepeatTemplate, Step, StepFactory, StepKind, TaskExecutor,
    Tasklet, TaskletStep,
};
use crate::chunk::ChunkProcessor;
use crate::config::EngineConfig;
use crate::error::{BatchError, BatchResult, ErrorKind};
use crate::flow::{next_node_id, Flow};
use crate::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::job::Job;
use crate::listener::{ChunkListener, RetryListener, SkipListener, StepExecutionListener};
use crate::policy::{BackoffPolicy, FaultTolerancePolicy};

/// Settings shared by every step kind
pub struct StepBuilder {
    name: String,
    allow_start_if_complete: bool,
    start_limit: u32,
    listeners: Vec<Arc<dyn StepExecutionListener>>,
    config: EngineConfig,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let config = EngineConfig::default();
        Self {
            name: name.into(),
            allow_start_if_complete: config.step.allow_start_if_complete,
            start_limit: config.step.start_limit,
            listeners: Vec::new(),
            config,
        }
    }

    /// Take step, chunk and fault tolerance defaults from an engine configuration
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.allow_start_if_complete = config.step.allow_start_if_complete;
        self.start_limit = config.step.start_limit;
        self.config = config.clone();
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn start_limit(mut self, limit: u32) -> Self {
        self.start_limit = limit;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StepExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn tasklet(self, tasklet: impl Tasklet + 'static) -> TaskletStepBuilder {
        TaskletStepBuilder {
            base: self,
            tasklet: TaskletStep::new(Arc::new(tasklet)),
        }
    }

    /// Chunk-oriented step committing every `size` items
    pub fn chunk<I, O>(self, size: usize) -> ChunkStepBuilder<I, O>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let throttle_limit = self.config.chunk.throttle_limit;
        ChunkStepBuilder {
            base: self,
            chunk_size: size,
            reader: None,
            processor: None,
            writer: None,
            policy: None,
            chunk_listeners: Vec::new(),
            skip_listeners: Vec::new(),
            retry_listeners: Vec::new(),
            executor: TaskExecutor::Sync,
            throttle_limit,
            exception_handler: ExceptionHandler::default(),
        }
    }

    /// Chunk-oriented step using the configured chunk size
    pub fn default_chunk<I, O>(self) -> ChunkStepBuilder<I, O>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let size = self.config.chunk.size;
        self.chunk(size)
    }

    /// Step running a nested flow
    pub fn flow(self, flow: Flow) -> Step {
        self.into_step(StepKind::Flow(Arc::new(flow)))
    }

    /// Step running a child job
    pub fn job(self, job: Arc<Job>) -> JobStepBuilder {
        JobStepBuilder {
            base: self,
            job: JobStep::new(job),
        }
    }

    /// Manager step fanning out to one worker step per partition
    pub fn partitioner(
        self,
        partitioner: impl Partitioner + 'static,
        factory: impl StepFactory + 'static,
    ) -> PartitionStepBuilder {
        PartitionStepBuilder {
            base: self,
            partition: PartitionStep::new(Arc::new(partitioner), Arc::new(factory)),
        }
    }

    fn into_step(self, kind: StepKind) -> Step {
        Step {
            id: next_node_id(),
            name: self.name,
            kind,
            allow_start_if_complete: self.allow_start_if_complete,
            start_limit: self.start_limit,
            listeners: self.listeners,
        }
    }
}

pub struct TaskletStepBuilder {
    base: StepBuilder,
    tasklet: TaskletStep,
}

impl TaskletStepBuilder {
    pub fn repeat(mut self, repeat: RepeatTemplate) -> Self {
        self.tasklet.repeat = repeat;
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.tasklet.exception_handler = handler;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StepExecutionListener>) -> Self {
        self.base = self.base.listener(listener);
        self
    }

    pub fn build(self) -> Step {
        self.base.into_step(StepKind::Tasklet(self.tasklet))
    }
}

pub struct ChunkStepBuilder<I, O> {
    base: StepBuilder,
    chunk_size: usize,
    reader: Option<Box<dyn ItemReader<I>>>,
    processor: Option<Arc<dyn ItemProcessor<I, O>>>,
    writer: Option<Box<dyn ItemWriter<O>>>,
    policy: Option<FaultTolerancePolicy>,
    chunk_listeners: Vec<Arc<dyn ChunkListener>>,
    skip_listeners: Vec<Arc<dyn SkipListener<I, O>>>,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
    executor: TaskExecutor,
    throttle_limit: usize,
    exception_handler: ExceptionHandler,
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn reader(mut self, reader: impl ItemReader<I> + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn processor(mut self, processor: impl ItemProcessor<I, O> + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn writer(mut self, writer: impl ItemWriter<O> + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Route item failures through a retry/skip policy seeded from the configured
    /// limits
    pub fn fault_tolerant(self) -> Self {
        self.update_policy(|policy| policy)
    }

    /// Replace the whole fault tolerance policy
    pub fn fault_tolerance(mut self, policy: FaultTolerancePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn retry(self, kind: ErrorKind) -> Self {
        self.update_policy(|policy| policy.retry(kind))
    }

    pub fn no_retry(self, kind: ErrorKind) -> Self {
        self.update_policy(|policy| policy.no_retry(kind))
    }

    pub fn skip(self, kind: ErrorKind) -> Self {
        self.update_policy(|policy| policy.skip(kind))
    }

    pub fn no_skip(self, kind: ErrorKind) -> Self {
        self.update_policy(|policy| policy.no_skip(kind))
    }

    pub fn retry_limit(self, limit: u32) -> Self {
        self.update_policy(|policy| policy.retry_limit(limit))
    }

    pub fn skip_limit(self, limit: u32) -> Self {
        self.update_policy(|policy| policy.skip_limit(limit))
    }

    pub fn backoff(self, backoff: BackoffPolicy) -> Self {
        self.update_policy(|policy| policy.backoff(backoff))
    }

    pub fn processor_non_transactional(self) -> Self {
        self.update_policy(FaultTolerancePolicy::processor_non_transactional)
    }

    pub fn chunk_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.chunk_listeners.push(listener);
        self
    }

    pub fn skip_listener(mut self, listener: Arc<dyn SkipListener<I, O>>) -> Self {
        self.skip_listeners.push(listener);
        self
    }

    pub fn retry_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StepExecutionListener>) -> Self {
        self.base = self.base.listener(listener);
        self
    }

    pub fn task_executor(mut self, executor: TaskExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn throttle_limit(mut self, limit: usize) -> Self {
        self.throttle_limit = limit;
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn build(self) -> BatchResult<Step> {
        let name = self.base.name.clone();
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {name}: chunk size must be at least 1"
            )));
        }
        if self.throttle_limit == 0 {
            return Err(BatchError::Configuration(format!(
                "step {name}: throttle limit must be at least 1"
            )));
        }
        let missing = |part: &str| {
            BatchError::Configuration(format!("step {name}: chunk step needs a {part}"))
        };
        let reader = self.reader.ok_or_else(|| missing("reader"))?;
        let processor = self.processor.ok_or_else(|| missing("processor"))?;
        let writer = self.writer.ok_or_else(|| missing("writer"))?;

        let mut processor = ChunkProcessor::new(reader, processor, writer, self.chunk_size);
        if let Some(policy) = self.policy {
            processor = processor.with_policy(policy);
        }
        for listener in self.chunk_listeners {
            processor = processor.with_chunk_listener(listener);
        }
        for listener in self.skip_listeners {
            processor = processor.with_skip_listener(listener);
        }
        for listener in self.retry_listeners {
            processor = processor.with_retry_listener(listener);
        }

        let mut chunk = ChunkStep::new(Arc::new(processor));
        chunk.executor = self.executor;
        chunk.throttle_limit = self.throttle_limit;
        chunk.exception_handler = self.exception_handler;
        Ok(self.base.into_step(StepKind::Chunk(chunk)))
    }

    fn update_policy(
        mut self,
        update: impl FnOnce(FaultTolerancePolicy) -> FaultTolerancePolicy,
    ) -> Self {
        let policy = self
            .policy
            .take()
            .unwrap_or_else(|| FaultTolerancePolicy::from_config(&self.base.config.fault_tolerance));
        self.policy = Some(update(policy));
        self
    }
}

pub struct JobStepBuilder {
    base: StepBuilder,
    job: JobStep,
}

impl JobStepBuilder {
    pub fn extractor(mut self, extractor: impl JobParametersExtractor + 'static) -> Self {
        self.job.extractor = Arc::new(extractor);
        self
    }

    /// Shorthand for a [`DefaultJobParametersExtractor`] over `keys`
    pub fn parameter_keys<K, S>(self, keys: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extractor(DefaultJobParametersExtractor::new(keys))
    }

    pub fn build(self) -> Step {
        self.base.into_step(StepKind::Job(self.job))
    }
}

pub struct PartitionStepBuilder {
    base: StepBuilder,
    partition: PartitionStep,
}

impl PartitionStepBuilder {
    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.partition.grid_size = grid_size;
        self
    }

    pub fn task_executor(mut self, executor: TaskExecutor) -> Self {
        self.partition.executor = executor;
        self
    }

    pub fn build(self) -> BatchResult<Step> {
        if self.partition.grid_size == 0 {
            return Err(BatchError::Configuration(format!(
                "step {}: grid size must be at least 1",
                self.base.name
            )));
        }
        Ok(self.base.into_step(StepKind::Partition(self.partition)))
    }
}
