use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Step, TaskExecutor};
use crate::error::BatchResult;
use crate::models::{ExecutionContext, StepExecution};

/// Splits the input of a partitioned step into named execution contexts
pub trait Partitioner: Send + Sync {
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext>;
}

impl<F> Partitioner for F
where
    F: Fn(usize) -> BTreeMap<String, ExecutionContext> + Send + Sync,
{
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext> {
        self(grid_size)
    }
}

/// `grid_size` partitions named `partition0..`, each with an empty context
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePartitioner;

impl Partitioner for SimplePartitioner {
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext> {
        (0..grid_size)
            .map(|i| (format!("partition{i}"), ExecutionContext::new()))
            .collect()
    }
}

/// Builds the worker step for one partition. Each partition gets its own step so
/// readers and writers are never shared between workers.
pub trait StepFactory: Send + Sync {
    fn create_step(&self, partition: &str, context: &ExecutionContext) -> BatchResult<Step>;
}

impl<F> StepFactory for F
where
    F: Fn(&str, &ExecutionContext) -> BatchResult<Step> + Send + Sync,
{
    fn create_step(&self, partition: &str, context: &ExecutionContext) -> BatchResult<Step> {
        self(partition, context)
    }
}

/// Step kind fanning work out to local worker steps.
///
/// Workers are named `"{worker step}:{partition}"` and start with their partition's
/// context. The manager step ends with the most severe worker status and carries the
/// summed worker counters.
#[derive(Clone)]
pub struct PartitionStep {
    pub(crate) partitioner: Arc<dyn Partitioner>,
    pub(crate) factory: Arc<dyn StepFactory>,
    pub(crate) grid_size: usize,
    pub(crate) executor: TaskExecutor,
}

impl PartitionStep {
    pub fn new(partitioner: Arc<dyn Partitioner>, factory: Arc<dyn StepFactory>) -> Self {
        Self {
            partitioner,
            factory,
            grid_size: 1,
            executor: TaskExecutor::Concurrent,
        }
    }

    /// Worker steps paired with their partition contexts
    pub(crate) fn worker_steps(&self) -> BatchResult<Vec<(Arc<Step>, ExecutionContext)>> {
        self.partitioner
            .partition(self.grid_size)
            .into_iter()
            .map(|(partition, context)| {
                let step = self.factory.create_step(&partition, &context)?;
                let name = format!("{}:{partition}", step.name());
                Ok((Arc::new(step.renamed(name)), context))
            })
            .collect()
    }
}

/// Add worker counters into the manager's execution
pub(crate) fn aggregate_workers(manager: &mut StepExecution, workers: &[StepExecution]) {
    for worker in workers {
        manager.read_count += worker.read_count;
        manager.write_count += worker.write_count;
        manager.filter_count += worker.filter_count;
        manager.commit_count += worker.commit_count;
        manager.rollback_count += worker.rollback_count;
        manager.read_skip_count += worker.read_skip_count;
        manager.process_skip_count += worker.process_skip_count;
        manager.write_skip_count += worker.write_skip_count;
        manager.retry_count += worker.retry_count;
    }
}
