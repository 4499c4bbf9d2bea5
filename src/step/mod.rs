//! # Steps
//!
//! Independent phases of a job and the executor that runs them.
//!
//! ## Overview
//!
//! A [`Step`] couples a name, restart settings and listeners with one of five
//! kinds of work:
//!
//! | Kind        | Unit of work                                          |
//! |-------------|-------------------------------------------------------|
//! | Tasklet     | A [`Tasklet`] repeated until it reports finished      |
//! | Chunk       | Read-process-write chunks until the reader is done    |
//! | Flow        | A nested [`Flow`](crate::flow::Flow)                  |
//! | Job         | A whole child [`Job`](crate::job::Job)                |
//! | Partition   | One worker step per partition, optionally in parallel |
//!
//! ## Execution Lifecycle
//!
//! ```text
//! restart check ──► start limit ──► STARTED ──► before_step ──► work ──► after_step ──► persist
//!      │                                                          │
//!      └── completed earlier: replayed, not re-run                └── COMPLETED / STOPPED / FAILED
//! ```
//!
//! [`StepExecutor`] owns this lifecycle. Steps are built with [`StepBuilder`].

pub mod builder;
pub mod chunk_step;
pub mod context;
pub mod executor;
pub mod job_step;
pub mod partition;
pub mod repeat;
pub mod tasklet;

pub use builder::{
    ChunkStepBuilder, JobStepBuilder, PartitionStepBuilder, StepBuilder, TaskletStepBuilder,
};
pub use chunk_step::ChunkStep;
pub use context::{EngineServices, SkipCounter, StepContext, TaskletContext};
pub use executor::{StepExecutor, StepOutcome};
pub use job_step::{DefaultJobParametersExtractor, JobParametersExtractor, JobStep};
pub use partition::{Partitioner, PartitionStep, SimplePartitioner, StepFactory};
pub use repeat::{ExceptionHandler, RepeatStatus, RepeatTemplate, TaskExecutor};
pub use tasklet::{FnTasklet, Tasklet, TaskletStep};

use std::fmt;
use std::sync::Arc;

use crate::flow::Flow;
use crate::listener::StepExecutionListener;

/// Work performed by a step
#[derive(Clone)]
pub enum StepKind {
    Tasklet(TaskletStep),
    Chunk(ChunkStep),
    Flow(Arc<Flow>),
    Job(JobStep),
    Partition(PartitionStep),
}

impl StepKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StepKind::Tasklet(_) => "tasklet",
            StepKind::Chunk(_) => "chunk",
            StepKind::Flow(_) => "flow",
            StepKind::Job(_) => "job",
            StepKind::Partition(_) => "partition",
        }
    }
}

/// Named, restartable phase of a job
#[derive(Clone)]
pub struct Step {
    /// Shared by clones, so a flow can tell a re-referenced step from a namesake
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) kind: StepKind,
    pub(crate) allow_start_if_complete: bool,
    pub(crate) start_limit: u32,
    pub(crate) listeners: Vec<Arc<dyn StepExecutionListener>>,
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    pub fn start_limit(&self) -> u32 {
        self.start_limit
    }

    /// Names of this step and every step nested in it through flows
    pub fn step_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        if let StepKind::Flow(flow) = &self.kind {
            names.extend(flow.step_names());
        }
        names
    }

    pub(crate) fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind.kind_name())
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .field("start_limit", &self.start_limit)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// How the work of a step ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRunStatus {
    Completed,
    Stopped,
}
