//! # Flows
//!
//! Transition graphs sequencing steps, deciders, splits and nested flows.
//!
//! ## Overview
//!
//! A [`Flow`] is a set of named [`State`]s. Each state wraps one [`FlowNode`] and a
//! list of [`Transition`]s keyed by exit-code pattern. When a node finishes, its exit
//! code picks the next transition:
//!
//! ```text
//!   ┌────────┐  COMPLETED   ┌────────┐
//!   │ stepA  │─────────────►│ stepB  │──► end
//!   └────────┘              └────────┘
//!        │ FAILED           ┌────────┐
//!        └─────────────────►│recovery│──► end
//!        │ *                └────────┘
//!        └──► stop
//! ```
//!
//! Patterns are resolved exact match first, then other glob patterns in
//! registration order, then the bare `*`. An exit code nothing matches is a flow
//! configuration error.
//!
//! ## Node Kinds
//!
//! - **Step**: run through the [`StepExecutor`](crate::step::StepExecutor)
//! - **Decider**: routes on a computed exit code without doing work
//! - **Split**: runs several flows, concurrently or one after another, and joins them
//! - **Flow**: a nested flow whose end status becomes the node's exit code

pub mod builder;
pub mod engine;
pub mod transition;

pub use builder::{FlowBuilder, TransitionBuilder};
pub use engine::FlowEngine;
pub use transition::{pattern_matches, Transition, TransitionTarget};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BatchError, BatchResult};
use crate::models::{ExitStatus, JobExecution, StepExecution};
use crate::state_machine::BatchStatus;
use crate::step::{Step, TaskExecutor};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a built step or flow, kept by its clones
pub(crate) fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Terminal result of executing a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowExecution {
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
}

impl FlowExecution {
    pub fn new(status: BatchStatus, exit_status: ExitStatus) -> Self {
        Self {
            status,
            exit_status,
        }
    }
}

/// Computes the exit code that routes the flow past a decision point.
///
/// `step` is the most recent step execution of the job, if any.
pub trait JobExecutionDecider: Send + Sync {
    fn decide(&self, job: &JobExecution, step: Option<&StepExecution>) -> String;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> String + Send + Sync,
{
    fn decide(&self, job: &JobExecution, step: Option<&StepExecution>) -> String {
        self(job, step)
    }
}

/// Unit of work at a flow state
#[derive(Clone)]
pub enum FlowNode {
    Step(Arc<Step>),
    Decider {
        name: String,
        decider: Arc<dyn JobExecutionDecider>,
    },
    Split {
        name: String,
        flows: Vec<Arc<Flow>>,
        executor: TaskExecutor,
    },
    Flow(Arc<Flow>),
}

impl FlowNode {
    pub fn decider(name: impl Into<String>, decider: impl JobExecutionDecider + 'static) -> Self {
        FlowNode::Decider {
            name: name.into(),
            decider: Arc::new(decider),
        }
    }

    /// Split whose branches run as concurrent tasks
    pub fn split(name: impl Into<String>, flows: Vec<Flow>) -> Self {
        Self::split_with(name, flows, TaskExecutor::Concurrent)
    }

    pub fn split_with(name: impl Into<String>, flows: Vec<Flow>, executor: TaskExecutor) -> Self {
        FlowNode::Split {
            name: name.into(),
            flows: flows.into_iter().map(Arc::new).collect(),
            executor,
        }
    }

    /// State name this node is registered under
    pub fn name(&self) -> &str {
        match self {
            FlowNode::Step(step) => step.name(),
            FlowNode::Decider { name, .. } | FlowNode::Split { name, .. } => name,
            FlowNode::Flow(flow) => flow.name(),
        }
    }

    /// Whether `other` is this node or a clone of it
    pub(crate) fn is_same_node(&self, other: &FlowNode) -> bool {
        match (self, other) {
            (FlowNode::Step(a), FlowNode::Step(b)) => a.id == b.id,
            (FlowNode::Decider { decider: a, .. }, FlowNode::Decider { decider: b, .. }) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (FlowNode::Split { flows: a, .. }, FlowNode::Split { flows: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.id == b.id)
            }
            (FlowNode::Flow(a), FlowNode::Flow(b)) => a.id == b.id,
            _ => false,
        }
    }

    fn step_names(&self) -> Vec<String> {
        match self {
            FlowNode::Step(step) => step.step_names(),
            FlowNode::Decider { .. } => Vec::new(),
            FlowNode::Split { flows, .. } => flows.iter().flat_map(|f| f.step_names()).collect(),
            FlowNode::Flow(flow) => flow.step_names(),
        }
    }
}

impl fmt::Debug for FlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowNode::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            FlowNode::Decider { name, .. } => f.debug_tuple("Decider").field(name).finish(),
            FlowNode::Split { name, flows, executor } => f
                .debug_struct("Split")
                .field("name", name)
                .field("branches", &flows.len())
                .field("executor", executor)
                .finish(),
            FlowNode::Flow(flow) => f.debug_tuple("Flow").field(&flow.name()).finish(),
        }
    }
}

impl From<Step> for FlowNode {
    fn from(step: Step) -> Self {
        FlowNode::Step(Arc::new(step))
    }
}

impl From<Arc<Step>> for FlowNode {
    fn from(step: Arc<Step>) -> Self {
        FlowNode::Step(step)
    }
}

impl From<Flow> for FlowNode {
    fn from(flow: Flow) -> Self {
        FlowNode::Flow(Arc::new(flow))
    }
}

impl From<Arc<Flow>> for FlowNode {
    fn from(flow: Arc<Flow>) -> Self {
        FlowNode::Flow(flow)
    }
}

/// Node plus its outgoing transitions
#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    pub node: FlowNode,
    pub transitions: Vec<Transition>,
}

/// Validated transition graph, built with [`FlowBuilder`]
#[derive(Debug, Clone)]
pub struct Flow {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) start: String,
    pub(crate) states: BTreeMap<String, State>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_state(&self) -> &str {
        &self.start
    }

    pub fn state(&self, name: &str) -> BatchResult<&State> {
        self.states.get(name).ok_or_else(|| {
            BatchError::Flow(format!("flow {} has no state named {name}", self.name))
        })
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    /// Names of every step reachable in this flow, nested flows and splits included
    pub fn step_names(&self) -> Vec<String> {
        self.states
            .values()
            .flat_map(|state| state.node.step_names())
            .collect()
    }

    /// Fail when two steps anywhere in the flow share a name
    pub fn validate_unique_step_names(&self) -> BatchResult<()> {
        let mut seen = HashSet::new();
        for name in self.step_names() {
            if !seen.insert(name.clone()) {
                return Err(BatchError::Configuration(format!(
                    "step name {name} is used more than once in flow {}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
