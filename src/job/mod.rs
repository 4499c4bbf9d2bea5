//! # Jobs
//!
//! Job definitions and the orchestrator that runs them.
//!
//! ## Overview
//!
//! A [`Job`] is a named root [`Flow`] plus parameter validation, an optional
//! parameter incrementer and job-level listeners. [`JobOrchestrator`] turns a job and
//! a set of [`JobParameters`](crate::models::JobParameters) into a recorded
//! [`JobExecution`](crate::models::JobExecution):
//!
//! ```text
//! validate ──► resolve instance ──► restart checks ──► create execution
//!                                                         │
//!      persist ◄── after_job ◄── flow engine ◄── before_job
//! ```
//!
//! Business failures are recorded on the returned execution. Only invalid parameters,
//! configuration problems and restart conflicts surface as errors.

pub mod metadata;
pub mod orchestrator;
pub mod parameters;

pub use metadata::DeleteMetadataJobBuilder;
pub use orchestrator::JobOrchestrator;
pub use parameters::{
    ClearRunIdIncrementer, CompositeJobParametersValidator, DefaultJobParametersValidator,
    JobParametersIncrementer, JobParametersValidator, RunIdIncrementer, RUN_ID_KEY,
};

use std::fmt;
use std::sync::Arc;

use crate::error::{BatchError, BatchResult};
use crate::flow::{Flow, FlowBuilder, FlowNode};
use crate::listener::JobExecutionListener;

/// Executable job definition
#[derive(Clone)]
pub struct Job {
    pub(crate) name: String,
    pub(crate) flow: Arc<Flow>,
    pub(crate) validator: Option<Arc<dyn JobParametersValidator>>,
    pub(crate) incrementer: Option<Arc<dyn JobParametersIncrementer>>,
    pub(crate) listeners: Vec<Arc<dyn JobExecutionListener>>,
    pub(crate) restartable: bool,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn has_incrementer(&self) -> bool {
        self.incrementer.is_some()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.flow.step_names()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("flow", &self.flow.name())
            .field("restartable", &self.restartable)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Builds a [`Job`] from a linear `start`/`next` chain or from a prebuilt flow
pub struct JobBuilder {
    name: String,
    chain: Option<FlowBuilder>,
    flow: Option<Flow>,
    validator: Option<Arc<dyn JobParametersValidator>>,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    restartable: bool,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: None,
            flow: None,
            validator: None,
            incrementer: None,
            listeners: Vec::new(),
            restartable: true,
        }
    }

    pub fn start(mut self, node: impl Into<FlowNode>) -> Self {
        self.chain = Some(FlowBuilder::new(self.name.clone()).start(node));
        self
    }

    pub fn next(mut self, node: impl Into<FlowNode>) -> Self {
        let chain = self
            .chain
            .take()
            .unwrap_or_else(|| FlowBuilder::new(self.name.clone()));
        self.chain = Some(chain.next(node));
        self
    }

    /// Use a prebuilt flow as the job's root flow
    pub fn flow(mut self, flow: Flow) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn validator(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn incrementer(mut self, incrementer: impl JobParametersIncrementer + 'static) -> Self {
        self.incrementer = Some(Arc::new(incrementer));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn JobExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// A non-restartable job refuses to run again for an instance that already has
    /// an execution
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn build(self) -> BatchResult<Job> {
        let flow = match (self.flow, self.chain) {
            (Some(_), Some(_)) => {
                return Err(BatchError::Configuration(format!(
                    "job {} has both a flow and a start/next chain",
                    self.name
                )))
            }
            (Some(flow), None) => {
                flow.validate_unique_step_names()?;
                flow
            }
            (None, Some(chain)) => chain.build()?,
            (None, None) => {
                return Err(BatchError::Configuration(format!(
                    "job {} has no steps",
                    self.name
                )))
            }
        };

        Ok(Job {
            name: self.name,
            flow: Arc::new(flow),
            validator: self.validator,
            incrementer: self.incrementer,
            listeners: self.listeners,
            restartable: self.restartable,
        })
    }
}
