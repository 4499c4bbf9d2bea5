#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batch Core Rust
//!
//! Chunk-oriented batch processing engine: read, process and write items in
//! transactional chunks, survive item failures through retry and skip rules, and
//! compose steps into flows and restartable jobs.
//!
//! ## Architecture
//!
//! ```text
//! JobOrchestrator ── validates parameters, resolves instance, restart checks
//!       │
//!   FlowEngine ───── walks states, resolves transitions on exit codes
//!       │
//!  StepExecutor ──── lifecycle, listeners, restart limits, persistence
//!       │
//!  ┌────┴─────────┬──────────────┬───────────────┬─────────────┐
//! tasklet    chunk processor   nested flow     child job    partitions
//!                 │
//!         FaultTolerancePolicy ── retry / skip / fatal decisions
//! ```
//!
//! Execution state lives behind two collaborators: a [`repository::JobRepository`]
//! that stores instances and executions, and a [`transaction::TransactionManager`]
//! that brackets every chunk. In-memory implementations of both ship with the crate.
//!
//! ## Module Organization
//!
//! - [`chunk`] - Chunk processor: read, process, write and scan on failure
//! - [`policy`] - Retry and skip decisions, error classification, backoff
//! - [`step`] - Step kinds, builders and the step executor
//! - [`flow`] - Flow definitions, transitions and the flow engine
//! - [`job`] - Jobs, parameter validation, incrementers and the orchestrator
//! - [`models`] - Executions, parameters, exit statuses and execution contexts
//! - [`state_machine`] - Job and step status transitions
//! - [`config`] - Layered engine configuration
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batch_core::item::{IteratorItemReader, ListItemWriter, PassThroughItemProcessor};
//! use batch_core::job::{JobBuilder, JobOrchestrator};
//! use batch_core::models::JobParameters;
//! use batch_core::repository::InMemoryJobRepository;
//! use batch_core::step::StepBuilder;
//! use batch_core::transaction::ResourcelessTransactionManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = ListItemWriter::new();
//! let step = StepBuilder::new("copy")
//!     .chunk::<u32, u32>(3)
//!     .reader(IteratorItemReader::new("numbers", 1..=10))
//!     .processor(PassThroughItemProcessor)
//!     .writer(writer.clone())
//!     .build()?;
//! let job = JobBuilder::new("copyJob").start(step).build()?;
//!
//! let orchestrator = JobOrchestrator::new(
//!     Arc::new(InMemoryJobRepository::new()),
//!     Arc::new(ResourcelessTransactionManager::new()),
//! );
//! let execution = orchestrator.run(Arc::new(job), JobParameters::new()).await?;
//! println!("{} wrote {:?}", execution.status, writer.items());
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod error;
pub mod flow;
pub mod item;
pub mod job;
pub mod listener;
pub mod logging;
pub mod models;
pub mod policy;
pub mod repository;
pub mod state_machine;
pub mod step;
pub mod transaction;

pub use config::EngineConfig;
pub use error::{BatchError, BatchResult, ErrorKind, ItemError, ListenerError, StepError};
pub use flow::{Flow, FlowBuilder, FlowEngine};
pub use job::{Job, JobBuilder, JobOrchestrator};
pub use models::{ExecutionContext, ExitStatus, JobExecution, JobParameters, StepExecution};
pub use state_machine::BatchStatus;
pub use step::{Step, StepBuilder, StepExecutor};
