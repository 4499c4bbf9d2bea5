//! # Chunk Processing
//!
//! Read-process-write cycles over bounded chunks.
//!
//! ## Overview
//!
//! A chunk is read item by item until it holds `chunk_size` items or the reader is
//! exhausted. Every item goes through the processor, which may filter it, and the
//! surviving outputs are handed to the writer in one call. The chunk is the commit
//! unit: counters, reader/writer positions and the repository record are only updated
//! once the whole chunk went through.
//!
//! ## Fault Tolerance
//!
//! Without a [`FaultTolerancePolicy`] the first item failure rolls the chunk back and
//! fails the step. With one, failures are routed through the policy:
//!
//! - **read**: the read is retried in isolation, or the bad record is skipped and
//!   reading continues
//! - **process**: the item is re-processed, or skipped
//! - **write**: the whole chunk is retried (re-processing its items unless the
//!   processor is marked non-transactional), then scanned item by item to isolate and
//!   skip the bad item
//!
//! Skip listeners are notified only after the chunk committed, once per skipped item.

pub mod processor;

pub use processor::ChunkProcessor;

use async_trait::async_trait;

use crate::error::StepResult;
use crate::models::StepContribution;
use crate::policy::FaultTolerancePolicy;
use crate::step::StepContext;

/// Outcome of one committed chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkResult {
    /// Items successfully read into this chunk, skipped reads excluded
    pub items_read: usize,
    /// Reader signalled end of data while filling this chunk
    pub exhausted: bool,
    pub contribution: StepContribution,
}

impl ChunkResult {
    /// True when the reader is done and no item made it into the chunk
    pub fn is_empty(&self) -> bool {
        self.exhausted && self.items_read == 0
    }
}

/// Type-erased chunk pipeline driven by a chunk-oriented step
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    fn chunk_size(&self) -> usize;

    fn policy(&self) -> Option<&FaultTolerancePolicy>;

    /// Open reader and writer with the step's execution context
    async fn open(&self, context: &StepContext) -> StepResult<()>;

    /// Read, process, write and commit one chunk
    async fn process_chunk(&self, context: &StepContext, chunk_number: u64) -> StepResult<ChunkResult>;

    /// Close reader and writer
    async fn close(&self) -> StepResult<()>;
}
