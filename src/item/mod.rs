//! # Item Pipeline Traits
//!
//! The reader/processor/writer contracts a chunk-oriented step is assembled from.
//!
//! - [`ItemReader`] returns `Ok(None)` once its input is exhausted.
//! - [`ItemProcessor`] returns `Ok(None)` to filter an item out of the chunk.
//! - [`ItemWriter`] receives each chunk's surviving items in one call.
//!
//! Readers and writers are also [`ItemStream`]s: they are opened with the step's
//! [`ExecutionContext`] before the first chunk, asked to record their position into it
//! at every chunk commit, and closed when the step ends. A reader that stores its
//! position on `update` and honors it on `open` resumes where a failed run stopped.

pub mod processor;
pub mod reader;
pub mod writer;

pub use processor::{FnItemProcessor, PassThroughItemProcessor};
pub use reader::{FnItemReader, IteratorItemReader};
pub use writer::{FnItemWriter, ListItemWriter};

use async_trait::async_trait;

use crate::error::ItemError;
use crate::models::ExecutionContext;

/// Lifecycle hooks for stateful readers and writers
#[async_trait]
pub trait ItemStream: Send {
    async fn open(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    async fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

#[async_trait]
pub trait ItemReader<T: Send>: ItemStream {
    /// Next item, or `None` at end of input
    async fn read(&mut self) -> Result<Option<T>, ItemError>;
}

#[async_trait]
pub trait ItemProcessor<I: Send, O: Send>: Send + Sync {
    /// Transform an item, or `None` to filter it
    async fn process(&self, item: I) -> Result<Option<O>, ItemError>;
}

#[async_trait]
pub trait ItemWriter<T: Send + Sync>: ItemStream {
    async fn write(&mut self, items: &[T]) -> Result<(), ItemError>;
}
