use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{ItemStream, ItemWriter};
use crate::error::ItemError;

/// Writer collecting every written chunk in a shared buffer.
///
/// Clones share the buffer, so a caller can keep one clone to inspect what the step
/// wrote.
#[derive(Debug)]
pub struct ListItemWriter<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> Clone for ListItemWriter<T> {
    fn clone(&self) -> Self {
        Self {
            chunks: Arc::clone(&self.chunks),
        }
    }
}

impl<T> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> ListItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Written chunks in commit order
    pub fn chunks(&self) -> Vec<Vec<T>> {
        self.chunks.lock().clone()
    }

    /// All written items, flattened
    pub fn items(&self) -> Vec<T> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().iter().map(Vec::len).collect()
    }
}

impl<T: Send + Sync> ItemStream for ListItemWriter<T> {}

#[async_trait]
impl<T: Clone + Send + Sync> ItemWriter<T> for ListItemWriter<T> {
    async fn write(&mut self, items: &[T]) -> Result<(), ItemError> {
        self.chunks.lock().push(items.to_vec());
        Ok(())
    }
}

/// Writer backed by a closure
pub struct FnItemWriter<F> {
    write_fn: F,
}

impl<F> FnItemWriter<F> {
    pub fn new(write_fn: F) -> Self {
        Self { write_fn }
    }
}

impl<F: Send> ItemStream for FnItemWriter<F> {}

#[async_trait]
impl<T, F> ItemWriter<T> for FnItemWriter<F>
where
    T: Send + Sync,
    F: FnMut(&[T]) -> Result<(), ItemError> + Send,
{
    async fn write(&mut self, items: &[T]) -> Result<(), ItemError> {
        (self.write_fn)(items)
    }
}
