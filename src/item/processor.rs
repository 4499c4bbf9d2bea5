use async_trait::async_trait;
use std::marker::PhantomData;

use super::ItemProcessor;
use crate::error::ItemError;

/// Processor backed by a synchronous closure
pub struct FnItemProcessor<I, O, F> {
    process_fn: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnItemProcessor<I, O, F>
where
    F: Fn(I) -> Result<Option<O>, ItemError> + Send + Sync,
{
    pub fn new(process_fn: F) -> Self {
        Self {
            process_fn,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F> ItemProcessor<I, O> for FnItemProcessor<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<Option<O>, ItemError> + Send + Sync,
{
    async fn process(&self, item: I) -> Result<Option<O>, ItemError> {
        (self.process_fn)(item)
    }
}

/// Processor that hands every item through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughItemProcessor;

#[async_trait]
impl<T: Send + 'static> ItemProcessor<T, T> for PassThroughItemProcessor {
    async fn process(&self, item: T) -> Result<Option<T>, ItemError> {
        Ok(Some(item))
    }
}
