use async_trait::async_trait;
use tracing::debug;

use super::{ItemReader, ItemStream};
use crate::error::ItemError;
use crate::models::{namespaced_key, ExecutionContext};

/// Reader over any iterator.
///
/// Records how many items it handed out as `"{name}.read.count"` on every update and
/// skips that many items when opened with a context that carries the key.
pub struct IteratorItemReader<T> {
    name: String,
    items: Box<dyn Iterator<Item = T> + Send>,
    read_count: u64,
}

impl<T> IteratorItemReader<T> {
    pub fn new<I>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            name: name.into(),
            items: Box::new(items.into_iter()),
            read_count: 0,
        }
    }

    fn count_key(&self) -> String {
        namespaced_key(&self.name, "read.count")
    }

    pub fn read_count(&self) -> u64 {
        self.read_count
    }
}

#[async_trait]
impl<T: Send> ItemStream for IteratorItemReader<T> {
    async fn open(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        let Some(resume_at) = context.get_long(&self.count_key()) else {
            return Ok(());
        };
        let resume_at = u64::try_from(resume_at)
            .map_err(|_| ItemError::illegal_state(format!("negative read count {resume_at}")))?;

        while self.read_count < resume_at {
            if self.items.next().is_none() {
                break;
            }
            self.read_count += 1;
        }
        debug!(reader = %self.name, resumed_at = self.read_count, "📖 READER: Resumed from execution context");
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        let count = i64::try_from(self.read_count)
            .map_err(|_| ItemError::illegal_state("read count overflow"))?;
        context.put_long(self.count_key(), count);
        Ok(())
    }
}

#[async_trait]
impl<T: Send> ItemReader<T> for IteratorItemReader<T> {
    async fn read(&mut self) -> Result<Option<T>, ItemError> {
        let item = self.items.next();
        if item.is_some() {
            self.read_count += 1;
        }
        Ok(item)
    }
}

/// Reader backed by a closure, for ad-hoc sources
pub struct FnItemReader<F> {
    read_fn: F,
}

impl<F> FnItemReader<F> {
    pub fn new(read_fn: F) -> Self {
        Self { read_fn }
    }
}

impl<F: Send> ItemStream for FnItemReader<F> {}

#[async_trait]
impl<T, F> ItemReader<T> for FnItemReader<F>
where
    T: Send,
    F: FnMut() -> Result<Option<T>, ItemError> + Send,
{
    async fn read(&mut self) -> Result<Option<T>, ItemError> {
        (self.read_fn)()
    }
}
