//! Shared fixtures for the integration tests: an in-memory engine, tasklet steps
//! with fixed outcomes, flaky processors and writers, and recording listeners.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batch_core::error::{ErrorKind, ItemError, ListenerError, Stage};
use batch_core::item::{ItemProcessor, ItemStream, ItemWriter};
use batch_core::job::JobOrchestrator;
use batch_core::listener::{RetryListener, SkipListener};
use batch_core::models::{ExitStatus, StepContribution};
use batch_core::repository::InMemoryJobRepository;
use batch_core::step::{FnTasklet, RepeatStatus, Step, StepBuilder, Tasklet, TaskletContext};
use batch_core::transaction::ResourcelessTransactionManager;

/// Orchestrator over a fresh in-memory repository
pub fn engine() -> (Arc<InMemoryJobRepository>, JobOrchestrator) {
    let repository = Arc::new(InMemoryJobRepository::new());
    let orchestrator = JobOrchestrator::new(
        repository.clone(),
        Arc::new(ResourcelessTransactionManager::new()),
    );
    (repository, orchestrator)
}

/// Tasklet step that finishes in one call
pub fn ok_step(name: &str) -> Step {
    StepBuilder::new(name)
        .tasklet(FnTasklet::new(|_, _| Ok(RepeatStatus::Finished)))
        .build()
}

/// Tasklet step that always fails with a runtime error
pub fn failing_step(name: &str) -> Step {
    let message = format!("{name} failed");
    StepBuilder::new(name)
        .tasklet(FnTasklet::new(move |_, _| Err(ItemError::runtime(message.clone()))))
        .build()
}

/// Tasklet step that completes with a custom exit code
pub fn exit_code_step(name: &str, exit_code: &'static str) -> Step {
    StepBuilder::new(name)
        .tasklet(FnTasklet::new(move |contribution: &mut StepContribution, _: &TaskletContext| {
            contribution.exit_status = ExitStatus::new(exit_code);
            Ok(RepeatStatus::Finished)
        }))
        .build()
}

/// Tasklet that fails until `healed` is set, counting its calls
#[derive(Clone, Default)]
pub struct SwitchableTasklet {
    pub healed: Arc<AtomicBool>,
    pub calls: Arc<AtomicU32>,
}

impl SwitchableTasklet {
    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tasklet for SwitchableTasklet {
    async fn execute(
        &self,
        _contribution: &mut StepContribution,
        _context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healed.load(Ordering::SeqCst) {
            Ok(RepeatStatus::Finished)
        } else {
            Err(ItemError::io("resource unavailable"))
        }
    }
}

/// Tasklet that keeps asking for another iteration until released, sleeping between
/// calls so a stop request can land
#[derive(Clone, Default)]
pub struct WaitingTasklet {
    pub released: Arc<AtomicBool>,
    pub iterations: Arc<AtomicU32>,
}

impl WaitingTasklet {
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Tasklet for WaitingTasklet {
    async fn execute(
        &self,
        _contribution: &mut StepContribution,
        _context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError> {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        if self.released.load(Ordering::SeqCst) {
            return Ok(RepeatStatus::Finished);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(RepeatStatus::Continuable)
    }
}

/// Converts numbers to strings, failing on `bad_item` for its first `failures`
/// attempts with an error of `kind`. Clones share the attempt counts.
#[derive(Clone)]
pub struct FlakyProcessor {
    bad_item: i32,
    failures: u32,
    kind: ErrorKind,
    attempts: Arc<Mutex<HashMap<i32, u32>>>,
}

impl FlakyProcessor {
    pub fn new(bad_item: i32, failures: u32, kind: ErrorKind) -> Self {
        Self {
            bad_item,
            failures,
            kind,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Processor that rejects `bad_item` every time
    pub fn always(bad_item: i32, kind: ErrorKind) -> Self {
        Self::new(bad_item, u32::MAX, kind)
    }

    pub fn attempts(&self, item: i32) -> u32 {
        self.attempts.lock().get(&item).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ItemProcessor<i32, String> for FlakyProcessor {
    async fn process(&self, item: i32) -> Result<Option<String>, ItemError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(item).or_insert(0);
            *count += 1;
            *count
        };
        if item == self.bad_item && attempt <= self.failures {
            return Err(ItemError::new(self.kind, format!("cannot process {item}")));
        }
        Ok(Some(item.to_string()))
    }
}

/// Writer that rejects any chunk containing `bad_item`, recording accepted chunks
#[derive(Clone)]
pub struct RejectingWriter {
    bad_item: String,
    kind: ErrorKind,
    pub chunks: Arc<Mutex<Vec<Vec<String>>>>,
    pub attempts: Arc<AtomicU32>,
}

impl RejectingWriter {
    pub fn new(bad_item: &str, kind: ErrorKind) -> Self {
        Self {
            bad_item: bad_item.to_string(),
            kind,
            chunks: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn written(&self) -> Vec<String> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }
}

impl ItemStream for RejectingWriter {}

#[async_trait]
impl ItemWriter<String> for RejectingWriter {
    async fn write(&mut self, items: &[String]) -> Result<(), ItemError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if items.contains(&self.bad_item) {
            return Err(ItemError::new(self.kind, format!("cannot write {}", self.bad_item)));
        }
        self.chunks.lock().push(items.to_vec());
        Ok(())
    }
}

/// Records every skip callback as `"{stage}:{item}"`
#[derive(Default)]
pub struct RecordingSkipListener {
    pub events: Mutex<Vec<String>>,
}

impl RecordingSkipListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl<I, O> SkipListener<I, O> for RecordingSkipListener
where
    I: Debug + Send + Sync,
    O: Debug + Send + Sync,
{
    async fn on_skip_in_read(&self, error: &ItemError) -> Result<(), ListenerError> {
        self.events.lock().push(format!("read:{}", error.message));
        Ok(())
    }

    async fn on_skip_in_process(&self, item: &I, _error: &ItemError) -> Result<(), ListenerError> {
        self.events.lock().push(format!("process:{item:?}"));
        Ok(())
    }

    async fn on_skip_in_write(&self, item: &O, _error: &ItemError) -> Result<(), ListenerError> {
        self.events.lock().push(format!("write:{item:?}"));
        Ok(())
    }
}

/// Counts retry callbacks per stage
#[derive(Default)]
pub struct CountingRetryListener {
    pub retries: Mutex<Vec<(Stage, u32)>>,
}

impl CountingRetryListener {
    pub fn count(&self) -> usize {
        self.retries.lock().len()
    }
}

#[async_trait]
impl RetryListener for CountingRetryListener {
    async fn on_retry(&self, stage: Stage, attempt: u32, _error: &ItemError) -> Result<(), ListenerError> {
        self.retries.lock().push((stage, attempt));
        Ok(())
    }
}
