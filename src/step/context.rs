use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::StepResult;
use crate::models::{JobExecutionHandle, JobParameters, StepContribution, StepExecution};
use crate::repository::JobRepository;
use crate::transaction::TransactionManager;

/// Collaborators every execution is recorded and committed through
#[derive(Clone)]
pub struct EngineServices {
    pub repository: Arc<dyn JobRepository>,
    pub transaction_manager: Arc<dyn TransactionManager>,
}

impl EngineServices {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        transaction_manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            repository,
            transaction_manager,
        }
    }
}

impl std::fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineServices").finish_non_exhaustive()
    }
}

/// Skips taken by the in-flight and committed chunks of one step execution.
///
/// Concurrent chunks reserve against the same counter, so the step-wide skip limit
/// holds no matter how chunks interleave. A rolled back chunk releases its reservations.
#[derive(Clone, Debug, Default)]
pub struct SkipCounter(Arc<AtomicU64>);

impl SkipCounter {
    pub fn new(initial: u64) -> Self {
        Self(Arc::new(AtomicU64::new(initial)))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Take one skip if fewer than `limit` are taken
    pub fn try_reserve(&self, limit: u64) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (taken < limit).then_some(taken + 1)
            })
            .is_ok()
    }

    pub fn release(&self, count: u64) {
        if count > 0 {
            self.0.fetch_sub(count, Ordering::SeqCst);
        }
    }
}

/// Everything a running step needs: its execution record, the enclosing job
/// execution and the engine collaborators.
///
/// The step execution sits behind a short-lived lock for reads and counter updates.
/// Commits additionally hold `commit_lock` for their whole duration so that concurrent
/// chunks persist one at a time and the repository never sees counters go backwards.
#[derive(Clone)]
pub struct StepContext {
    pub services: EngineServices,
    pub job: JobExecutionHandle,
    execution: Arc<Mutex<StepExecution>>,
    commit_lock: Arc<AsyncMutex<()>>,
    skips: SkipCounter,
}

impl StepContext {
    pub fn new(services: EngineServices, job: JobExecutionHandle, execution: StepExecution) -> Self {
        let skips = SkipCounter::new(execution.skip_count());
        Self {
            services,
            job,
            execution: Arc::new(Mutex::new(execution)),
            commit_lock: Arc::new(AsyncMutex::new(())),
            skips,
        }
    }

    pub fn step_name(&self) -> String {
        self.execution.lock().step_name.clone()
    }

    pub fn step_execution_id(&self) -> i64 {
        self.execution.lock().id
    }

    pub fn snapshot(&self) -> StepExecution {
        self.execution.lock().clone()
    }

    pub fn with_execution<R>(&self, f: impl FnOnce(&mut StepExecution) -> R) -> R {
        f(&mut self.execution.lock())
    }

    pub fn is_stop_requested(&self) -> bool {
        self.job.is_stop_requested()
    }

    /// Skip budget shared by every chunk of this step execution
    pub fn skip_counter(&self) -> SkipCounter {
        self.skips.clone()
    }

    /// Fold a contribution into the step execution and persist it, serialized with
    /// every other commit of this step
    pub async fn commit_contribution(&self, contribution: &StepContribution) -> StepResult<()> {
        let _commit = self.commit_lock.lock().await;
        let snapshot = self.with_execution(|execution| {
            execution.apply(contribution);
            execution.clone()
        });
        self.services.repository.update_step_execution(&snapshot).await?;
        Ok(())
    }

    /// Hold the commit lock while running a custom commit sequence
    pub(crate) async fn lock_commits(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    pub(crate) fn record_rollback(&self) {
        self.with_execution(StepExecution::increment_rollback_count);
    }
}

/// View of the running step handed to tasklets
#[derive(Clone)]
pub struct TaskletContext {
    step: StepContext,
}

impl TaskletContext {
    pub(crate) fn new(step: StepContext) -> Self {
        Self { step }
    }

    pub fn step_name(&self) -> String {
        self.step.step_name()
    }

    pub fn job_parameters(&self) -> JobParameters {
        self.step.job.parameters()
    }

    pub fn job(&self) -> &JobExecutionHandle {
        &self.step.job
    }

    pub fn with_step_execution<R>(&self, f: impl FnOnce(&mut StepExecution) -> R) -> R {
        self.step.with_execution(f)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.step.is_stop_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_counter_stops_at_limit() {
        let counter = SkipCounter::new(1);
        let shared = counter.clone();

        assert!(counter.try_reserve(3));
        assert!(shared.try_reserve(3));
        assert!(!counter.try_reserve(3));
        assert_eq!(shared.current(), 3);

        counter.release(2);
        assert_eq!(shared.current(), 1);
        assert!(shared.try_reserve(3));
    }
}
