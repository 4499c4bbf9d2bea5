use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::{JobMetadataStore, JobRepository};
use crate::error::{BatchError, BatchResult};
use crate::models::{
    ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution,
};

#[derive(Debug, Default)]
struct RepositoryState {
    instances: BTreeMap<i64, JobInstance>,
    instance_ids: HashMap<(String, String), i64>,
    instance_parameters: HashMap<i64, JobParameters>,
    job_executions: BTreeMap<i64, JobExecution>,
    step_executions: BTreeMap<i64, StepExecution>,
}

impl RepositoryState {
    fn executions_of(&self, instance_id: i64) -> impl Iterator<Item = &JobExecution> {
        self.job_executions
            .values()
            .filter(move |e| e.instance.id == instance_id)
    }
}

/// Repository keeping all metadata in process memory.
///
/// Stored records are snapshots: callers get clones and write changes back through the
/// `update_*` methods.
#[derive(Debug)]
pub struct InMemoryJobRepository {
    state: RwLock<RepositoryState>,
    next_instance_id: AtomicI64,
    next_job_execution_id: AtomicI64,
    next_step_execution_id: AtomicI64,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self {
            state: RwLock::new(RepositoryState::default()),
            next_instance_id: AtomicI64::new(1),
            next_job_execution_id: AtomicI64::new(1),
            next_step_execution_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_instance_count(&self) -> usize {
        self.state.read().instances.len()
    }

    pub fn job_execution_count(&self) -> usize {
        self.state.read().job_executions.len()
    }

    pub fn step_execution_count(&self) -> usize {
        self.state.read().step_executions.len()
    }

    /// Step executions recorded for one job execution, in creation order
    pub fn step_executions_of(&self, job_execution_id: i64) -> Vec<StepExecution> {
        self.state
            .read()
            .step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobInstance>> {
        let key = (job_name.to_string(), parameters.identity_key());
        let state = self.state.read();
        Ok(state
            .instance_ids
            .get(&key)
            .and_then(|id| state.instances.get(id))
            .cloned())
    }

    async fn create_job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<JobInstance> {
        let job_key = parameters.identity_key();
        let key = (job_name.to_string(), job_key.clone());
        let mut state = self.state.write();
        if state.instance_ids.contains_key(&key) {
            return Err(BatchError::Repository(format!(
                "job instance already exists: job={job_name}, key={job_key}"
            )));
        }

        let instance = JobInstance {
            id: self.next_instance_id.fetch_add(1, Ordering::SeqCst),
            job_name: job_name.to_string(),
            job_key,
        };
        state.instance_ids.insert(key, instance.id);
        state
            .instance_parameters
            .insert(instance.id, parameters.clone());
        state.instances.insert(instance.id, instance.clone());
        debug!(job_name, instance_id = instance.id, "💾 REPOSITORY: Created job instance");
        Ok(instance)
    }

    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
        context: ExecutionContext,
    ) -> BatchResult<JobExecution> {
        let mut state = self.state.write();
        if !state.instances.contains_key(&instance.id) {
            return Err(BatchError::Repository(format!(
                "unknown job instance {}",
                instance.id
            )));
        }

        let id = self.next_job_execution_id.fetch_add(1, Ordering::SeqCst);
        let mut execution = JobExecution::new(id, instance.clone(), parameters.clone());
        execution.execution_context = context;
        state.job_executions.insert(id, execution.clone());
        debug!(
            job_name = %instance.job_name,
            job_execution_id = id,
            "💾 REPOSITORY: Created job execution"
        );
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> BatchResult<()> {
        let mut state = self.state.write();
        match state.job_executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                stored.last_updated = Some(Utc::now());
                Ok(())
            }
            None => Err(BatchError::Repository(format!(
                "unknown job execution {}",
                execution.id
            ))),
        }
    }

    async fn get_job_execution(&self, execution_id: i64) -> BatchResult<Option<JobExecution>> {
        Ok(self.state.read().job_executions.get(&execution_id).cloned())
    }

    async fn get_last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobExecution>> {
        let key = (job_name.to_string(), parameters.identity_key());
        let state = self.state.read();
        let Some(instance_id) = state.instance_ids.get(&key).copied() else {
            return Ok(None);
        };
        Ok(state
            .executions_of(instance_id)
            .max_by_key(|e| (e.create_time, e.id))
            .cloned())
    }

    async fn get_job_executions(&self, instance: &JobInstance) -> BatchResult<Vec<JobExecution>> {
        Ok(self
            .state
            .read()
            .executions_of(instance.id)
            .cloned()
            .collect())
    }

    async fn create_step_execution(
        &self,
        job_execution_id: i64,
        step_name: &str,
    ) -> BatchResult<StepExecution> {
        let mut state = self.state.write();
        if !state.job_executions.contains_key(&job_execution_id) {
            return Err(BatchError::Repository(format!(
                "unknown job execution {job_execution_id}"
            )));
        }

        let id = self.next_step_execution_id.fetch_add(1, Ordering::SeqCst);
        let execution = StepExecution::new(id, job_execution_id, step_name);
        state.step_executions.insert(id, execution.clone());
        Ok(execution)
    }

    async fn update_step_execution(&self, execution: &StepExecution) -> BatchResult<()> {
        let mut state = self.state.write();
        match state.step_executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                stored.last_updated = Some(Utc::now());
                Ok(())
            }
            None => Err(BatchError::Repository(format!(
                "unknown step execution {}",
                execution.id
            ))),
        }
    }

    async fn get_last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> BatchResult<Option<StepExecution>> {
        let state = self.state.read();
        let job_execution_ids: Vec<i64> = state.executions_of(instance.id).map(|e| e.id).collect();
        Ok(state
            .step_executions
            .values()
            .filter(|s| s.step_name == step_name && job_execution_ids.contains(&s.job_execution_id))
            .max_by_key(|s| (s.create_time, s.id))
            .cloned())
    }

    async fn get_step_execution_count(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> BatchResult<u32> {
        let state = self.state.read();
        let job_execution_ids: Vec<i64> = state.executions_of(instance.id).map(|e| e.id).collect();
        let count = state
            .step_executions
            .values()
            .filter(|s| s.step_name == step_name && job_execution_ids.contains(&s.job_execution_id))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn get_last_job_parameters(&self, job_name: &str) -> BatchResult<Option<JobParameters>> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .rev()
            .find(|i| i.job_name == job_name)
            .and_then(|i| state.instance_parameters.get(&i.id))
            .cloned())
    }
}

#[async_trait]
impl JobMetadataStore for InMemoryJobRepository {
    async fn max_job_instance_id_created_before(
        &self,
        base_date: DateTime<Utc>,
    ) -> BatchResult<Option<i64>> {
        Ok(self
            .state
            .read()
            .job_executions
            .values()
            .filter(|e| e.create_time < base_date)
            .map(|e| e.instance.id)
            .max())
    }

    async fn min_job_instance_id(&self) -> BatchResult<Option<i64>> {
        Ok(self.state.read().instances.keys().next().copied())
    }

    async fn delete_job_instances_in_range(&self, low: i64, high: i64) -> BatchResult<u64> {
        if low > high {
            return Ok(0);
        }

        let mut state = self.state.write();
        let doomed: Vec<i64> = state.instances.range(low..=high).map(|(id, _)| *id).collect();
        let doomed_executions: Vec<i64> = state
            .job_executions
            .values()
            .filter(|e| doomed.contains(&e.instance.id))
            .map(|e| e.id)
            .collect();

        state
            .step_executions
            .retain(|_, s| !doomed_executions.contains(&s.job_execution_id));
        state
            .job_executions
            .retain(|id, _| !doomed_executions.contains(id));
        state.instance_ids.retain(|_, id| !doomed.contains(id));
        for id in &doomed {
            state.instances.remove(id);
            state.instance_parameters.remove(id);
        }

        debug!(low, high, deleted = doomed.len(), "🗑️ REPOSITORY: Deleted job instances");
        Ok(doomed.len() as u64)
    }
}
