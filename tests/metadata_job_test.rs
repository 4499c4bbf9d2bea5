use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use batch_core::error::{BatchError, BatchResult};
use batch_core::job::metadata::{DeleteMetadataJobBuilder, EMPTY_EXIT_CODE, LOW_ID_KEY, MAX_ID_KEY};
use batch_core::job::JobOrchestrator;
use batch_core::models::{ExecutionContext, JobParameters};
use batch_core::repository::{InMemoryJobRepository, JobMetadataStore, JobRepository};
use batch_core::state_machine::BatchStatus;
use batch_core::transaction::ResourcelessTransactionManager;

async fn seed(repository: &InMemoryJobRepository, runs: i64) {
    for run in 0..runs {
        let params = JobParameters::builder().add_long("run.id", run).build();
        let instance = repository.create_job_instance("old", &params).await.unwrap();
        repository
            .create_job_execution(&instance, &params, ExecutionContext::new())
            .await
            .unwrap();
    }
}

fn orchestrator(repository: &Arc<InMemoryJobRepository>) -> JobOrchestrator {
    JobOrchestrator::new(
        repository.clone(),
        Arc::new(ResourcelessTransactionManager::new()),
    )
}

/// Store whose second range deletion fails once
struct InterruptedStore {
    inner: Arc<InMemoryJobRepository>,
    deletions: AtomicU32,
}

#[async_trait]
impl JobMetadataStore for InterruptedStore {
    async fn max_job_instance_id_created_before(
        &self,
        base_date: DateTime<Utc>,
    ) -> BatchResult<Option<i64>> {
        self.inner.max_job_instance_id_created_before(base_date).await
    }

    async fn min_job_instance_id(&self) -> BatchResult<Option<i64>> {
        self.inner.min_job_instance_id().await
    }

    async fn delete_job_instances_in_range(&self, low: i64, high: i64) -> BatchResult<u64> {
        if self.deletions.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(BatchError::Repository("connection reset".to_string()));
        }
        self.inner.delete_job_instances_in_range(low, high).await
    }
}

#[tokio::test]
async fn test_restart_resumes_from_last_deleted_range() {
    let repository = Arc::new(InMemoryJobRepository::new());
    seed(&repository, 250).await;
    let store = Arc::new(InterruptedStore {
        inner: repository.clone(),
        deletions: AtomicU32::new(0),
    });
    let job = Arc::new(DeleteMetadataJobBuilder::new(store).build().unwrap());
    let orchestrator = orchestrator(&repository);
    let params = JobParameters::builder()
        .add_date("baseDate", Utc::now() + Duration::days(1))
        .build();

    let failed = orchestrator.run(Arc::clone(&job), params.clone()).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.execution_context.get_long(MAX_ID_KEY), Some(250));
    let delete = failed.step_execution("deleteMetadata").unwrap();
    assert_eq!(delete.write_count, 100);
    assert_eq!(delete.execution_context.get_long(LOW_ID_KEY), Some(101));
    assert_eq!(repository.job_instance_count(), 151);

    let restarted = orchestrator.run(job, params).await.unwrap();
    assert_eq!(restarted.status, BatchStatus::Completed);
    assert!(restarted.step_execution("checkMaxJobInstanceId").is_none());
    let delete = restarted.step_execution("deleteMetadata").unwrap();
    assert_eq!(delete.write_count, 150);
    assert_eq!(repository.job_instance_count(), 1);
}

#[tokio::test]
async fn test_custom_key_accepts_string_and_date_values() {
    let repository = Arc::new(InMemoryJobRepository::new());
    seed(&repository, 3).await;
    let job = Arc::new(
        DeleteMetadataJobBuilder::new(repository.clone())
            .name("purge")
            .base_date_key("cutoff")
            .date_format("%d.%m.%Y")
            .build()
            .unwrap(),
    );
    let orchestrator = orchestrator(&repository);

    let early = orchestrator
        .run(
            Arc::clone(&job),
            JobParameters::builder().add_string("cutoff", "01.01.2000").build(),
        )
        .await
        .unwrap();
    assert_eq!(early.status, BatchStatus::Completed);
    assert_eq!(
        early.step_execution("checkMaxJobInstanceId").unwrap().exit_status.exit_code,
        EMPTY_EXIT_CODE
    );
    assert_eq!(repository.job_instance_count(), 4);

    let late = orchestrator
        .run(
            job,
            JobParameters::builder()
                .add_date("cutoff", Utc::now() + Duration::days(1))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(late.status, BatchStatus::Completed);
    assert_eq!(late.step_execution("deleteMetadata").unwrap().write_count, 4);
    assert_eq!(repository.job_instance_count(), 1);
}

#[tokio::test]
async fn test_empty_repository_has_nothing_to_delete() {
    let repository = Arc::new(InMemoryJobRepository::new());
    let job = DeleteMetadataJobBuilder::new(repository.clone()).build().unwrap();

    let execution = orchestrator(&repository)
        .run(
            Arc::new(job),
            JobParameters::builder().add_string("baseDate", "2999/12/31").build(),
        )
        .await
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert!(execution.step_execution("deleteMetadata").is_none());
    assert_eq!(repository.job_instance_count(), 1);
}
