mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batch_core::error::{BatchError, ListenerError};
use batch_core::job::{DefaultJobParametersValidator, Job, JobBuilder, RunIdIncrementer};
use batch_core::listener::{ExecutionContextPromotionListener, JobExecutionListener};
use batch_core::models::{JobExecutionHandle, JobParameters, StepContribution};
use batch_core::repository::JobRepository;
use batch_core::state_machine::BatchStatus;
use batch_core::step::{FnTasklet, RepeatStatus, Step, StepBuilder, TaskletContext};
use common::*;

/// Tasklet step counting its calls into `calls`
fn counted(builder: StepBuilder, calls: &Arc<AtomicU32>) -> Step {
    let calls = Arc::clone(calls);
    builder
        .tasklet(FnTasklet::new(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(RepeatStatus::Finished)
        }))
        .build()
}

fn day(value: &str) -> JobParameters {
    JobParameters::builder().add_string("day", value).build()
}

#[tokio::test]
async fn test_completed_instance_cannot_run_again() {
    let (repository, orchestrator) = engine();
    let job = Arc::new(JobBuilder::new("daily").start(ok_step("work")).build().unwrap());

    let first = orchestrator.run(Arc::clone(&job), day("2024-01-01")).await.unwrap();
    assert_eq!(first.status, BatchStatus::Completed);

    let second = orchestrator.run(Arc::clone(&job), day("2024-01-01")).await;
    assert!(matches!(second, Err(BatchError::JobInstanceAlreadyComplete { .. })));

    let other_day = orchestrator.run(job, day("2024-01-02")).await.unwrap();
    assert_eq!(other_day.status, BatchStatus::Completed);
    assert_ne!(other_day.instance.id, first.instance.id);
    assert_eq!(repository.job_instance_count(), 2);
    assert_eq!(repository.job_execution_count(), 2);
}

#[tokio::test]
async fn test_distinct_steps_with_one_name_are_rejected_at_build() {
    let (repository, _orchestrator) = engine();
    let first_calls = Arc::new(AtomicU32::new(0));
    let second_calls = Arc::new(AtomicU32::new(0));

    let result = JobBuilder::new("dup")
        .start(counted(StepBuilder::new("load"), &first_calls))
        .next(counted(StepBuilder::new("load"), &second_calls))
        .build();

    assert!(matches!(result, Err(BatchError::Configuration(message)) if message.contains("load")));
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(repository.job_instance_count(), 0);
}

#[tokio::test]
async fn test_invalid_parameters_create_nothing() {
    let (repository, orchestrator) = engine();
    let job = JobBuilder::new("import")
        .start(ok_step("load"))
        .validator(DefaultJobParametersValidator::new(["input"], ["limit"]).unwrap())
        .build()
        .unwrap();
    let job = Arc::new(job);

    let missing = orchestrator.run(Arc::clone(&job), JobParameters::new()).await;
    assert!(matches!(missing, Err(BatchError::Validation(_))));

    let unexpected = orchestrator
        .run(
            Arc::clone(&job),
            JobParameters::builder()
                .add_string("input", "a.csv")
                .add_string("colour", "blue")
                .build(),
        )
        .await;
    assert!(matches!(unexpected, Err(BatchError::Validation(_))));
    assert_eq!(repository.job_instance_count(), 0);

    let valid = orchestrator
        .run(job, JobParameters::builder().add_string("input", "a.csv").build())
        .await
        .unwrap();
    assert_eq!(valid.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_restart_replays_completed_steps() {
    let (_repository, orchestrator) = engine();
    let extract_calls = Arc::new(AtomicU32::new(0));
    let load = SwitchableTasklet::default();

    let job = Arc::new(
        JobBuilder::new("etl")
            .start(counted(StepBuilder::new("extract"), &extract_calls))
            .next(StepBuilder::new("load").tasklet(load.clone()).build())
            .build()
            .unwrap(),
    );

    let failed = orchestrator.run(Arc::clone(&job), day("2024-03-01")).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.step_execution("load").unwrap().status, BatchStatus::Failed);

    load.heal();
    let restarted = orchestrator.run(job, day("2024-03-01")).await.unwrap();
    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.instance.id, failed.instance.id);
    assert_ne!(restarted.id, failed.id);
    assert_eq!(extract_calls.load(Ordering::SeqCst), 1);
    assert!(restarted.step_execution("extract").is_none());
    assert_eq!(restarted.step_execution("load").unwrap().status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_allow_start_if_complete_reruns_step() {
    let (_repository, orchestrator) = engine();
    let setup_calls = Arc::new(AtomicU32::new(0));
    let load = SwitchableTasklet::default();

    let job = Arc::new(
        JobBuilder::new("etl")
            .start(counted(
                StepBuilder::new("setup").allow_start_if_complete(true),
                &setup_calls,
            ))
            .next(StepBuilder::new("load").tasklet(load.clone()).build())
            .build()
            .unwrap(),
    );

    orchestrator.run(Arc::clone(&job), day("2024-03-02")).await.unwrap();
    load.heal();
    let restarted = orchestrator.run(job, day("2024-03-02")).await.unwrap();

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(setup_calls.load(Ordering::SeqCst), 2);
    assert!(restarted.step_execution("setup").is_some());
}

#[tokio::test]
async fn test_start_limit_fails_the_job() {
    let (_repository, orchestrator) = engine();
    let flaky = SwitchableTasklet::default();
    let job = Arc::new(
        JobBuilder::new("limited")
            .start(StepBuilder::new("fragile").start_limit(1).tasklet(flaky.clone()).build())
            .build()
            .unwrap(),
    );

    let first = orchestrator.run(Arc::clone(&job), day("2024-04-01")).await.unwrap();
    assert_eq!(first.status, BatchStatus::Failed);

    flaky.heal();
    let second = orchestrator.run(job, day("2024-04-01")).await.unwrap();
    assert_eq!(second.status, BatchStatus::Failed);
    assert_eq!(flaky.calls(), 1);
    assert!(second
        .all_failures()
        .iter()
        .any(|failure| failure.contains("start limit")));
}

#[tokio::test]
async fn test_non_restartable_job_rejects_rerun() {
    let (_repository, orchestrator) = engine();
    let job = Arc::new(
        JobBuilder::new("oneShot")
            .start(failing_step("boom"))
            .restartable(false)
            .build()
            .unwrap(),
    );

    let first = orchestrator.run(Arc::clone(&job), day("2024-05-01")).await.unwrap();
    assert_eq!(first.status, BatchStatus::Failed);

    let second = orchestrator.run(job, day("2024-05-01")).await;
    assert!(matches!(second, Err(BatchError::JobRestart(_))));
}

#[tokio::test]
async fn test_stop_running_execution_then_restart() {
    let (_repository, orchestrator) = engine();
    let waiting = WaitingTasklet::default();
    let job: Arc<Job> = Arc::new(
        JobBuilder::new("longRunning")
            .start(StepBuilder::new("poll").tasklet(waiting.clone()).build())
            .build()
            .unwrap(),
    );

    let running = {
        let orchestrator = orchestrator.clone();
        let job = Arc::clone(&job);
        tokio::spawn(async move { orchestrator.run(job, day("2024-06-01")).await })
    };

    let execution_id = loop {
        if let Some(id) = orchestrator.running_executions().first().copied() {
            if waiting.iterations.load(Ordering::SeqCst) > 0 {
                break id;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    };
    orchestrator.stop(execution_id).await.unwrap();

    let stopped = running.await.unwrap().unwrap();
    assert_eq!(stopped.status, BatchStatus::Stopped);
    assert_eq!(stopped.step_execution("poll").unwrap().status, BatchStatus::Stopped);
    assert!(orchestrator.running_executions().is_empty());

    let finished = orchestrator.stop(execution_id).await;
    assert!(matches!(finished, Err(BatchError::JobExecutionNotRunning(_))));

    waiting.release();
    let restarted = orchestrator.run(job, day("2024-06-01")).await.unwrap();
    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.instance.id, stopped.instance.id);
}

#[tokio::test]
async fn test_stop_unknown_execution() {
    let (_repository, orchestrator) = engine();
    let result = orchestrator.stop(999).await;
    assert!(matches!(result, Err(BatchError::NoSuchJobExecution(999))));
}

#[tokio::test]
async fn test_abandoned_execution_is_not_restarted() {
    let (repository, orchestrator) = engine();
    let job = Arc::new(JobBuilder::new("abandonable").start(failing_step("boom")).build().unwrap());

    let failed = orchestrator.run(Arc::clone(&job), day("2024-07-01")).await.unwrap();
    let abandoned = orchestrator.abandon(failed.id).await.unwrap();
    assert_eq!(abandoned.status, BatchStatus::Abandoned);

    let stored = repository.get_job_execution(failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Abandoned);

    let rerun = orchestrator.run(job, day("2024-07-01")).await;
    assert!(matches!(rerun, Err(BatchError::JobInstanceAlreadyComplete { .. })));

    let missing = orchestrator.abandon(12345).await;
    assert!(matches!(missing, Err(BatchError::NoSuchJobExecution(12345))));
}

#[tokio::test]
async fn test_start_next_instance_increments_run_id() {
    let (_repository, orchestrator) = engine();
    let job = Arc::new(
        JobBuilder::new("nightly")
            .start(ok_step("work"))
            .incrementer(RunIdIncrementer::new())
            .build()
            .unwrap(),
    );

    let first = orchestrator.start_next_instance(Arc::clone(&job)).await.unwrap();
    let second = orchestrator.start_next_instance(job).await.unwrap();

    assert_eq!(first.parameters.get_long("run.id"), Some(1));
    assert_eq!(second.parameters.get_long("run.id"), Some(2));
    assert_ne!(first.instance.id, second.instance.id);

    let plain = Arc::new(JobBuilder::new("plain").start(ok_step("work")).build().unwrap());
    assert!(matches!(
        orchestrator.start_next_instance(plain).await,
        Err(BatchError::Configuration(_))
    ));
}

#[derive(Default)]
struct RecordingJobListener {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl JobExecutionListener for RecordingJobListener {
    async fn before_job(&self, job: &JobExecutionHandle) -> Result<(), ListenerError> {
        let status = job.with(|execution| execution.status);
        self.events.lock().push(format!("before:{status}"));
        Ok(())
    }

    async fn after_job(&self, job: &JobExecutionHandle) -> Result<(), ListenerError> {
        let status = job.with(|execution| execution.status);
        self.events.lock().push(format!("after:{status}"));
        Ok(())
    }
}

#[tokio::test]
async fn test_job_listeners_surround_execution() {
    let (_repository, orchestrator) = engine();
    let listener = Arc::new(RecordingJobListener::default());
    let job = JobBuilder::new("observed")
        .start(ok_step("work"))
        .listener(listener.clone())
        .build()
        .unwrap();

    orchestrator.run(Arc::new(job), JobParameters::new()).await.unwrap();

    assert_eq!(
        *listener.events.lock(),
        vec!["before:STARTED".to_string(), "after:COMPLETED".to_string()]
    );
}

#[tokio::test]
async fn test_promoted_context_is_visible_to_later_steps() {
    let (_repository, orchestrator) = engine();
    let seen = Arc::new(AtomicU32::new(0));
    let reader = Arc::clone(&seen);

    let count = StepBuilder::new("count")
        .tasklet(FnTasklet::new(|_: &mut StepContribution, context: &TaskletContext| {
            context.with_step_execution(|step| step.execution_context.put_long("total", 42));
            Ok(RepeatStatus::Finished)
        }))
        .listener(Arc::new(ExecutionContextPromotionListener::new(["total"])))
        .build();
    let report = StepBuilder::new("report")
        .tasklet(FnTasklet::new(move |_: &mut StepContribution, context: &TaskletContext| {
            let total = context.job().with(|job| job.execution_context.get_long("total"));
            reader.store(total.unwrap_or(0) as u32, Ordering::SeqCst);
            Ok(RepeatStatus::Finished)
        }))
        .build();

    let job = JobBuilder::new("promoting").start(count).next(report).build().unwrap();
    let execution = orchestrator.run(Arc::new(job), JobParameters::new()).await.unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(seen.load(Ordering::SeqCst), 42);
    assert_eq!(execution.execution_context.get_long("total"), Some(42));
}

#[tokio::test]
async fn test_job_step_runs_child_job_with_parent_parameters() {
    let (repository, orchestrator) = engine();
    let child = Arc::new(JobBuilder::new("child").start(ok_step("childWork")).build().unwrap());

    let parent = JobBuilder::new("parent")
        .start(StepBuilder::new("launch").job(Arc::clone(&child)).build())
        .build()
        .unwrap();
    let params = day("2024-08-01");

    let execution = orchestrator.run(Arc::new(parent), params.clone()).await.unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.step_execution("launch").unwrap().status, BatchStatus::Completed);
    let child_execution = repository
        .get_last_job_execution("child", &params)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child_execution.status, BatchStatus::Completed);
    assert!(child_execution.step_execution("childWork").is_some());
}

#[tokio::test]
async fn test_failed_child_job_fails_job_step() {
    let (_repository, orchestrator) = engine();
    let child = Arc::new(JobBuilder::new("child").start(failing_step("childWork")).build().unwrap());
    let parent = JobBuilder::new("parent")
        .start(StepBuilder::new("launch").job(child).build())
        .build()
        .unwrap();

    let execution = orchestrator.run(Arc::new(parent), day("2024-08-02")).await.unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(execution.step_execution("launch").unwrap().status, BatchStatus::Failed);
}
