use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionContext, ExitStatus};
use crate::state_machine::{step_target_state, BatchStatus, StateMachineResult, StepEvent};

/// Run record of one step within a job execution.
///
/// Counters only ever grow. They are updated from [`StepContribution`]s at chunk commit
/// and persisted through the repository after every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub retry_count: u64,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    pub failures: Vec<String>,
}

impl StepExecution {
    pub fn new(id: i64, job_execution_id: i64, step_name: impl Into<String>) -> Self {
        Self {
            id,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            retry_count: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            failures: Vec::new(),
        }
    }

    /// Fold a committed chunk's contribution into the counters
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.retry_count += contribution.retry_count;
        self.commit_count += 1;
        self.exit_status = self.exit_status.and(&contribution.exit_status);
        self.last_updated = Some(Utc::now());
    }

    pub fn increment_rollback_count(&mut self) {
        self.rollback_count += 1;
        self.last_updated = Some(Utc::now());
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Apply a state machine event, stamping start/end times
    pub fn transition(&mut self, event: StepEvent) -> StateMachineResult<BatchStatus> {
        let target = step_target_state(self.status, &event)?;
        let now = Utc::now();
        if target == BatchStatus::Started {
            self.start_time = Some(now);
        }
        if target.is_terminal() {
            self.end_time = Some(now);
        }
        if let Some(message) = event.error_message() {
            self.failures.push(message.to_string());
        }
        self.status = target;
        self.last_updated = Some(now);
        Ok(target)
    }
}

/// Counts accumulated by one chunk (or tasklet iteration) before commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContribution {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub retry_count: u64,
    pub exit_status: ExitStatus,
}

impl StepContribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_read_count(&mut self) {
        self.read_count += 1;
    }

    pub fn increment_write_count(&mut self, count: u64) {
        self.write_count += count;
    }

    pub fn increment_filter_count(&mut self) {
        self.filter_count += 1;
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn set_exit_status(&mut self, exit_status: ExitStatus) {
        self.exit_status = exit_status;
    }
}
