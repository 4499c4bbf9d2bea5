//! # Metadata Purge Job
//!
//! A ready-made [`Job`] that deletes old job instances, with their executions, from a
//! [`JobMetadataStore`].
//!
//! ```text
//! checkMaxJobInstanceId ──EMPTY──► end
//!          │
//!      COMPLETED
//!          ▼
//!   deleteMetadata  (one id range of 100 instances per iteration)
//! ```
//!
//! The first step resolves the highest instance id whose execution was created before
//! the `baseDate` parameter. The second step deletes ranges from the lowest id up to
//! that id, remembering its position in the step context so a restart resumes where
//! the failed run stopped.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::info;

use super::{DefaultJobParametersValidator, Job, JobBuilder};
use crate::error::{kinds, BatchResult, ItemError, ListenerError};
use crate::flow::FlowBuilder;
use crate::listener::StepExecutionListener;
use crate::models::{ExitStatus, JobExecutionHandle, StepContribution, StepExecution};
use crate::repository::JobMetadataStore;
use crate::state_machine::BatchStatus;
use crate::step::{RepeatStatus, StepBuilder, Tasklet, TaskletContext};

pub const DEFAULT_JOB_NAME: &str = "deleteMetadataJob";
pub const DEFAULT_BASE_DATE_KEY: &str = "baseDate";
pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m/%d";

/// Job context key holding the highest instance id to delete
pub const MAX_ID_KEY: &str = "maxJobInstanceId";
/// Step context key holding the low end of the next range to delete
pub const LOW_ID_KEY: &str = "lowJobInstanceId";
/// Exit code of the check step when nothing is old enough to delete
pub const EMPTY_EXIT_CODE: &str = "EMPTY";

const DELETION_RANGE_LENGTH: i64 = 100;

/// Builds the metadata purge job
pub struct DeleteMetadataJobBuilder {
    store: Arc<dyn JobMetadataStore>,
    name: String,
    base_date_key: String,
    date_format: String,
}

impl DeleteMetadataJobBuilder {
    pub fn new(store: Arc<dyn JobMetadataStore>) -> Self {
        Self {
            store,
            name: DEFAULT_JOB_NAME.to_string(),
            base_date_key: DEFAULT_BASE_DATE_KEY.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Job parameter holding the date before which metadata is deleted
    pub fn base_date_key(mut self, key: impl Into<String>) -> Self {
        self.base_date_key = key.into();
        self
    }

    /// `chrono` format used when the base date is passed as a string
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    pub fn build(self) -> BatchResult<Job> {
        let check = StepBuilder::new("checkMaxJobInstanceId")
            .tasklet(CheckMaxJobInstanceIdTasklet {
                store: Arc::clone(&self.store),
                base_date_key: self.base_date_key.clone(),
                date_format: self.date_format,
            })
            .listener(Arc::new(CheckMaxJobInstanceIdListener))
            .build();
        let delete = StepBuilder::new("deleteMetadata")
            .tasklet(DeleteMetadataTasklet { store: self.store })
            .build();

        let flow = FlowBuilder::new(self.name.clone())
            .start(check.clone())
            .on(EMPTY_EXIT_CODE)
            .end()
            .from(check)
            .next(delete)
            .build()?;

        JobBuilder::new(self.name)
            .validator(DefaultJobParametersValidator::new(
                [self.base_date_key],
                Vec::<String>::new(),
            )?)
            .flow(flow)
            .build()
    }
}

struct CheckMaxJobInstanceIdTasklet {
    store: Arc<dyn JobMetadataStore>,
    base_date_key: String,
    date_format: String,
}

impl CheckMaxJobInstanceIdTasklet {
    fn base_date(&self, context: &TaskletContext) -> Result<DateTime<Utc>, ItemError> {
        let parameters = context.job_parameters();
        if let Some(date) = parameters.get_date(&self.base_date_key) {
            return Ok(date);
        }
        let raw = parameters.get_string(&self.base_date_key).ok_or_else(|| {
            ItemError::illegal_argument(format!("missing job parameter {}", self.base_date_key))
        })?;
        let date = NaiveDate::parse_from_str(raw, &self.date_format).map_err(|e| {
            ItemError::new(
                kinds::PARSE,
                format!("cannot parse {raw} with format {}: {e}", self.date_format),
            )
        })?;
        Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
    }
}

#[async_trait]
impl Tasklet for CheckMaxJobInstanceIdTasklet {
    async fn execute(
        &self,
        _contribution: &mut StepContribution,
        context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError> {
        let base_date = self.base_date(context)?;
        let found = self
            .store
            .max_job_instance_id_created_before(base_date)
            .await
            .map_err(|e| ItemError::io(e.to_string()))?;

        // Never purge the instance that is running this job
        let own_instance = context.job().with(|job| job.instance.id);
        let max_id = found.map(|id| id.min(own_instance - 1)).filter(|id| *id > 0);

        match max_id {
            Some(max_id) => {
                info!(max_id, %base_date, "🗑️ METADATA: Found job instances to delete");
                context
                    .job()
                    .with_mut(|job| job.execution_context.put_long(MAX_ID_KEY, max_id));
            }
            None => {
                info!(%base_date, "🗑️ METADATA: No job instance created before base date");
            }
        }
        Ok(RepeatStatus::Finished)
    }
}

/// Routes the flow to its end when the check step found nothing to delete
struct CheckMaxJobInstanceIdListener;

#[async_trait]
impl StepExecutionListener for CheckMaxJobInstanceIdListener {
    async fn after_step(
        &self,
        step: &mut StepExecution,
        job: &JobExecutionHandle,
    ) -> Result<Option<ExitStatus>, ListenerError> {
        if step.status == BatchStatus::Failed {
            return Ok(Some(ExitStatus::failed()));
        }
        let found = job.with(|job| job.execution_context.contains_key(MAX_ID_KEY));
        Ok((!found).then(|| ExitStatus::new(EMPTY_EXIT_CODE)))
    }
}

struct DeleteMetadataTasklet {
    store: Arc<dyn JobMetadataStore>,
}

#[async_trait]
impl Tasklet for DeleteMetadataTasklet {
    async fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &TaskletContext,
    ) -> Result<RepeatStatus, ItemError> {
        let max_id = context
            .job()
            .with(|job| job.execution_context.get_long(MAX_ID_KEY))
            .ok_or_else(|| ItemError::illegal_state(format!("{MAX_ID_KEY} missing from job context")))?;

        let resumed = context.with_step_execution(|step| step.execution_context.get_long(LOW_ID_KEY));
        let low = match resumed {
            Some(low) => low,
            None => match self
                .store
                .min_job_instance_id()
                .await
                .map_err(|e| ItemError::io(e.to_string()))?
            {
                Some(low) => low,
                None => return Ok(RepeatStatus::Finished),
            },
        };
        if low > max_id {
            return Ok(RepeatStatus::Finished);
        }

        let high = (low + DELETION_RANGE_LENGTH - 1).min(max_id);
        let deleted = self
            .store
            .delete_job_instances_in_range(low, high)
            .await
            .map_err(|e| ItemError::io(e.to_string()))?;
        info!(low, high, deleted, "🗑️ METADATA: Deleted job instances");
        contribution.increment_write_count(deleted);

        context.with_step_execution(|step| step.execution_context.put_long(LOW_ID_KEY, high + 1));
        Ok(RepeatStatus::continue_if(high < max_id))
    }
}
