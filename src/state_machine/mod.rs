//! State machines for job and step executions.
//!
//! Transitions are pure table lookups: the current [`BatchStatus`] plus an event
//! yields the next status or an [`StateMachineError::InvalidTransition`].

pub mod events;
pub mod states;

pub use events::{JobEvent, StepEvent};
pub use states::BatchStatus;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: BatchStatus, event: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// Determine the next job status for an event
pub fn job_target_state(current: BatchStatus, event: &JobEvent) -> StateMachineResult<BatchStatus> {
    let target = match (current, event) {
        (BatchStatus::Starting, JobEvent::Start) => BatchStatus::Started,

        (BatchStatus::Started | BatchStatus::Stopping, JobEvent::Complete) => {
            BatchStatus::Completed
        }

        (BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping, JobEvent::Fail(_)) => {
            BatchStatus::Failed
        }

        (BatchStatus::Starting | BatchStatus::Started, JobEvent::RequestStop) => {
            BatchStatus::Stopping
        }

        (BatchStatus::Started | BatchStatus::Stopping, JobEvent::Stop) => BatchStatus::Stopped,

        (BatchStatus::Stopped | BatchStatus::Failed | BatchStatus::Unknown, JobEvent::Abandon) => {
            BatchStatus::Abandoned
        }

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Determine the next step status for an event
pub fn step_target_state(
    current: BatchStatus,
    event: &StepEvent,
) -> StateMachineResult<BatchStatus> {
    let target = match (current, event) {
        (BatchStatus::Starting, StepEvent::Start) => BatchStatus::Started,
        (BatchStatus::Started | BatchStatus::Stopping, StepEvent::Complete) => BatchStatus::Completed,
        (BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping, StepEvent::Fail(_)) => {
            BatchStatus::Failed
        }
        (BatchStatus::Started | BatchStatus::Stopping, StepEvent::Stop) => BatchStatus::Stopped,
        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from,
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}
