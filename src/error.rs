//! Error types for the batch engine.
//!
//! Item-level failures ([`ItemError`]) are raised by readers, processors, writers and
//! tasklets and are classified by kind. Failures that abort a step surface as
//! [`StepError`], and everything that is reported to the caller of the engine is a
//! [`BatchError`].

use std::fmt;
use thiserror::Error;

/// Classification tag standing in for an exception class hierarchy.
///
/// The lineage lists kind names from the most specific to the root, so
/// `["IllegalArgument", "Runtime", "Error"]` is an `IllegalArgument` that is also a
/// `Runtime` and an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorKind {
    lineage: &'static [&'static str],
}

impl ErrorKind {
    pub const fn new(lineage: &'static [&'static str]) -> Self {
        Self { lineage }
    }

    /// Most specific name of this kind
    pub fn name(&self) -> &'static str {
        self.lineage.first().copied().unwrap_or("Error")
    }

    pub fn lineage(&self) -> &'static [&'static str] {
        self.lineage
    }

    /// Number of generalization steps from this kind up to `ancestor`, if related
    pub fn distance_to(&self, ancestor: &ErrorKind) -> Option<usize> {
        let target = ancestor.name();
        self.lineage.iter().position(|name| *name == target)
    }

    pub fn is_a(&self, ancestor: &ErrorKind) -> bool {
        self.distance_to(ancestor).is_some()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Standard kind tree
pub mod kinds {
    use super::ErrorKind;

    pub const ERROR: ErrorKind = ErrorKind::new(&["Error"]);
    pub const RUNTIME: ErrorKind = ErrorKind::new(&["Runtime", "Error"]);
    pub const ILLEGAL_ARGUMENT: ErrorKind =
        ErrorKind::new(&["IllegalArgument", "Runtime", "Error"]);
    pub const ILLEGAL_STATE: ErrorKind = ErrorKind::new(&["IllegalState", "Runtime", "Error"]);
    pub const PARSE: ErrorKind = ErrorKind::new(&["Parse", "IllegalArgument", "Runtime", "Error"]);
    pub const VALIDATION: ErrorKind = ErrorKind::new(&["Validation", "Runtime", "Error"]);
    pub const IO: ErrorKind = ErrorKind::new(&["Io", "Error"]);
    pub const TIMEOUT: ErrorKind = ErrorKind::new(&["Timeout", "Io", "Error"]);
}

/// Failure raised by user code while reading, processing or writing an item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(kinds::RUNTIME, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(kinds::ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(kinds::ILLEGAL_STATE, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(kinds::IO, message)
    }
}

/// Failure raised inside a listener callback. Never retried or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Listener error in {callback}: {message}")]
pub struct ListenerError {
    pub callback: String,
    pub message: String,
}

impl ListenerError {
    pub fn new(callback: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            message: message.into(),
        }
    }
}

/// Chunk stage an item failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Process,
    Write,
    Tasklet,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Read => write!(f, "read"),
            Stage::Process => write!(f, "process"),
            Stage::Write => write!(f, "write"),
            Stage::Tasklet => write!(f, "tasklet"),
        }
    }
}

/// Errors that abort the current step
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Fatal {stage} failure: {error}")]
    Fatal { stage: Stage, error: ItemError },

    #[error("Skip limit of {limit} exceeded during {stage}: {error}")]
    SkipLimitExceeded {
        stage: Stage,
        limit: u32,
        error: ItemError,
    },

    #[error("Retry limit of {limit} exhausted during {stage}: {error}")]
    RetryExhausted {
        stage: Stage,
        limit: u32,
        error: ItemError,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Step interrupted by stop request")]
    Interrupted,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StepError {
    /// Underlying item failure, if this error was caused by one
    pub fn item_error(&self) -> Option<&ItemError> {
        match self {
            StepError::Fatal { error, .. }
            | StepError::SkipLimitExceeded { error, .. }
            | StepError::RetryExhausted { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<BatchError> for StepError {
    fn from(error: BatchError) -> Self {
        match error {
            BatchError::Repository(msg) => StepError::Repository(msg),
            BatchError::Listener(err) => StepError::Listener(err),
            other => StepError::Configuration(other.to_string()),
        }
    }
}

/// Errors reported to callers of the engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Flow error: {0}")]
    Flow(String),

    #[error("Job instance already complete: job={job_name}, parameters={parameters}")]
    JobInstanceAlreadyComplete {
        job_name: String,
        parameters: String,
    },

    #[error("Job execution {execution_id} of {job_name} is already running")]
    JobExecutionAlreadyRunning {
        job_name: String,
        execution_id: i64,
    },

    #[error("Job restart error: {0}")]
    JobRestart(String),

    #[error("Step {step_name} exceeded its start limit of {limit}")]
    StartLimitExceeded { step_name: String, limit: u32 },

    #[error("No such job execution: {0}")]
    NoSuchJobExecution(i64),

    #[error("Job execution {0} is not running")]
    JobExecutionNotRunning(i64),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

impl From<crate::state_machine::StateMachineError> for BatchError {
    fn from(error: crate::state_machine::StateMachineError) -> Self {
        BatchError::InvalidState(error.to_string())
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        BatchError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for BatchError {
    fn from(error: config::ConfigError) -> Self {
        BatchError::Configuration(error.to_string())
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
pub type StepResult<T> = std::result::Result<T, StepError>;
