use tracing::warn;

use crate::error::StepError;
use crate::policy::ErrorClassifier;

/// Returned by a tasklet to ask for another iteration or to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    Continuable,
    Finished,
}

impl RepeatStatus {
    pub fn is_continuable(&self) -> bool {
        matches!(self, RepeatStatus::Continuable)
    }

    pub fn continue_if(condition: bool) -> Self {
        if condition {
            RepeatStatus::Continuable
        } else {
            RepeatStatus::Finished
        }
    }
}

/// Governs how often a step repeats its unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatTemplate {
    /// Repeat until the work signals it is finished
    #[default]
    UntilFinished,
    /// Stop after the given number of iterations even if more work is pending
    MaxIterations(u64),
}

impl RepeatTemplate {
    pub fn is_complete(&self, status: RepeatStatus, iterations: u64) -> bool {
        match self {
            RepeatTemplate::UntilFinished => !status.is_continuable(),
            RepeatTemplate::MaxIterations(max) => !status.is_continuable() || iterations >= *max,
        }
    }
}

/// Intercepts step failures before they fail the step.
///
/// Only item-level failures (fatal, retry exhausted, skip limit) can be suppressed.
/// Listener errors and infrastructure errors are always rethrown.
#[derive(Debug, Clone, Default)]
pub enum ExceptionHandler {
    /// Rethrow everything
    #[default]
    Rethrow,
    /// Log and suppress failures whose kind the classifier includes
    LogOrRethrow(ErrorClassifier),
    /// Suppress up to `limit` failures whose kind the classifier includes
    SimpleLimit {
        limit: u32,
        classifier: ErrorClassifier,
    },
}

impl ExceptionHandler {
    /// Whether `error` should be swallowed, given how many were swallowed already in
    /// this step execution
    pub fn suppresses(&self, error: &StepError, suppressed_so_far: u32) -> bool {
        let Some(item_error) = error.item_error() else {
            return false;
        };
        let suppress = match self {
            ExceptionHandler::Rethrow => false,
            ExceptionHandler::LogOrRethrow(classifier) => classifier.classify(&item_error.kind),
            ExceptionHandler::SimpleLimit { limit, classifier } => {
                classifier.classify(&item_error.kind) && suppressed_so_far < *limit
            }
        };
        if suppress {
            warn!(error = %error, suppressed = suppressed_so_far + 1, "🛡️ EXCEPTION HANDLER: Suppressed step failure");
        }
        suppress
    }
}

/// How chunks of a step are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskExecutor {
    /// One chunk at a time on the calling task
    #[default]
    Sync,
    /// Chunks run as separate tokio tasks, bounded by the step's throttle limit
    Concurrent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kinds, ItemError, Stage};

    #[test]
    fn test_repeat_template_completion() {
        let template = RepeatTemplate::UntilFinished;
        assert!(!template.is_complete(RepeatStatus::Continuable, 100));
        assert!(template.is_complete(RepeatStatus::Finished, 1));

        let bounded = RepeatTemplate::MaxIterations(3);
        assert!(!bounded.is_complete(RepeatStatus::Continuable, 2));
        assert!(bounded.is_complete(RepeatStatus::Continuable, 3));
    }

    #[test]
    fn test_exception_handlers() {
        let fatal = StepError::Fatal {
            stage: Stage::Tasklet,
            error: ItemError::io("disk"),
        };
        assert!(!ExceptionHandler::Rethrow.suppresses(&fatal, 0));

        let log = ExceptionHandler::LogOrRethrow(ErrorClassifier::new().include(kinds::IO));
        assert!(log.suppresses(&fatal, 10));

        let limited = ExceptionHandler::SimpleLimit {
            limit: 2,
            classifier: ErrorClassifier::new().include(kinds::ERROR),
        };
        assert!(limited.suppresses(&fatal, 1));
        assert!(!limited.suppresses(&fatal, 2));
        assert!(!limited.suppresses(&StepError::Interrupted, 0));
    }
}
