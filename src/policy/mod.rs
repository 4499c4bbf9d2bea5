//! # Retry and Skip Policy
//!
//! Decides what happens to an item-level failure inside a fault-tolerant chunk step.
//!
//! ## Decision Flow
//!
//! ```text
//! ┌──────────┐  retryable, retries < limit   ┌───────┐
//! │ CLASSIFY │──────────────────────────────▶│ RETRY │
//! └──────────┘                               └───────┘
//!      │  skippable, skips < limit           ┌───────┐
//!      ├────────────────────────────────────▶│ SKIP  │
//!      │                                     └───────┘
//!      │  limits exhausted or unclassified   ┌───────┐
//!      └────────────────────────────────────▶│ FATAL │
//!                                            └───────┘
//! ```
//!
//! Classification uses [`ErrorClassifier`]s over [`ErrorKind`] lineages, so a rule for
//! `Runtime` also covers `IllegalArgument`. Exclusions (`no_retry`, `no_skip`) beat
//! inclusions at the same specificity.

pub mod backoff;
pub mod classifier;

pub use backoff::BackoffPolicy;
pub use classifier::ErrorClassifier;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::FaultToleranceConfig;
use crate::error::{ErrorKind, ItemError, Stage, StepError};

/// Policy states an error occurrence moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyState {
    Classify,
    Retry,
    Skip,
    Fatal,
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyState::Classify => write!(f, "CLASSIFY"),
            PolicyState::Retry => write!(f, "RETRY"),
            PolicyState::Skip => write!(f, "SKIP"),
            PolicyState::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Why an error ended up fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Neither retryable nor skippable
    Unclassified,
    /// Retryable but out of retries, and not skippable
    RetryExhausted,
    /// Skippable but the step's skip budget is spent
    SkipLimitExceeded,
}

/// Outcome of [`FaultTolerancePolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Skip,
    Fatal(FatalReason),
}

impl Decision {
    pub fn state(&self) -> PolicyState {
        match self {
            Decision::Retry => PolicyState::Retry,
            Decision::Skip => PolicyState::Skip,
            Decision::Fatal(_) => PolicyState::Fatal,
        }
    }
}

/// Retry and skip configuration of a fault-tolerant step
#[derive(Debug, Clone)]
pub struct FaultTolerancePolicy {
    /// Maximum re-executions of a failing stage for one item
    pub retry_limit: u32,
    /// Maximum skipped items per step execution
    pub skip_limit: u32,
    pub retryable: ErrorClassifier,
    pub skippable: ErrorClassifier,
    pub backoff: BackoffPolicy,
    /// Keep processor results across chunk write retries instead of re-processing
    pub processor_non_transactional: bool,
}

impl Default for FaultTolerancePolicy {
    fn default() -> Self {
        Self::from_config(&FaultToleranceConfig::default())
    }
}

impl FaultTolerancePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FaultToleranceConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            skip_limit: config.skip_limit,
            retryable: ErrorClassifier::new(),
            skippable: ErrorClassifier::new(),
            backoff: BackoffPolicy::None,
            processor_non_transactional: false,
        }
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn skip_limit(mut self, limit: u32) -> Self {
        self.skip_limit = limit;
        self
    }

    pub fn retry(mut self, kind: ErrorKind) -> Self {
        self.retryable.add_rule(kind, true);
        self
    }

    pub fn no_retry(mut self, kind: ErrorKind) -> Self {
        self.retryable.add_rule(kind, false);
        self
    }

    pub fn skip(mut self, kind: ErrorKind) -> Self {
        self.skippable.add_rule(kind, true);
        self
    }

    pub fn no_skip(mut self, kind: ErrorKind) -> Self {
        self.skippable.add_rule(kind, false);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn processor_non_transactional(mut self) -> Self {
        self.processor_non_transactional = true;
        self
    }

    pub fn is_retryable(&self, error: &ItemError) -> bool {
        self.retryable.classify(&error.kind)
    }

    pub fn is_skippable(&self, error: &ItemError) -> bool {
        self.skippable.classify(&error.kind)
    }

    /// Decide the fate of `error` given how often this item was already retried and
    /// how many items the step has skipped so far
    pub fn decide(&self, error: &ItemError, retries_done: u32, skips_so_far: u64) -> Decision {
        let retryable = self.is_retryable(error);
        if retryable && retries_done < self.retry_limit {
            return Decision::Retry;
        }
        if self.is_skippable(error) {
            return if skips_so_far < u64::from(self.skip_limit) {
                Decision::Skip
            } else {
                Decision::Fatal(FatalReason::SkipLimitExceeded)
            };
        }
        if retryable {
            Decision::Fatal(FatalReason::RetryExhausted)
        } else {
            Decision::Fatal(FatalReason::Unclassified)
        }
    }

    /// Step error for a fatal decision
    pub fn fatal_error(&self, reason: FatalReason, stage: Stage, error: ItemError) -> StepError {
        match reason {
            FatalReason::Unclassified => StepError::Fatal { stage, error },
            FatalReason::RetryExhausted => StepError::RetryExhausted {
                stage,
                limit: self.retry_limit,
                error,
            },
            FatalReason::SkipLimitExceeded => StepError::SkipLimitExceeded {
                stage,
                limit: self.skip_limit,
                error,
            },
        }
    }
}
