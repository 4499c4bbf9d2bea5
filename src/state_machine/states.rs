use serde::{Deserialize, Serialize};
use std::fmt;

/// Status shared by job and step executions.
///
/// Variants are declared in escalation order: [`BatchStatus::upgrade_to`] keeps the more
/// severe of two statuses, which is how split branches and partitions are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Execution finished successfully
    Completed,
    /// Execution record created, work not begun
    Starting,
    /// Work in progress
    Started,
    /// Stop requested, waiting for the next safe point
    Stopping,
    /// Stopped at a safe point, restartable
    Stopped,
    /// Execution failed
    Failed,
    /// Operator gave up on the execution, not restartable
    Abandoned,
    /// State could not be determined
    Unknown,
}

impl BatchStatus {
    /// Check if the execution is still in flight
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Check if this is an unsuccessful terminal state
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, Self::Failed | Self::Abandoned | Self::Unknown)
    }

    /// Check if no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Failed | Self::Abandoned | Self::Unknown
        )
    }

    /// Combine two statuses keeping the more severe one
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        self.max(other)
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        Self::Starting
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Started => write!(f, "STARTED"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Abandoned => write!(f, "ABANDONED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(Self::Completed),
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            "FAILED" => Ok(Self::Failed),
            "ABANDONED" => Ok(Self::Abandoned),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_groups() {
        assert!(BatchStatus::Started.is_running());
        assert!(BatchStatus::Stopping.is_running());
        assert!(!BatchStatus::Stopped.is_running());
        assert!(BatchStatus::Failed.is_unsuccessful());
        assert!(!BatchStatus::Completed.is_unsuccessful());
        assert!(BatchStatus::Stopped.is_terminal());
        assert!(!BatchStatus::Starting.is_terminal());
    }

    #[test]
    fn test_upgrade_keeps_most_severe() {
        assert_eq!(
            BatchStatus::Completed.upgrade_to(BatchStatus::Failed),
            BatchStatus::Failed
        );
        assert_eq!(
            BatchStatus::Stopped.upgrade_to(BatchStatus::Completed),
            BatchStatus::Stopped
        );
        assert_eq!(
            BatchStatus::Failed.upgrade_to(BatchStatus::Stopped),
            BatchStatus::Failed
        );
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(BatchStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(
            "STOPPED".parse::<BatchStatus>().unwrap(),
            BatchStatus::Stopped
        );
        assert!("running".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&BatchStatus::Abandoned).unwrap();
        assert_eq!(json, "\"ABANDONED\"");
        let parsed: BatchStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, BatchStatus::Abandoned);
    }
}
