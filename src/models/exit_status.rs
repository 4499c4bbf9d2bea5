use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit status of a job, step or flow, used to drive flow transitions.
///
/// The exit code is free-form: besides the well-known codes below, steps and deciders
/// may return any custom code (for example `"EMPTY"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn with_description(exit_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: description.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }

    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combine with another status: the more severe code wins, custom codes being the
    /// most severe, and descriptions are concatenated.
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut combined = if other.severity() > self.severity() {
            ExitStatus::new(other.exit_code.clone())
        } else {
            ExitStatus::new(self.exit_code.clone())
        };
        combined.exit_description = join_descriptions(&self.exit_description, &other.exit_description);
        combined
    }

    pub fn replace_exit_code(&self, exit_code: impl Into<String>) -> ExitStatus {
        ExitStatus {
            exit_code: exit_code.into(),
            exit_description: self.exit_description.clone(),
        }
    }

    pub fn add_exit_description(&self, description: impl AsRef<str>) -> ExitStatus {
        ExitStatus {
            exit_code: self.exit_code.clone(),
            exit_description: join_descriptions(&self.exit_description, description.as_ref()),
        }
    }
}

fn join_descriptions(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ if first == second => first.to_string(),
        _ => format!("{first}; {second}"),
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_prefers_more_severe() {
        let completed = ExitStatus::completed();
        let failed = ExitStatus::failed();
        assert_eq!(completed.and(&failed).exit_code, "FAILED");
        assert_eq!(failed.and(&completed).exit_code, "FAILED");
        assert_eq!(ExitStatus::executing().and(&completed).exit_code, "COMPLETED");
    }

    #[test]
    fn test_custom_code_wins() {
        let custom = ExitStatus::new("EMPTY");
        assert_eq!(ExitStatus::completed().and(&custom).exit_code, "EMPTY");
        assert_eq!(ExitStatus::failed().and(&custom).exit_code, "EMPTY");
    }

    #[test]
    fn test_descriptions_are_joined() {
        let first = ExitStatus::with_description("FAILED", "reader broke");
        let combined = first.add_exit_description("writer broke");
        assert_eq!(combined.exit_description, "reader broke; writer broke");
        assert_eq!(combined.to_string(), "FAILED (reader broke; writer broke)");
    }
}
