use std::fmt;

use crate::models::ExitStatus;

/// Where a transition leads once its pattern matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    /// Continue with the named state
    Node(String),
    /// End the flow as COMPLETED, optionally with a custom exit code
    End(Option<String>),
    /// End the flow as FAILED
    Fail,
    /// End the flow as STOPPED; a restart re-enters after this transition
    Stop,
    /// End the flow as STOPPED; a restart continues with the named state
    StopAndRestart(String),
}

impl fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTarget::Node(name) => write!(f, "{name}"),
            TransitionTarget::End(None) => write!(f, "end"),
            TransitionTarget::End(Some(code)) => write!(f, "end({code})"),
            TransitionTarget::Fail => write!(f, "fail"),
            TransitionTarget::Stop => write!(f, "stop"),
            TransitionTarget::StopAndRestart(name) => write!(f, "stop-and-restart({name})"),
        }
    }
}

/// Exit-code pattern and the target it routes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub pattern: String,
    pub target: TransitionTarget,
}

impl Transition {
    pub fn new(pattern: impl Into<String>, target: TransitionTarget) -> Self {
        Self {
            pattern: pattern.into(),
            target,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.pattern == "*"
    }

    fn is_exact(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }
}

/// Pick the transition for an exit code: an exact pattern first, then other
/// patterns in registration order, then the bare `*`
pub fn resolve<'a>(transitions: &'a [Transition], exit_status: &ExitStatus) -> Option<&'a Transition> {
    let code = exit_status.exit_code.as_str();
    transitions
        .iter()
        .find(|t| t.is_exact() && t.pattern == code)
        .or_else(|| {
            transitions
                .iter()
                .find(|t| !t.is_exact() && !t.is_wildcard() && pattern_matches(&t.pattern, code))
        })
        .or_else(|| transitions.iter().find(|t| t.is_wildcard()))
}

/// Glob match where `*` matches any run of characters and `?` exactly one
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some(&c) if c == '?' || c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    v = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("*", ""));
        assert!(pattern_matches("*", "FAILED"));
        assert!(pattern_matches("COMPLETED", "COMPLETED"));
        assert!(!pattern_matches("COMPLETED", "COMPLETED WITH SKIPS"));
        assert!(pattern_matches("COMPLETED*", "COMPLETED WITH SKIPS"));
        assert!(pattern_matches("C?MPLETED", "COMPLETED"));
        assert!(pattern_matches("*ED", "FAILED"));
        assert!(pattern_matches("F*L*D", "FAILED"));
        assert!(!pattern_matches("F?D", "FAILED"));
        assert!(!pattern_matches("", "X"));
    }

    #[test]
    fn test_resolve_prefers_exact_then_glob_then_wildcard() {
        let transitions = vec![
            Transition::new("*", TransitionTarget::Stop),
            Transition::new("FAIL*", TransitionTarget::Fail),
            Transition::new("FAILED", TransitionTarget::Node("stepB".to_string())),
            Transition::new("COMPLETED", TransitionTarget::End(None)),
        ];

        let failed = resolve(&transitions, &ExitStatus::failed()).unwrap();
        assert_eq!(failed.target, TransitionTarget::Node("stepB".to_string()));

        let fail_custom = resolve(&transitions, &ExitStatus::new("FAIL_HARD")).unwrap();
        assert_eq!(fail_custom.target, TransitionTarget::Fail);

        let other = resolve(&transitions, &ExitStatus::new("NOOP")).unwrap();
        assert_eq!(other.target, TransitionTarget::Stop);
    }

    #[test]
    fn test_resolve_without_wildcard_can_miss() {
        let transitions = vec![Transition::new("COMPLETED", TransitionTarget::End(None))];
        assert!(resolve(&transitions, &ExitStatus::failed()).is_none());
    }
}
