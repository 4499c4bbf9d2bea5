use crate::error::ErrorKind;

/// Binary classifier over error kinds.
///
/// Each rule includes or excludes a kind together with all of its descendants. The
/// rule whose kind is nearest to the classified error's kind in its lineage decides;
/// when an include and an exclude rule are equally near, the exclusion wins. Errors
/// matching no rule get the default (false unless configured).
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
    default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClassifierRule {
    kind: ErrorKind,
    include: bool,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, kind: ErrorKind) -> Self {
        self.add_rule(kind, true);
        self
    }

    pub fn exclude(mut self, kind: ErrorKind) -> Self {
        self.add_rule(kind, false);
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn add_rule(&mut self, kind: ErrorKind, include: bool) {
        self.rules.push(ClassifierRule { kind, include });
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn classify(&self, kind: &ErrorKind) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            let Some(distance) = kind.distance_to(&rule.kind) else {
                continue;
            };
            best = match best {
                Some((nearest, _)) if distance < nearest => Some((distance, rule.include)),
                Some((nearest, included)) if distance == nearest => {
                    Some((nearest, included && rule.include))
                }
                Some(current) => Some(current),
                None => Some((distance, rule.include)),
            };
        }
        best.map_or(self.default, |(_, include)| include)
    }
}
