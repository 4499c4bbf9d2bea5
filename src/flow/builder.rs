use std::collections::{BTreeMap, BTreeSet};

use super::{next_node_id, Flow, FlowNode, State, Transition, TransitionTarget};
use crate::error::{BatchError, BatchResult};
use crate::models::ExitStatus;

/// Fluent construction of a [`Flow`].
///
/// ```rust,ignore
/// let flow = FlowBuilder::new("import")
///     .start(validate)
///     .on("COMPLETED").to(load)
///     .from(validate).on("FAILED").to(report)
///     .from(validate).on("*").stop()
///     .build()?;
/// ```
///
/// `next` chains on `COMPLETED` and fails the flow for any other exit code. States
/// left without outgoing transitions end the flow: COMPLETED ends it successfully and
/// anything else fails it.
pub struct FlowBuilder {
    name: String,
    start: Option<String>,
    current: Option<String>,
    states: BTreeMap<String, State>,
    fail_otherwise: BTreeSet<String>,
    /// Names claimed by more than one distinct node
    conflicts: BTreeSet<String>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            current: None,
            states: BTreeMap::new(),
            fail_otherwise: BTreeSet::new(),
            conflicts: BTreeSet::new(),
        }
    }

    pub fn start(mut self, node: impl Into<FlowNode>) -> Self {
        let name = self.register(node.into());
        self.start = Some(name.clone());
        self.current = Some(name);
        self
    }

    /// Continue with `node` when the current state completes
    pub fn next(mut self, node: impl Into<FlowNode>) -> Self {
        let node = node.into();
        let Some(current) = self.current.clone() else {
            return self.start(node);
        };
        let name = self.register(node);
        self.add_transition(&current, Transition::new(ExitStatus::COMPLETED, TransitionTarget::Node(name.clone())));
        self.fail_otherwise.insert(current);
        self.current = Some(name);
        self
    }

    /// Start a transition from the current state for exit codes matching `pattern`
    pub fn on(self, pattern: impl Into<String>) -> TransitionBuilder {
        TransitionBuilder {
            builder: self,
            pattern: pattern.into(),
        }
    }

    /// Make `node` the current state, registering it if needed
    pub fn from(mut self, node: impl Into<FlowNode>) -> Self {
        let name = self.register(node.into());
        if self.start.is_none() {
            self.start = Some(name.clone());
        }
        self.current = Some(name);
        self
    }

    pub fn build(mut self) -> BatchResult<Flow> {
        let start = self.start.take().ok_or_else(|| {
            BatchError::Configuration(format!("flow {} has no start state", self.name))
        })?;
        if let Some(name) = self.conflicts.first() {
            return Err(BatchError::Configuration(format!(
                "flow {}: two different nodes are named {name}",
                self.name
            )));
        }

        for name in &self.fail_otherwise {
            if let Some(state) = self.states.get_mut(name) {
                if !state.transitions.iter().any(Transition::is_wildcard) {
                    state.transitions.push(Transition::new("*", TransitionTarget::Fail));
                }
            }
        }
        for state in self.states.values_mut() {
            if state.transitions.is_empty() {
                state.transitions.push(Transition::new(ExitStatus::COMPLETED, TransitionTarget::End(None)));
                state.transitions.push(Transition::new("*", TransitionTarget::Fail));
            }
        }

        for state in self.states.values() {
            for transition in &state.transitions {
                let target = match &transition.target {
                    TransitionTarget::Node(target) | TransitionTarget::StopAndRestart(target) => target,
                    _ => continue,
                };
                if !self.states.contains_key(target) {
                    return Err(BatchError::Configuration(format!(
                        "flow {}: transition {} from {} leads to unknown state {target}",
                        self.name, transition.pattern, state.name
                    )));
                }
            }
        }

        let flow = Flow {
            id: next_node_id(),
            name: self.name,
            start,
            states: self.states,
        };
        flow.validate_unique_step_names()?;
        Ok(flow)
    }

    /// Register `node` under its name. Naming an already registered node again refers
    /// to that node; a different node with the same name is a conflict.
    fn register(&mut self, node: FlowNode) -> String {
        let name = node.name().to_string();
        match self.states.get(&name) {
            Some(existing) => {
                if !existing.node.is_same_node(&node) {
                    self.conflicts.insert(name.clone());
                }
            }
            None => {
                self.states.insert(
                    name.clone(),
                    State {
                        name: name.clone(),
                        node,
                        transitions: Vec::new(),
                    },
                );
            }
        }
        name
    }

    fn add_transition(&mut self, from: &str, transition: Transition) {
        if let Some(state) = self.states.get_mut(from) {
            state.transitions.push(transition);
        }
    }

    fn add_from_current(mut self, pattern: String, target: TransitionTarget) -> Self {
        if let Some(current) = self.current.clone() {
            self.add_transition(&current, Transition::new(pattern, target));
        }
        self
    }
}

/// Pending transition created by [`FlowBuilder::on`]
pub struct TransitionBuilder {
    builder: FlowBuilder,
    pattern: String,
}

impl TransitionBuilder {
    /// Continue with `node`, which becomes the current state
    pub fn to(self, node: impl Into<FlowNode>) -> FlowBuilder {
        let mut builder = self.builder;
        let name = builder.register(node.into());
        let mut builder = builder.add_from_current(self.pattern, TransitionTarget::Node(name.clone()));
        builder.current = Some(name);
        builder
    }

    pub fn end(self) -> FlowBuilder {
        self.builder.add_from_current(self.pattern, TransitionTarget::End(None))
    }

    /// End successfully with a custom exit code
    pub fn end_with(self, exit_code: impl Into<String>) -> FlowBuilder {
        self.builder
            .add_from_current(self.pattern, TransitionTarget::End(Some(exit_code.into())))
    }

    pub fn fail(self) -> FlowBuilder {
        self.builder.add_from_current(self.pattern, TransitionTarget::Fail)
    }

    pub fn stop(self) -> FlowBuilder {
        self.builder.add_from_current(self.pattern, TransitionTarget::Stop)
    }

    /// Stop now and continue with `node` when the job is restarted
    pub fn stop_and_restart(self, node: impl Into<FlowNode>) -> FlowBuilder {
        let mut builder = self.builder;
        let name = builder.register(node.into());
        builder.add_from_current(self.pattern, TransitionTarget::StopAndRestart(name))
    }
}
