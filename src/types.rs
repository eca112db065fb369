use std::fmt;
use std::str::FromStr;

use crate::errors::{FlowdagError, Result};

/// Identity of a user-declared flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId {
    flow_group: String,
    flow_name: String,
}

impl FlowId {
    /// Both parts must be non-empty.
    pub fn new(flow_group: impl Into<String>, flow_name: impl Into<String>) -> Result<Self> {
        let flow_group = flow_group.into();
        let flow_name = flow_name.into();

        if flow_group.trim().is_empty() || flow_name.trim().is_empty() {
            return Err(FlowdagError::ConfigError(format!(
                "flow group and name must be non-empty (got '{flow_group}'/'{flow_name}')"
            )));
        }

        Ok(Self {
            flow_group,
            flow_name,
        })
    }

    pub fn flow_group(&self) -> &str {
        &self.flow_group
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// Catalog URI of this flow, e.g. `flow:/g/f`.
    pub fn spec_uri(&self) -> String {
        format!("flow:/{}/{}", self.flow_group, self.flow_name)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_group, self.flow_name)
    }
}

/// Parses the `GROUP/NAME` form used on the command line.
impl FromStr for FlowId {
    type Err = FlowdagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((group, name)) => FlowId::new(group, name),
            None => Err(FlowdagError::ConfigError(format!(
                "invalid flow id '{s}' (expected GROUP/NAME)"
            ))),
        }
    }
}

/// Identity of one flow execution, i.e. one Dag.
///
/// The string form `<group>_<name>_<executionId>` is the key used by every
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DagId {
    pub flow_group: String,
    pub flow_name: String,
    pub flow_execution_id: i64,
}

impl DagId {
    pub fn new(
        flow_group: impl Into<String>,
        flow_name: impl Into<String>,
        flow_execution_id: i64,
    ) -> Self {
        Self {
            flow_group: flow_group.into(),
            flow_name: flow_name.into(),
            flow_execution_id,
        }
    }

    pub fn flow_id(&self) -> Result<FlowId> {
        FlowId::new(self.flow_group.clone(), self.flow_name.clone())
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.flow_group, self.flow_name, self.flow_execution_id
        )
    }
}

/// Kind of externally posted flow action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Launch,
    Resume,
    Kill,
    Advance,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Launch => "LAUNCH",
            ActionType::Resume => "RESUME",
            ActionType::Kill => "KILL",
            ActionType::Advance => "ADVANCE",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = FlowdagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LAUNCH" => Ok(ActionType::Launch),
            "RESUME" => Ok(ActionType::Resume),
            "KILL" => Ok(ActionType::Kill),
            "ADVANCE" => Ok(ActionType::Advance),
            other => Err(FlowdagError::TaskConstructionFailed(format!(
                "unknown flow action type: {other}"
            ))),
        }
    }
}

/// A pending request to act on a Dag. Leases are taken per action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowAction {
    pub dag_id: DagId,
    pub action_type: ActionType,
}

impl FlowAction {
    pub fn new(dag_id: DagId, action_type: ActionType) -> Self {
        Self {
            dag_id,
            action_type,
        }
    }

    /// Key used by the lease arbiter and the action store.
    pub fn key(&self) -> String {
        format!("{}:{}", self.dag_id, self.action_type)
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action_type, self.dag_id)
    }
}
