//! Rouse core types: intents, resource descriptors, events, workflow state.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Errors suitable for transport across crate boundaries.
///
/// The variants map onto distinct handling policies: `NotFound` ends the
/// current reconcile cycle without requeue, `Discovery` is eligible for the
/// dispatcher's retry/backoff, `Filter` and `Stream` are fatal to the
/// observer that hit them, `Callback` carries a failed resume after a match.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("discovery: {0}")]
    Discovery(String),
    #[error("filter: {0}")]
    Filter(String),
    #[error("stream: {0}")]
    Stream(String),
    #[error("callback: {0}")]
    Callback(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Kind of change carried by a lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// A single resource lifecycle event. Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub change: ChangeType,
    /// Kind of the object carried in `payload`. Broad watch channels may
    /// deliver kinds other than the one an observer subscribed for.
    pub kind: String,
    /// Arbitrary object tree, the generic shape of a resource instance.
    pub payload: serde_json::Value,
}

/// Symbolic identification of a resource type. Empty strings mean
/// "unspecified"; discovery fills the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. "configmaps".
    pub plural: String,
}

impl ResourceDescriptor {
    /// A descriptor is directly watchable once version and plural name are
    /// known. The group may legitimately be empty (core API group).
    pub fn is_fully_specified(&self) -> bool {
        !self.version.is_empty() && !self.plural.is_empty()
    }
}

/// Resolved, concrete form of a [`ResourceDescriptor`], usable to open an
/// event stream. Owned by an observer for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceHandle {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceHandle {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Reference to the workflow an intent wants resumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkflowPhase {
    Pending,
    Running,
    Suspended,
    Succeeded,
    Failed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeKind {
    Pod,
    Steps,
    Dag,
    Suspend,
}

/// A single node of a workflow's execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
    pub phase: WorkflowPhase,
}

/// Observed state of a workflow as reported by the workflow store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub phase: WorkflowPhase,
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowState {
    /// Whether the workflow is paused waiting for an external resume signal:
    /// either suspended as a whole or sitting on a running Suspend node.
    pub fn is_suspended(&self) -> bool {
        if self.phase == WorkflowPhase::Suspended {
            return true;
        }
        self.phase == WorkflowPhase::Running
            && self
                .nodes
                .iter()
                .any(|n| n.kind == NodeKind::Suspend && n.phase == WorkflowPhase::Running)
    }
}

/// User-declared intent: "resume workflow W when a resource matching the
/// filters appears". Read-only to this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub namespace: String,
    pub workflow: WorkflowRef,
    pub resource: ResourceDescriptor,
    /// Filter expressions, `<dotted.path><op><literal>`, ANDed together.
    pub filters: Vec<String>,
}

impl Intent {
    /// Identity key used for duplicate-subscription tracking.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
