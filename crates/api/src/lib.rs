//! Rouse external interfaces.
//!
//! This crate defines the trait seams the engine consumes: a resource
//! directory (discovery), an event source (watch API) and a workflow store
//! (workflow engine). Implementations are injected into the controller and
//! observers; in-memory mocks for tests live here as well.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rouse_core::{Error, Event, ResourceHandle, Result, WorkflowState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One served resource kind as reported by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResourceEntry {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. "configmaps".
    pub name: String,
}

/// Discovery service resolving symbolic descriptors to served kinds.
#[async_trait::async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// List served resource kinds under a group/version. Empty group/version
    /// act as wildcards. Fails with [`Error::Discovery`] on transport or
    /// malformed-response faults.
    async fn list_resource_kinds(&self, group: &str, version: &str)
        -> Result<Vec<ApiResourceEntry>>;
}

/// Live subscription to resource lifecycle events. Single consumer; dropping
/// the stream closes the subscription.
pub struct EventStream {
    pub rx: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the source has closed the stream.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Watch API producing an unbounded stream of change events for a resolved
/// resource handle within a namespace.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn open_stream(&self, handle: &ResourceHandle, namespace: &str) -> Result<EventStream>;
}

/// External workflow engine: state lookup and the resume transition.
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Fails with [`Error::NotFound`] when the workflow does not exist.
    async fn get(&self, name: &str, namespace: &str) -> Result<WorkflowState>;
    /// Transition a paused workflow back to running.
    async fn resume(&self, name: &str, namespace: &str) -> Result<()>;
}

fn queue_cap() -> usize {
    std::env::var("ROUSE_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(256)
}

// ----------------- Mock implementations -----------------

/// In-memory directory over a fixed entry set.
#[derive(Default)]
pub struct MockDirectory {
    pub entries: Vec<ApiResourceEntry>,
    pub fail: bool,
}

impl MockDirectory {
    pub fn with_entries(entries: Vec<ApiResourceEntry>) -> Self {
        Self { entries, fail: false }
    }

    pub fn failing() -> Self {
        Self { entries: Vec::new(), fail: true }
    }
}

#[async_trait::async_trait]
impl ResourceDirectory for MockDirectory {
    async fn list_resource_kinds(
        &self,
        group: &str,
        version: &str,
    ) -> Result<Vec<ApiResourceEntry>> {
        if self.fail {
            return Err(Error::Discovery("mock directory unreachable".into()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| {
                (group.is_empty() || e.group == group)
                    && (version.is_empty() || e.version == version)
            })
            .cloned()
            .collect())
    }
}

/// Scripted event source. Each `open_stream` call delivers the scripted
/// events in order; with `hold_open` the stream then stays open (no further
/// events) until the receiver is dropped, otherwise it ends.
#[derive(Default)]
pub struct MockEventSource {
    script: Vec<Event>,
    hold_open: bool,
    fail_open: bool,
    opened: AtomicUsize,
    retained: Mutex<Vec<mpsc::Sender<Event>>>,
}

impl MockEventSource {
    pub fn with_events(script: Vec<Event>) -> Self {
        Self { script, ..Default::default() }
    }

    /// Keep streams open after the script has been delivered.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn failing() -> Self {
        Self { fail_open: true, ..Default::default() }
    }

    /// Number of streams opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventSource for MockEventSource {
    async fn open_stream(&self, handle: &ResourceHandle, namespace: &str) -> Result<EventStream> {
        if self.fail_open {
            return Err(Error::Stream("mock event source refused to open".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(gvk = %handle.gvk_key(), ns = %namespace, "mock stream opened");
        let cap = queue_cap().max(self.script.len() + 1);
        let (tx, rx) = mpsc::channel(cap);
        for ev in &self.script {
            // Capacity covers the whole script, so this cannot fail.
            let _ = tx.try_send(ev.clone());
        }
        if self.hold_open {
            self.retained
                .lock()
                .expect("mock source mutex poisoned")
                .push(tx);
        }
        Ok(EventStream { rx })
    }
}

/// In-memory workflow store keyed by `namespace/name`.
#[derive(Default)]
pub struct MockWorkflowStore {
    workflows: Mutex<HashMap<String, WorkflowState>>,
    resumed: Mutex<Vec<String>>,
    pub fail_resume: bool,
}

impl MockWorkflowStore {
    /// A store whose `resume` calls are refused.
    pub fn failing_resume() -> Self {
        Self { fail_resume: true, ..Default::default() }
    }

    pub fn insert(&self, name: &str, namespace: &str, state: WorkflowState) {
        self.workflows
            .lock()
            .expect("mock store mutex poisoned")
            .insert(format!("{namespace}/{name}"), state);
    }

    /// Keys of workflows resumed so far, in call order.
    pub fn resumed(&self) -> Vec<String> {
        self.resumed.lock().expect("mock store mutex poisoned").clone()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for MockWorkflowStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<WorkflowState> {
        self.workflows
            .lock()
            .expect("mock store mutex poisoned")
            .get(&format!("{namespace}/{name}"))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {namespace}/{name}")))
    }

    async fn resume(&self, name: &str, namespace: &str) -> Result<()> {
        if self.fail_resume {
            return Err(Error::Internal(format!(
                "resume refused for {namespace}/{name}"
            )));
        }
        self.resumed
            .lock()
            .expect("mock store mutex poisoned")
            .push(format!("{namespace}/{name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rouse_core::{ChangeType, WorkflowPhase};

    fn handle() -> ResourceHandle {
        ResourceHandle {
            group: String::new(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
            plural: "configmaps".into(),
        }
    }

    #[tokio::test]
    async fn scripted_stream_delivers_in_order_then_closes() {
        let src = MockEventSource::with_events(vec![
            Event { change: ChangeType::Created, kind: "ConfigMap".into(), payload: serde_json::json!({"n": 1}) },
            Event { change: ChangeType::Updated, kind: "ConfigMap".into(), payload: serde_json::json!({"n": 2}) },
        ]);
        let mut stream = src.open_stream(&handle(), "ns").await.expect("opens");
        assert_eq!(stream.next().await.expect("first").payload["n"], 1);
        assert_eq!(stream.next().await.expect("second").payload["n"], 2);
        assert!(stream.next().await.is_none());
        assert_eq!(src.opened(), 1);
    }

    #[tokio::test]
    async fn held_open_stream_does_not_close() {
        let src = MockEventSource::with_events(vec![]).held_open();
        let mut stream = src.open_stream(&handle(), "ns").await.expect("opens");
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err(), "stream should still be open");
    }

    #[tokio::test]
    async fn workflow_store_round_trip() {
        let store = MockWorkflowStore::default();
        store.insert("wf", "ns", WorkflowState { phase: WorkflowPhase::Suspended, nodes: vec![] });
        assert!(store.get("wf", "ns").await.expect("found").is_suspended());
        assert!(matches!(store.get("gone", "ns").await, Err(Error::NotFound(_))));
        store.resume("wf", "ns").await.expect("resumes");
        assert_eq!(store.resumed(), vec!["ns/wf".to_string()]);
    }
}
