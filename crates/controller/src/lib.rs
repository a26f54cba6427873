//! Rouse reconciliation controller.
//!
//! Drives each intent to the point of having exactly one live observer (or
//! none when preconditions fail) and binds the observer's firing to workflow
//! resumption. Reconcile calls never block on the watch; each live observer
//! runs as its own background task, tracked in a per-intent registry that
//! structurally prevents duplicate subscriptions.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rouse_api::{EventSource, ResourceDirectory, WorkflowStore};
use rouse_core::{Error, Intent, Result, WorkflowRef};
use rouse_observe::{cancellation, CancelHandle, Observer, Outcome};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Outcome of one reconcile cycle, consumed by the external dispatcher that
/// owns retry/backoff policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
}

struct Slot {
    token: u64,
    cancel: Option<CancelHandle>,
}

/// Per-intent tracking of live observers. The only state shared between the
/// controller and its observer tasks; mutated under a single mutex so two
/// observers can never both believe they own the same intent key.
#[derive(Default)]
pub struct Registry {
    slots: Mutex<FxHashMap<String, Slot>>,
    next_token: AtomicU64,
}

impl Registry {
    /// Claim the key for a new observer. `None` while a previous claim is
    /// still live. The returned token identifies this claim in `release`.
    fn reserve(&self, key: &str) -> Option<(u64, oneshot::Receiver<()>)> {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        if slots.contains_key(key) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (cancel, rx) = cancellation();
        slots.insert(key.to_string(), Slot { token, cancel: Some(cancel) });
        Some((token, rx))
    }

    /// Drop the key's slot, but only for the claim that owns `token`; a
    /// stale release must not evict a successor observer.
    fn release(&self, key: &str, token: u64) {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        if slots.get(key).map(|s| s.token) == Some(token) {
            slots.remove(key);
        }
    }

    /// Cancel the live observer for `key`, if any. The slot itself is
    /// removed by the observer task once it winds down.
    fn cancel(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        match slots.get_mut(key).and_then(|s| s.cancel.take()) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.slots.lock().expect("registry mutex poisoned").contains_key(key)
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().expect("registry mutex poisoned").len()
    }
}

pub struct Reconciler {
    directory: Arc<dyn ResourceDirectory>,
    events: Arc<dyn EventSource>,
    workflows: Arc<dyn WorkflowStore>,
    registry: Arc<Registry>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn ResourceDirectory>,
        events: Arc<dyn EventSource>,
        workflows: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self { directory, events, workflows, registry: Arc::new(Registry::default()) }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Process one observed intent change.
    ///
    /// Returns `Ok` with no requeue for the terminal-but-normal outcomes
    /// (workflow gone, workflow not paused, observer already live); `Err`
    /// for faults eligible for the dispatcher's retry policy. Never blocks
    /// on the watch it may have started.
    pub async fn reconcile(&self, intent: &Intent) -> Result<ReconcileResult> {
        let key = intent.key();
        if self.registry.is_live(&key) {
            debug!(intent = %key, "observer already live; skipping");
            return Ok(ReconcileResult::default());
        }

        let wf = match self
            .workflows
            .get(&intent.workflow.name, &intent.workflow.namespace)
            .await
        {
            Ok(wf) => wf,
            Err(Error::NotFound(_)) => {
                // The workflow to be resumed is gone; the intent is moot.
                info!(
                    intent = %key,
                    workflow = %intent.workflow.name,
                    ns = %intent.workflow.namespace,
                    "referenced workflow not found; dropping intent"
                );
                return Ok(ReconcileResult::default());
            }
            Err(e) => return Err(e),
        };
        if !wf.is_suspended() {
            // Normal state, not an error; a later change may re-trigger us.
            debug!(intent = %key, phase = ?wf.phase, "workflow is not suspended; nothing to await");
            return Ok(ReconcileResult::default());
        }

        let handle = rouse_resolve::resolve(self.directory.as_ref(), &intent.resource).await?;

        let Some((token, cancel_rx)) = self.registry.reserve(&key) else {
            debug!(intent = %key, "lost reservation race; skipping");
            return Ok(ReconcileResult::default());
        };
        let observer = Observer::new(
            self.events.clone(),
            handle,
            intent.namespace.clone(),
            intent.filters.clone(),
        );

        let workflows = self.workflows.clone();
        let registry = self.registry.clone();
        let workflow = intent.workflow.clone();
        info!(intent = %key, workflow = %workflow.name, "starting observer");
        tokio::spawn(async move {
            let callback = resume_callback(workflows, workflow);
            match observer.run(cancel_rx, callback).await {
                Ok(Outcome::Fired) => info!(intent = %key, "workflow resumed"),
                Ok(Outcome::Closed) => info!(intent = %key, "observer closed without firing"),
                Err(e) => warn!(intent = %key, error = %e, "observer failed"),
            }
            registry.release(&key, token);
        });

        Ok(ReconcileResult::default())
    }

    /// Cancel the live observer for an intent, e.g. when the intent is
    /// deleted. Returns false when nothing was watching.
    pub fn cancel(&self, intent_key: &str) -> bool {
        self.registry.cancel(intent_key)
    }
}

fn resume_callback(
    workflows: Arc<dyn WorkflowStore>,
    workflow: WorkflowRef,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> + Send
{
    move || {
        Box::pin(async move {
            info!(workflow = %workflow.name, ns = %workflow.namespace, "resuming workflow");
            workflows
                .resume(&workflow.name, &workflow.namespace)
                .await
                .map_err(|e| Error::Callback(e.to_string()))
        })
    }
}
