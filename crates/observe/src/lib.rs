//! Rouse observer: owns one watch subscription and the one-shot dispatch
//! protocol. The callback bound to a matching event is invoked at most once
//! per observer instance, and only after a successful filter match.

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;

use rouse_api::EventSource;
use rouse_core::{ResourceHandle, Result};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Lifecycle of an observer. Terminal states are `Fired`, `Failed` and
/// `Cancelled`; a fired observer never re-enters `Watching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Initialized,
    Watching,
    Fired,
    Failed,
    Cancelled,
}

/// How a run ended when it did not fail: the callback fired, or the stream
/// closed (source exhausted or externally cancelled) without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fired,
    Closed,
}

/// Handle cancelling a running observer. Dropping it without calling
/// [`CancelHandle::cancel`] cancels as well; the owner is gone.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Create a linked cancel handle/receiver pair for [`Observer::run`].
pub fn cancellation() -> (CancelHandle, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    (CancelHandle { tx: Some(tx) }, rx)
}

pub struct Observer {
    source: Arc<dyn EventSource>,
    handle: ResourceHandle,
    namespace: String,
    filters: Vec<String>,
    state_tx: watch::Sender<ObserverState>,
}

impl Observer {
    pub fn new(
        source: Arc<dyn EventSource>,
        handle: ResourceHandle,
        namespace: String,
        filters: Vec<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ObserverState::Initialized);
        Self { source, handle, namespace, filters, state_tx }
    }

    /// Subscribe to lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ObserverState> {
        self.state_tx.subscribe()
    }

    /// Watch until the first event passing all filters, then invoke
    /// `callback` exactly once and return its result. Blocking; the caller
    /// decides whether to spawn it.
    ///
    /// Failure to open the stream is fatal and not retried here; restart
    /// policy belongs to whoever supervises the observer. A closed stream or
    /// external cancellation before any match ends the run with
    /// [`Outcome::Closed`] and the callback is never invoked.
    pub async fn run<F, Fut>(self, mut cancel_rx: oneshot::Receiver<()>, callback: F) -> Result<Outcome>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut stream = match self.source.open_stream(&self.handle, &self.namespace).await {
            Ok(s) => s,
            Err(e) => {
                self.state_tx.send_replace(ObserverState::Failed);
                warn!(gvk = %self.handle.gvk_key(), error = %e, "failed to open event stream");
                return Err(e);
            }
        };
        self.state_tx.send_replace(ObserverState::Watching);
        info!(
            gvk = %self.handle.gvk_key(),
            ns = %self.namespace,
            filters = self.filters.len(),
            "watching for resources"
        );

        loop {
            tokio::select! {
                // Biased with the event arm first: when a match and a
                // cancellation are both ready, "already fired" wins.
                biased;
                ev = stream.next() => {
                    let event = match ev {
                        Some(ev) => ev,
                        None => {
                            self.state_tx.send_replace(ObserverState::Cancelled);
                            info!(gvk = %self.handle.gvk_key(), "stream closed without a match");
                            return Ok(Outcome::Closed);
                        }
                    };
                    if event.kind != self.handle.kind {
                        debug!(kind = %event.kind, want = %self.handle.kind, "discarding foreign kind");
                        continue;
                    }
                    match rouse_filter::evaluate(&event.payload, &self.filters) {
                        Err(e) => {
                            self.state_tx.send_replace(ObserverState::Failed);
                            warn!(error = %e, "unable to evaluate resource filters");
                            return Err(e);
                        }
                        Ok(false) => {
                            debug!(change = ?event.change, "event did not pass the filters");
                            continue;
                        }
                        Ok(true) => {
                            // Release the subscription before dispatching.
                            drop(stream);
                            self.state_tx.send_replace(ObserverState::Fired);
                            info!(gvk = %self.handle.gvk_key(), change = ?event.change, "resource fulfilled; dispatching");
                            return callback().await.map(|()| Outcome::Fired);
                        }
                    }
                }
                _ = &mut cancel_rx => {
                    self.state_tx.send_replace(ObserverState::Cancelled);
                    info!(gvk = %self.handle.gvk_key(), "observer cancelled before a match");
                    return Ok(Outcome::Closed);
                }
            }
        }
    }
}
