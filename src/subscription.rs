//! One event stream per active source, reconciled against the desired set.

use crate::cache::Invalidator;
use crate::config::RECONNECT_DELAY;
use crate::model::Source;
use crate::router::SessionRouter;
use crate::stream::{consume_with_retry, SourceConnector};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Handle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Handle {
    /// Cancel the consume loop and wait for it to exit.
    async fn close(self, source: &Source) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(source = %source, "subscription task panicked");
            }
        }
    }
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<Source>,
    pub removed: Vec<Source>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Owns every per-source subscription.
///
/// Mutation goes through `&mut self`, so reconciliation is serialized by
/// whoever owns the manager.
pub struct SubscriptionManager {
    connector: Arc<dyn SourceConnector>,
    invalidator: Arc<dyn Invalidator>,
    reconnect_delay: Duration,
    root: CancellationToken,
    handles: HashMap<Source, Handle>,
}

impl SubscriptionManager {
    pub fn new(connector: Arc<dyn SourceConnector>, invalidator: Arc<dyn Invalidator>) -> Self {
        Self {
            connector,
            invalidator,
            reconnect_delay: RECONNECT_DELAY,
            root: CancellationToken::new(),
            handles: HashMap::new(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Currently subscribed sources, sorted.
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.handles.keys().cloned().collect();
        sources.sort();
        sources
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Bring the live handles in line with `active`.
    ///
    /// Removed sources are cancelled and awaited before this returns. Sources
    /// that stay active keep their existing handle.
    pub async fn reconcile<I>(&mut self, active: I) -> ReconcileReport
    where
        I: IntoIterator<Item = Source>,
    {
        let desired: BTreeSet<Source> = active.into_iter().collect();

        let mut removed: Vec<Source> = self
            .handles
            .keys()
            .filter(|source| !desired.contains(*source))
            .cloned()
            .collect();
        removed.sort();

        let added: Vec<Source> = desired
            .iter()
            .filter(|source| !self.handles.contains_key(*source))
            .cloned()
            .collect();

        for source in &removed {
            if let Some(handle) = self.handles.remove(source) {
                info!(source = %source, "closing subscription");
                handle.close(source).await;
            }
        }

        for source in &added {
            info!(source = %source, "opening subscription");
            let handle = self.spawn(source.clone());
            self.handles.insert(source.clone(), handle);
        }

        ReconcileReport { added, removed }
    }

    fn spawn(&self, source: Source) -> Handle {
        let token = self.root.child_token();
        let events = self.connector.connect(&source);
        let router = SessionRouter::new(source);
        let invalidator = Arc::clone(&self.invalidator);
        let delay = self.reconnect_delay;
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            consume_with_retry(events.as_ref(), delay, loop_token, move |event| {
                for key in router.route(&event) {
                    debug!(source = %router.source(), key = %key, "invalidating");
                    invalidator.invalidate(&key);
                }
            })
            .await;
        });

        Handle { token, task }
    }

    /// Cancel every handle and wait for all consume loops to exit.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        let mut handles: Vec<(Source, Handle)> = self.handles.drain().collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        for (source, handle) in handles {
            handle.close(&source).await;
        }
        info!("subscriptions shut down");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        // Tasks left running here would outlive their owner.
        self.root.cancel();
    }
}
