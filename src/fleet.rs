//! Fleet-level views: the watcher feedback loop and on-demand snapshots of
//! every running sandbox's session state.

use crate::cache::{CacheKey, Invalidator};
use crate::config::WatchConfig;
use crate::error::Result;
use crate::hierarchy::{self, HierarchyItem, SessionNode};
use crate::interaction::{self, FleetAttention, InteractionSummary, SandboxPending};
use crate::model::{PermissionRequest, QuestionRequest, RawSessionStatus, Sandbox, Session, Source};
use crate::router::FleetRouter;
use crate::startup::{ControlPlane, SessionService};
use crate::state::AppState;
use crate::stream::{consume_with_retry, EventSource, SourceConnector};
use crate::subscription::{ReconcileReport, SubscriptionManager};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session-service sources of every running sandbox.
pub fn active_sources(sandboxes: &[Sandbox]) -> BTreeSet<Source> {
    sandboxes.iter().filter_map(Sandbox::active_source).collect()
}

/// Keeps one session stream open per running sandbox.
///
/// Fleet events invalidate cache keys; every invalidation of the sandbox
/// list triggers a re-list and a reconcile. A periodic resync covers fleet
/// events missed while the fleet stream was reconnecting.
pub struct FleetWatcher<C> {
    control: Arc<C>,
    fleet_events: Arc<dyn EventSource>,
    subscriptions: SubscriptionManager,
    state: AppState,
    reconnect_delay: Duration,
    resync_interval: Duration,
}

impl<C: ControlPlane + 'static> FleetWatcher<C> {
    pub fn new(
        control: Arc<C>,
        fleet_events: Arc<dyn EventSource>,
        connector: Arc<dyn SourceConnector>,
        state: AppState,
        config: &WatchConfig,
    ) -> Self {
        let invalidator: Arc<dyn Invalidator> = state.tracker.clone();
        let subscriptions = SubscriptionManager::new(connector, invalidator)
            .with_reconnect_delay(config.reconnect_delay);
        Self {
            control,
            fleet_events,
            subscriptions,
            state,
            reconnect_delay: config.reconnect_delay,
            resync_interval: config.resync_interval,
        }
    }

    /// Run until `token` is cancelled, then close every stream and wait for
    /// all of them to finish.
    pub async fn run(mut self, token: CancellationToken) {
        let mut stale = self.state.tracker.subscribe();

        let fleet_token = token.child_token();
        let fleet_task = {
            let events = Arc::clone(&self.fleet_events);
            let tracker = Arc::clone(&self.state.tracker);
            let delay = self.reconnect_delay;
            let router = FleetRouter::new();
            let loop_token = fleet_token.clone();
            tokio::spawn(async move {
                consume_with_retry(events.as_ref(), delay, loop_token, move |event| {
                    for key in router.route(&event) {
                        debug!(key = %key, event = %event.kind, "invalidating");
                        tracker.invalidate(&key);
                    }
                })
                .await;
            })
        };

        let mut ticker = tokio::time::interval(self.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = stale.recv() => match received {
                    Ok(CacheKey::SandboxList) => {
                        if !self.resync_until(&token).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "invalidation feed lagged");
                        if !self.resync_until(&token).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                // First tick fires immediately, which is the initial sync.
                _ = ticker.tick() => {
                    if !self.resync_until(&token).await {
                        break;
                    }
                }
            }
        }

        fleet_token.cancel();
        self.subscriptions.shutdown().await;
        if let Err(e) = fleet_task.await {
            if e.is_panic() {
                warn!("fleet stream task panicked");
            }
        }
        self.state.sources.write().await.clear();
        info!("fleet watcher stopped");
    }

    /// Resync unless `token` fires first; false when cancelled.
    async fn resync_until(&mut self, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("resync abandoned on shutdown");
                false
            }
            _ = self.resync() => true,
        }
    }

    /// Re-list sandboxes and reconcile subscriptions. A listing failure
    /// leaves the current subscriptions as they are.
    pub async fn resync(&mut self) -> Option<ReconcileReport> {
        let sandboxes = match self.control.list_sandboxes().await {
            Ok(sandboxes) => sandboxes,
            Err(e) => {
                warn!(error = %e, "failed to list sandboxes, keeping current subscriptions");
                return None;
            }
        };

        let report = self.subscriptions.reconcile(active_sources(&sandboxes)).await;
        if !report.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                active = self.subscriptions.len(),
                "subscriptions reconciled"
            );
        }
        *self.state.sources.write().await = self.subscriptions.sources();
        Some(report)
    }
}

/// A session tagged with the sandbox it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSession {
    pub sandbox_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub source: Source,
    #[serde(flatten)]
    pub session: Session,
}

impl HierarchyItem for FleetSession {
    fn id(&self) -> &str {
        &self.session.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.session.parent_id.as_deref()
    }

    fn effective_time(&self) -> i64 {
        self.session.effective_time()
    }
}

/// Everything fetched from one running sandbox's session service.
#[derive(Debug, Clone)]
pub struct SandboxSnapshot {
    pub sandbox: Sandbox,
    pub source: Source,
    pub sessions: Vec<Session>,
    pub statuses: HashMap<String, RawSessionStatus>,
    pub permissions: Vec<PermissionRequest>,
    pub questions: Vec<QuestionRequest>,
}

impl SandboxSnapshot {
    pub fn tagged_sessions(&self) -> Vec<FleetSession> {
        self.sessions
            .iter()
            .map(|session| FleetSession {
                sandbox_id: self.sandbox.id.clone(),
                workspace_id: self.sandbox.workspace_id.clone(),
                source: self.source.clone(),
                session: session.clone(),
            })
            .collect()
    }

    pub fn hierarchy(&self) -> Vec<SessionNode<FleetSession>> {
        hierarchy::build(&self.tagged_sessions())
    }

    pub fn interactions(&self) -> InteractionSummary {
        interaction::aggregate(
            self.sessions.iter().map(|s| s.id.as_str()),
            &self.statuses,
            &self.permissions,
            &self.questions,
        )
    }

    pub fn pending(&self) -> SandboxPending {
        SandboxPending {
            sandbox_id: self.sandbox.id.clone(),
            workspace_id: self.sandbox.workspace_id.clone(),
            source: self.source.clone(),
            permissions: self.permissions.clone(),
            questions: self.questions.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub sandboxes: Vec<SandboxSnapshot>,
}

impl FleetSnapshot {
    /// Every session of every running sandbox, newest first.
    pub fn sessions(&self) -> Vec<FleetSession> {
        let mut sessions: Vec<FleetSession> = self
            .sandboxes
            .iter()
            .flat_map(SandboxSnapshot::tagged_sessions)
            .collect();
        sessions.sort_by(|a, b| b.effective_time().cmp(&a.effective_time()));
        sessions
    }

    pub fn attention(&self, now_ms: i64) -> FleetAttention {
        let pending: Vec<SandboxPending> =
            self.sandboxes.iter().map(SandboxSnapshot::pending).collect();
        interaction::collect_attention(&pending, now_ms)
    }
}

/// Fetch the session state of every running sandbox.
///
/// A sandbox whose session service fails to answer contributes empty
/// collections rather than failing the whole snapshot.
pub async fn collect_snapshot<C, S>(control: &C, service: &S) -> Result<FleetSnapshot>
where
    C: ControlPlane + ?Sized,
    S: SessionService + ?Sized,
{
    let sandboxes = control.list_sandboxes().await?;
    let running = sandboxes
        .into_iter()
        .filter_map(|sandbox| sandbox.active_source().map(|source| (sandbox, source)));

    let sandboxes = join_all(running.map(|(sandbox, source)| fetch_sandbox(service, sandbox, source))).await;
    Ok(FleetSnapshot { sandboxes })
}

async fn fetch_sandbox<S>(service: &S, sandbox: Sandbox, source: Source) -> SandboxSnapshot
where
    S: SessionService + ?Sized,
{
    let (sessions, statuses, permissions, questions) = tokio::join!(
        service.list_sessions(&source),
        service.session_statuses(&source),
        service.permissions(&source),
        service.questions(&source),
    );

    SandboxSnapshot {
        sessions: or_empty(sessions, &source, "sessions"),
        statuses: or_empty(statuses, &source, "session statuses"),
        permissions: or_empty(permissions, &source, "permissions"),
        questions: or_empty(questions, &source, "questions"),
        sandbox,
        source,
    }
}

fn or_empty<T: Default>(result: Result<T>, source: &Source, what: &str) -> T {
    result.unwrap_or_else(|e| {
        warn!(source = %source, error = %e, "failed to fetch {what}");
        T::default()
    })
}
