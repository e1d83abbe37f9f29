//! Sandbox startup: provision, wait for readiness, open a session and send
//! the first message.

use crate::config::StartupPolicy;
use crate::error::{Error, Result};
use crate::model::{
    CreatedSandbox, PermissionRequest, QuestionRequest, RawSessionStatus, Sandbox, SandboxStatus,
    Session, Source,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The fleet control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>>;
    async fn create_sandbox(&self, workspace_id: &str) -> Result<CreatedSandbox>;
    async fn get_sandbox(&self, id: &str) -> Result<Sandbox>;
}

/// A session created on a sandbox's session service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub id: String,
    pub directory: String,
}

/// A sandbox's session service, addressed by its source URL.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Any failure counts as unhealthy.
    async fn health_check(&self, source: &Source) -> bool;
    async fn list_sessions(&self, source: &Source) -> Result<Vec<Session>>;
    async fn session_statuses(&self, source: &Source) -> Result<HashMap<String, RawSessionStatus>>;
    async fn permissions(&self, source: &Source) -> Result<Vec<PermissionRequest>>;
    async fn questions(&self, source: &Source) -> Result<Vec<QuestionRequest>>;
    async fn create_session(&self, source: &Source, directory: Option<&str>) -> Result<CreatedSession>;
    async fn send_message(
        &self,
        source: &Source,
        session_id: &str,
        directory: Option<&str>,
        text: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub workspace_id: String,
    pub message: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub sandbox_id: String,
    pub session_id: String,
    pub session_url: String,
}

/// Link to a session in the session service's web UI.
pub fn session_url(source: &Source, directory: &str, session_id: &str) -> String {
    format!(
        "{}/{}/session/{}",
        source,
        URL_SAFE_NO_PAD.encode(directory.as_bytes()),
        session_id
    )
}

/// Drives one sandbox through startup. Stages run strictly in order and a
/// failure leaves earlier side effects in place.
pub struct StartupOrchestrator<C, S> {
    control: C,
    sessions: S,
    policy: StartupPolicy,
}

impl<C: ControlPlane, S: SessionService> StartupOrchestrator<C, S> {
    pub fn new(control: C, sessions: S) -> Self {
        Self {
            control,
            sessions,
            policy: StartupPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StartupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Like [`start_session`](Self::start_session), giving up with
    /// [`Error::Cancelled`] as soon as `token` is cancelled.
    pub async fn start_session_until(
        &self,
        request: &StartRequest,
        token: &CancellationToken,
    ) -> Result<StartedSession> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            started = self.start_session(request) => started,
        }
    }

    pub async fn start_session(&self, request: &StartRequest) -> Result<StartedSession> {
        let created = self
            .control
            .create_sandbox(&request.workspace_id)
            .await
            .map_err(|e| {
                warn!(workspace = %request.workspace_id, error = %e, "create sandbox failed");
                Error::Operation("Failed to create sandbox".into())
            })?;
        let sandbox_id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Operation("Failed to create sandbox".into()))?;
        info!(sandbox = %sandbox_id, workspace = %request.workspace_id, "sandbox created");

        let source = self.wait_for_sandbox(&sandbox_id).await?;
        self.wait_for_session_service(&source).await?;

        let session = self
            .sessions
            .create_session(&source, request.directory.as_deref())
            .await
            .map_err(into_operation)?;
        info!(sandbox = %sandbox_id, session = %session.id, "session created");

        tokio::time::sleep(self.policy.settle_delay).await;

        self.sessions
            .send_message(&source, &session.id, request.directory.as_deref(), &request.message)
            .await
            .map_err(into_operation)?;

        Ok(StartedSession {
            session_url: session_url(&source, &session.directory, &session.id),
            sandbox_id,
            session_id: session.id,
        })
    }

    async fn wait_for_sandbox(&self, sandbox_id: &str) -> Result<Source> {
        for attempt in 1..=self.policy.max_sandbox_attempts {
            let sandbox = self
                .control
                .get_sandbox(sandbox_id)
                .await
                .map_err(|e| {
                    warn!(sandbox = %sandbox_id, attempt, error = %e, "sandbox status poll failed");
                    Error::Operation("Failed to fetch sandbox status".into())
                })?;

            match sandbox.status {
                SandboxStatus::Error => {
                    let message = sandbox.runtime_error().unwrap_or("Sandbox failed to start");
                    return Err(Error::Remote(message.to_string()));
                }
                SandboxStatus::Running => {
                    if let Some(url) = sandbox.session_service_url() {
                        info!(sandbox = %sandbox_id, attempt, "sandbox running");
                        return Ok(Source::new(url));
                    }
                }
                _ => {}
            }

            debug!(sandbox = %sandbox_id, attempt, status = ?sandbox.status, "sandbox not ready");
            tokio::time::sleep(self.policy.poll_interval).await;
        }

        Err(Error::NotReady("Sandbox did not become ready in time".into()))
    }

    async fn wait_for_session_service(&self, source: &Source) -> Result<()> {
        for attempt in 1..=self.policy.max_health_attempts {
            if self.sessions.health_check(source).await {
                info!(source = %source, attempt, "session service healthy");
                return Ok(());
            }
            debug!(source = %source, attempt, "session service not healthy");
            tokio::time::sleep(self.policy.poll_interval).await;
        }

        Err(Error::NotReady(
            "Session service did not become ready in time".into(),
        ))
    }
}

/// Session-service failures reach the caller as their message, verbatim.
fn into_operation(e: Error) -> Error {
    match e {
        Error::Operation(_) => e,
        other => Error::Operation(other.to_string()),
    }
}
