//! HTTP clients for the control plane and the per-sandbox session services.

use crate::error::{Error, Result};
use crate::model::{
    CreatedSandbox, PermissionRequest, QuestionRequest, RawSessionStatus, Sandbox, Session, Source,
};
use crate::sse::decode_events;
use crate::startup::{ControlPlane, CreatedSession, SessionService};
use crate::stream::{EventSource, EventStream, SourceConnector};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

fn normalize_base(base: &str) -> Result<String> {
    Url::parse(base).map_err(|source| Error::InvalidUrl {
        url: base.to_string(),
        source,
    })?;
    Ok(base.trim_end_matches('/').to_string())
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    url: String,
    what: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Status {
            url,
            status: status.as_u16(),
            body,
        });
    }
    let body = response
        .text()
        .await
        .map_err(|source| Error::Http { url, source })?;
    serde_json::from_str(&body).map_err(|source| Error::Decode {
        what: what.to_string(),
        source,
    })
}

async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: String, what: &str) -> Result<T> {
    debug!(url = %url, "GET");
    let response = http.get(&url).send().await.map_err(|source| Error::Http {
        url: url.clone(),
        source,
    })?;
    read_json(response, url, what).await
}

async fn open_event_stream(http: &reqwest::Client, url: String) -> Result<EventStream> {
    let response = http
        .get(&url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|source| Error::Http {
            url: url.clone(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Status {
            url,
            status: status.as_u16(),
            body,
        });
    }

    let origin = url.clone();
    let bytes = response
        .bytes_stream()
        .map(move |chunk| {
            chunk.map_err(|source| Error::Http {
                url: origin.clone(),
                source,
            })
        })
        .boxed();
    Ok(decode_events(bytes, url).boxed())
}

/// Client for the fleet manager's REST API and fleet event stream.
#[derive(Debug, Clone)]
pub struct ManagerClient {
    http: reqwest::Client,
    base: String,
}

impl ManagerClient {
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: normalize_base(base)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[async_trait]
impl ControlPlane for ManagerClient {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        get_json(&self.http, self.url("/api/sandboxes"), "sandbox list").await
    }

    async fn create_sandbox(&self, workspace_id: &str) -> Result<CreatedSandbox> {
        let url = self.url("/api/sandboxes");
        let response = self
            .http
            .post(&url)
            .json(&json!({ "workspaceId": workspace_id }))
            .send()
            .await
            .map_err(|source| Error::Http {
                url: url.clone(),
                source,
            })?;
        read_json(response, url, "created sandbox").await
    }

    async fn get_sandbox(&self, id: &str) -> Result<Sandbox> {
        get_json(&self.http, self.url(&format!("/api/sandboxes/{id}")), "sandbox").await
    }
}

#[async_trait]
impl EventSource for ManagerClient {
    fn origin(&self) -> String {
        self.url("/api/events")
    }

    async fn open(&self) -> Result<EventStream> {
        open_event_stream(&self.http, self.url("/api/events")).await
    }
}

#[derive(Debug, Deserialize)]
struct Health {
    #[serde(default)]
    healthy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SessionCreated {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    directory: Option<String>,
}

/// Client for sandbox session services. One instance serves every source.
#[derive(Debug, Clone, Default)]
pub struct SessionServiceClient {
    http: reqwest::Client,
}

impl SessionServiceClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for SessionServiceClient {
    async fn health_check(&self, source: &Source) -> bool {
        let url = format!("{source}/global/health");
        match get_json::<Health>(&self.http, url, "health").await {
            Ok(health) => health.healthy,
            Err(e) => {
                debug!(source = %source, error = %e, "health check failed");
                false
            }
        }
    }

    async fn list_sessions(&self, source: &Source) -> Result<Vec<Session>> {
        get_json(&self.http, format!("{source}/session"), "session list").await
    }

    async fn session_statuses(&self, source: &Source) -> Result<HashMap<String, RawSessionStatus>> {
        get_json(&self.http, format!("{source}/session/status"), "session statuses").await
    }

    async fn permissions(&self, source: &Source) -> Result<Vec<PermissionRequest>> {
        get_json(&self.http, format!("{source}/permission"), "permissions").await
    }

    async fn questions(&self, source: &Source) -> Result<Vec<QuestionRequest>> {
        get_json(&self.http, format!("{source}/question"), "questions").await
    }

    async fn create_session(&self, source: &Source, directory: Option<&str>) -> Result<CreatedSession> {
        let url = format!("{source}/session");
        let mut request = self.http.post(&url).json(&json!({}));
        if let Some(directory) = directory {
            request = request.query(&[("directory", directory)]);
        }
        let response = request.send().await.map_err(|source| Error::Http {
            url: url.clone(),
            source,
        })?;
        let created: SessionCreated = read_json(response, url.clone(), "created session")
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "session creation rejected");
                Error::Operation("Failed to create session".into())
            })?;
        match (created.id, created.directory) {
            (Some(id), Some(directory)) if !id.is_empty() => Ok(CreatedSession { id, directory }),
            _ => {
                warn!(url = %url, "created session is missing its id or directory");
                Err(Error::Operation("Failed to create session".into()))
            }
        }
    }

    async fn send_message(
        &self,
        source: &Source,
        session_id: &str,
        directory: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let url = format!("{source}/session/{session_id}/prompt_async");
        let mut request = self
            .http
            .post(&url)
            .json(&json!({ "parts": [{ "type": "text", "text": text }] }));
        if let Some(directory) = directory {
            request = request.query(&[("directory", directory)]);
        }
        let response = request.send().await.map_err(|source| Error::Http {
            url: url.clone(),
            source,
        })?;
        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "prompt rejected");
            return Err(Error::Operation("Failed to send message".into()));
        }
        Ok(())
    }
}

impl SourceConnector for SessionServiceClient {
    fn connect(&self, source: &Source) -> Arc<dyn EventSource> {
        Arc::new(SessionEvents {
            http: self.http.clone(),
            source: source.clone(),
        })
    }
}

/// The `/event` stream of one session service.
struct SessionEvents {
    http: reqwest::Client,
    source: Source,
}

#[async_trait]
impl EventSource for SessionEvents {
    fn origin(&self) -> String {
        self.source.to_string()
    }

    async fn open(&self) -> Result<EventStream> {
        open_event_stream(&self.http, format!("{}/event", self.source)).await
    }
}
