//! Wire types for the control plane and the per-sandbox session service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one upstream event-stream origin: a sandbox's session-service URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Source {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for Source {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxUrls {
    #[serde(rename = "opencode", default, skip_serializing_if = "Option::is_none")]
    pub session_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vscode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRuntime {
    #[serde(default)]
    pub urls: SandboxUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub status: SandboxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<SandboxRuntime>,
}

impl Sandbox {
    /// Session-service URL, when the runtime has published one.
    pub fn session_service_url(&self) -> Option<&str> {
        self.runtime
            .as_ref()
            .and_then(|runtime| runtime.urls.session_service.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.runtime.as_ref().and_then(|runtime| runtime.error.as_deref())
    }

    /// The event-stream source of a running sandbox.
    pub fn active_source(&self) -> Option<Source> {
        if self.status != SandboxStatus::Running {
            return None;
        }
        self.session_service_url().map(Source::new)
    }
}

/// Response body of `createSandbox`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedSandbox {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTime {
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    pub time: SessionTime,
}

impl Session {
    /// Last update, falling back to creation.
    pub fn effective_time(&self) -> i64 {
        self.time.updated.unwrap_or(self.time.created)
    }
}

/// Session status exactly as the session service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawSessionStatus {
    Idle,
    Busy,
    Retry {
        #[serde(default)]
        attempt: u32,
        #[serde(default)]
        message: String,
        #[serde(default)]
        next: i64,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTime {
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub permission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<RequestTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPrompt {
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub questions: Vec<QuestionPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<RequestTime>,
}

impl QuestionRequest {
    /// First question's header, else its text, else a generic label.
    pub fn display_text(&self) -> String {
        self.questions
            .first()
            .and_then(|q| {
                q.header
                    .clone()
                    .or_else(|| Some(q.question.clone()).filter(|text| !text.is_empty()))
            })
            .unwrap_or_else(|| "Question".to_string())
    }
}
