//! Typed event notifications carried by the fleet and session streams.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One notification as it arrives on either stream: `{type, properties}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Value,
}

impl EventEnvelope {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            properties,
        }
    }

    /// A string-valued property, if present and non-empty.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Created,
    Updated,
    Deleted,
}

/// Control-plane event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetEventKind {
    Sandbox(Lifecycle),
    SandboxServicesChanged,
    SandboxGitChanged,
    Task(Lifecycle),
    Workspace(Lifecycle),
    Config(Lifecycle),
}

impl FleetEventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "sandbox.services.changed" => Self::SandboxServicesChanged,
            "sandbox.git.changed" => Self::SandboxGitChanged,
            other => {
                let (entity, action) = other.split_once('.')?;
                let lifecycle = match action {
                    "created" => Lifecycle::Created,
                    "updated" => Lifecycle::Updated,
                    "deleted" => Lifecycle::Deleted,
                    _ => return None,
                };
                match entity {
                    "sandbox" => Self::Sandbox(lifecycle),
                    "task" => Self::Task(lifecycle),
                    "workspace" => Self::Workspace(lifecycle),
                    "config" => Self::Config(lifecycle),
                    _ => return None,
                }
            }
        };
        Some(kind)
    }
}

/// Per-sandbox session-service event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    SessionCreated,
    SessionUpdated,
    SessionDeleted,
    SessionStatus,
    SessionIdle,
    PermissionAsked,
    PermissionReplied,
    QuestionAsked,
    QuestionReplied,
    QuestionRejected,
    TodoUpdated,
}

impl SessionEventKind {
    pub fn parse(kind: &str) -> Option<Self> {
        Some(match kind {
            "session.created" => Self::SessionCreated,
            "session.updated" => Self::SessionUpdated,
            "session.deleted" => Self::SessionDeleted,
            "session.status" => Self::SessionStatus,
            "session.idle" => Self::SessionIdle,
            "permission.asked" => Self::PermissionAsked,
            "permission.replied" => Self::PermissionReplied,
            "question.asked" => Self::QuestionAsked,
            "question.replied" => Self::QuestionReplied,
            "question.rejected" => Self::QuestionRejected,
            "todo.updated" => Self::TodoUpdated,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fleet_kinds() {
        assert_eq!(
            FleetEventKind::parse("sandbox.created"),
            Some(FleetEventKind::Sandbox(Lifecycle::Created))
        );
        assert_eq!(
            FleetEventKind::parse("config.deleted"),
            Some(FleetEventKind::Config(Lifecycle::Deleted))
        );
        assert_eq!(
            FleetEventKind::parse("sandbox.git.changed"),
            Some(FleetEventKind::SandboxGitChanged)
        );
        assert_eq!(FleetEventKind::parse("prebuild.updated"), None);
        assert_eq!(FleetEventKind::parse("sandbox.exploded"), None);
        assert_eq!(FleetEventKind::parse("garbage"), None);
    }

    #[test]
    fn parses_session_kinds() {
        assert_eq!(
            SessionEventKind::parse("todo.updated"),
            Some(SessionEventKind::TodoUpdated)
        );
        assert_eq!(SessionEventKind::parse("message.part.updated"), None);
    }

    #[test]
    fn envelope_decodes_without_properties() {
        let event: EventEnvelope =
            serde_json::from_value(json!({ "type": "server.connected" })).unwrap();
        assert_eq!(event.kind, "server.connected");
        assert_eq!(event.property("id"), None);
    }
}
