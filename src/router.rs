//! Event routing: which cached collections an event makes stale.
//!
//! Both routers are pure. They return keys and leave the act of
//! invalidating to the caller.

use crate::cache::CacheKey;
use crate::events::{EventEnvelope, FleetEventKind, Lifecycle, SessionEventKind};
use crate::model::Source;
use std::collections::BTreeSet;

/// Routes control-plane lifecycle events.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetRouter;

impl FleetRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, event: &EventEnvelope) -> BTreeSet<CacheKey> {
        let mut keys = BTreeSet::new();
        let Some(kind) = FleetEventKind::parse(&event.kind) else {
            return keys;
        };
        let id = event.property("id").map(str::to_string);

        match kind {
            FleetEventKind::Sandbox(Lifecycle::Created | Lifecycle::Deleted) => {
                keys.insert(CacheKey::SandboxList);
                if let Some(id) = id {
                    keys.insert(CacheKey::SandboxDetail(id));
                }
                keys.insert(CacheKey::SystemStats);
                // tasks reference sandboxes
                keys.insert(CacheKey::TaskList);
            }
            FleetEventKind::Sandbox(Lifecycle::Updated) => {
                keys.insert(CacheKey::SandboxList);
                if let Some(id) = id {
                    keys.insert(CacheKey::SandboxDetail(id.clone()));
                    keys.insert(CacheKey::SandboxServices(id.clone()));
                    keys.insert(CacheKey::SandboxDevCommands(id));
                }
            }
            FleetEventKind::SandboxServicesChanged => {
                if let Some(id) = id {
                    keys.insert(CacheKey::SandboxServices(id));
                }
            }
            FleetEventKind::SandboxGitChanged => {
                if let Some(id) = id {
                    keys.insert(CacheKey::SandboxGitStatus(id));
                }
            }
            FleetEventKind::Task(_) => {
                keys.insert(CacheKey::TaskList);
                if let Some(id) = id {
                    keys.insert(CacheKey::TaskDetail(id));
                }
            }
            FleetEventKind::Workspace(_) => {
                keys.insert(CacheKey::WorkspaceList);
                if let Some(id) = id {
                    keys.insert(CacheKey::WorkspaceDetail(id));
                }
                keys.insert(CacheKey::SessionTemplates);
            }
            FleetEventKind::Config(_) => {
                keys.insert(CacheKey::ConfigList);
                if let Some(id) = id {
                    keys.insert(CacheKey::ConfigDetail(id));
                }
            }
        }
        keys
    }
}

/// Routes events from one sandbox's session service.
#[derive(Debug, Clone)]
pub struct SessionRouter {
    source: Source,
}

impl SessionRouter {
    pub fn new(source: Source) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn route(&self, event: &EventEnvelope) -> BTreeSet<CacheKey> {
        let mut keys = BTreeSet::new();
        let Some(kind) = SessionEventKind::parse(&event.kind) else {
            return keys;
        };
        let source = self.source.clone();

        match kind {
            SessionEventKind::SessionCreated
            | SessionEventKind::SessionUpdated
            | SessionEventKind::SessionDeleted => {
                keys.insert(CacheKey::Sessions(source));
            }
            SessionEventKind::SessionStatus | SessionEventKind::SessionIdle => {
                keys.insert(CacheKey::SessionStatuses(source));
            }
            SessionEventKind::PermissionAsked | SessionEventKind::PermissionReplied => {
                keys.insert(CacheKey::Permissions(source));
            }
            SessionEventKind::QuestionAsked
            | SessionEventKind::QuestionReplied
            | SessionEventKind::QuestionRejected => {
                keys.insert(CacheKey::Questions(source));
            }
            SessionEventKind::TodoUpdated => {
                if let Some(session_id) = event.property("sessionID") {
                    keys.insert(CacheKey::Todos(source, session_id.to_string()));
                }
            }
        }
        keys
    }
}
