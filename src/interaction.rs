//! Per-session and fleet-wide interaction state: status, pending permissions
//! and pending questions.

use crate::model::{PermissionRequest, QuestionRequest, RawSessionStatus, Source};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappedStatus {
    Idle,
    Busy,
    Waiting,
    Unknown,
}

impl MappedStatus {
    /// A session with no recorded status has shown no activity, so it is idle.
    pub fn from_raw(raw: Option<&RawSessionStatus>) -> Self {
        match raw {
            None | Some(RawSessionStatus::Idle) => MappedStatus::Idle,
            Some(RawSessionStatus::Busy) => MappedStatus::Busy,
            Some(RawSessionStatus::Retry { .. }) => MappedStatus::Waiting,
            Some(RawSessionStatus::Other) => MappedStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MappedStatus::Idle => "idle",
            MappedStatus::Busy => "busy",
            MappedStatus::Waiting => "waiting",
            MappedStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInteraction {
    pub session_id: String,
    pub status: MappedStatus,
    pub pending_permissions: Vec<PermissionRequest>,
    pub pending_questions: Vec<QuestionRequest>,
}

impl SessionInteraction {
    pub fn needs_attention(&self) -> bool {
        !self.pending_permissions.is_empty() || !self.pending_questions.is_empty()
    }
}

/// Union of a session set's interaction state. Each pending request keeps
/// its `session_id`, which tags it with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedInteraction {
    pub status: MappedStatus,
    pub pending_permissions: Vec<PermissionRequest>,
    pub pending_questions: Vec<QuestionRequest>,
    pub needs_attention: bool,
    pub has_busy_sessions: bool,
    pub has_idle_sessions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionSummary {
    pub interactions: HashMap<String, SessionInteraction>,
    pub aggregated: AggregatedInteraction,
}

/// Interaction state of one session, filtering the sandbox-wide lists.
pub fn session_interaction(
    session_id: &str,
    statuses: &HashMap<String, RawSessionStatus>,
    permissions: &[PermissionRequest],
    questions: &[QuestionRequest],
) -> SessionInteraction {
    SessionInteraction {
        session_id: session_id.to_string(),
        status: MappedStatus::from_raw(statuses.get(session_id)),
        pending_permissions: permissions
            .iter()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect(),
        pending_questions: questions
            .iter()
            .filter(|q| q.session_id == session_id)
            .cloned()
            .collect(),
    }
}

/// Merge the interaction state of `session_ids`.
///
/// Overall status is busy if any session is busy, else idle if any is idle,
/// else unknown. Repeated ids are counted once.
pub fn aggregate<'a, I>(
    session_ids: I,
    statuses: &HashMap<String, RawSessionStatus>,
    permissions: &[PermissionRequest],
    questions: &[QuestionRequest],
) -> InteractionSummary
where
    I: IntoIterator<Item = &'a str>,
{
    let mut interactions = HashMap::new();
    let mut seen = HashSet::new();
    let mut pending_permissions = Vec::new();
    let mut pending_questions = Vec::new();
    let mut has_busy_sessions = false;
    let mut has_idle_sessions = false;

    for session_id in session_ids {
        if !seen.insert(session_id) {
            continue;
        }
        let interaction = session_interaction(session_id, statuses, permissions, questions);
        match interaction.status {
            MappedStatus::Busy => has_busy_sessions = true,
            MappedStatus::Idle => has_idle_sessions = true,
            MappedStatus::Waiting | MappedStatus::Unknown => {}
        }
        pending_permissions.extend(interaction.pending_permissions.iter().cloned());
        pending_questions.extend(interaction.pending_questions.iter().cloned());
        interactions.insert(session_id.to_string(), interaction);
    }

    let status = if has_busy_sessions {
        MappedStatus::Busy
    } else if has_idle_sessions {
        MappedStatus::Idle
    } else {
        MappedStatus::Unknown
    };
    let needs_attention = !pending_permissions.is_empty() || !pending_questions.is_empty();

    InteractionSummary {
        interactions,
        aggregated: AggregatedInteraction {
            status,
            pending_permissions,
            pending_questions,
            needs_attention,
            has_busy_sessions,
            has_idle_sessions,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionKind {
    Permission,
    Question,
}

/// One pending request, ready to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionItem {
    pub id: String,
    pub kind: AttentionKind,
    pub sandbox_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub source: Source,
    pub session_id: String,
    pub summary: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxAttentionGroup {
    pub sandbox_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub source: Source,
    pub permissions: Vec<PermissionRequest>,
    pub questions: Vec<QuestionRequest>,
}

/// Pending requests fetched from one running sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPending {
    pub sandbox_id: String,
    pub workspace_id: Option<String>,
    pub source: Source,
    pub permissions: Vec<PermissionRequest>,
    pub questions: Vec<QuestionRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetAttention {
    pub items: Vec<AttentionItem>,
    pub groups: Vec<SandboxAttentionGroup>,
}

impl FleetAttention {
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// Flatten every sandbox's pending requests into attention items.
///
/// Requests without a creation time are stamped with `now_ms`. Sandboxes
/// with nothing pending get no group.
pub fn collect_attention(sandboxes: &[SandboxPending], now_ms: i64) -> FleetAttention {
    let mut attention = FleetAttention::default();

    for sandbox in sandboxes {
        if sandbox.permissions.is_empty() && sandbox.questions.is_empty() {
            continue;
        }

        for permission in &sandbox.permissions {
            attention.items.push(AttentionItem {
                id: format!(
                    "perm-{}-{}-{}",
                    sandbox.sandbox_id, permission.session_id, permission.id
                ),
                kind: AttentionKind::Permission,
                sandbox_id: sandbox.sandbox_id.clone(),
                workspace_id: sandbox.workspace_id.clone(),
                source: sandbox.source.clone(),
                session_id: permission.session_id.clone(),
                summary: format!("Requesting permission: {}", permission.permission),
                timestamp: permission.time.map(|t| t.created).unwrap_or(now_ms),
            });
        }
        for question in &sandbox.questions {
            attention.items.push(AttentionItem {
                id: format!(
                    "ques-{}-{}-{}",
                    sandbox.sandbox_id, question.session_id, question.id
                ),
                kind: AttentionKind::Question,
                sandbox_id: sandbox.sandbox_id.clone(),
                workspace_id: sandbox.workspace_id.clone(),
                source: sandbox.source.clone(),
                session_id: question.session_id.clone(),
                summary: question.display_text(),
                timestamp: question.time.map(|t| t.created).unwrap_or(now_ms),
            });
        }

        attention.groups.push(SandboxAttentionGroup {
            sandbox_id: sandbox.sandbox_id.clone(),
            workspace_id: sandbox.workspace_id.clone(),
            source: sandbox.source.clone(),
            permissions: sandbox.permissions.clone(),
            questions: sandbox.questions.clone(),
        });
    }

    attention
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionPrompt, RequestTime};

    fn permission(id: &str, session: &str) -> PermissionRequest {
        PermissionRequest {
            id: id.into(),
            session_id: session.into(),
            permission: "bash".into(),
            time: Some(RequestTime { created: 42 }),
        }
    }

    fn question(id: &str, session: &str) -> QuestionRequest {
        QuestionRequest {
            id: id.into(),
            session_id: session.into(),
            questions: vec![QuestionPrompt {
                question: "Proceed?".into(),
                header: None,
            }],
            time: None,
        }
    }

    fn statuses(entries: &[(&str, RawSessionStatus)]) -> HashMap<String, RawSessionStatus> {
        entries
            .iter()
            .map(|(id, status)| (id.to_string(), status.clone()))
            .collect()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(MappedStatus::from_raw(None), MappedStatus::Idle);
        assert_eq!(MappedStatus::from_raw(Some(&RawSessionStatus::Busy)), MappedStatus::Busy);
        assert_eq!(
            MappedStatus::from_raw(Some(&RawSessionStatus::Retry {
                attempt: 1,
                message: "overloaded".into(),
                next: 0,
            })),
            MappedStatus::Waiting
        );
        assert_eq!(MappedStatus::from_raw(Some(&RawSessionStatus::Other)), MappedStatus::Unknown);
    }

    #[test]
    fn busy_wins_over_idle() {
        let map = statuses(&[("a", RawSessionStatus::Busy), ("b", RawSessionStatus::Idle)]);
        let summary = aggregate(["a", "b"], &map, &[], &[]);
        assert_eq!(summary.aggregated.status, MappedStatus::Busy);
        assert!(summary.aggregated.has_busy_sessions);
        assert!(!summary.aggregated.needs_attention);
    }

    #[test]
    fn idle_wins_over_unknown() {
        let map = statuses(&[("a", RawSessionStatus::Idle), ("b", RawSessionStatus::Other)]);
        let summary = aggregate(["a", "b"], &map, &[], &[]);
        assert_eq!(summary.aggregated.status, MappedStatus::Idle);
        assert!(!summary.aggregated.has_busy_sessions);

        let map = statuses(&[("a", RawSessionStatus::Other)]);
        assert_eq!(aggregate(["a"], &map, &[], &[]).aggregated.status, MappedStatus::Unknown);
    }

    #[test]
    fn pending_requests_are_scoped_per_session() {
        let permissions = vec![permission("p1", "a"), permission("p2", "b"), permission("p3", "z")];
        let questions = vec![question("q1", "b")];
        let summary = aggregate(["a", "b"], &HashMap::new(), &permissions, &questions);

        assert_eq!(summary.interactions["a"].pending_permissions.len(), 1);
        assert!(summary.interactions["a"].pending_questions.is_empty());
        assert!(summary.interactions["b"].needs_attention());
        assert_eq!(summary.aggregated.pending_permissions.len(), 2);
        assert_eq!(summary.aggregated.pending_questions[0].session_id, "b");
        assert!(summary.aggregated.needs_attention);
        assert_eq!(summary.aggregated.status, MappedStatus::Idle);
    }

    #[test]
    fn repeated_session_ids_count_once() {
        let permissions = vec![permission("p1", "a")];
        let summary = aggregate(["a", "a"], &HashMap::new(), &permissions, &[]);
        assert_eq!(summary.interactions.len(), 1);
        assert_eq!(summary.aggregated.pending_permissions.len(), 1);
    }

    #[test]
    fn attention_items_and_groups() {
        let sandboxes = vec![
            SandboxPending {
                sandbox_id: "sb1".into(),
                workspace_id: Some("ws".into()),
                source: Source::new("http://10.0.0.2:3000"),
                permissions: vec![permission("p1", "s1")],
                questions: vec![question("q1", "s2")],
            },
            SandboxPending {
                sandbox_id: "sb2".into(),
                workspace_id: None,
                source: Source::new("http://10.0.0.3:3000"),
                permissions: vec![],
                questions: vec![],
            },
        ];
        let attention = collect_attention(&sandboxes, 1_000);

        assert_eq!(attention.count(), 2);
        assert_eq!(attention.groups.len(), 1);
        assert_eq!(attention.groups[0].sandbox_id, "sb1");

        let perm = &attention.items[0];
        assert_eq!(perm.id, "perm-sb1-s1-p1");
        assert_eq!(perm.summary, "Requesting permission: bash");
        assert_eq!(perm.timestamp, 42);

        let ques = &attention.items[1];
        assert_eq!(ques.id, "ques-sb1-s2-q1");
        assert_eq!(ques.summary, "Proceed?");
        assert_eq!(ques.timestamp, 1_000);
    }
}
