//! Progress of a task: the session trees it started and their interaction
//! state.

use crate::fleet::{FleetSession, SandboxSnapshot};
use crate::hierarchy::{self, SessionNode};
use crate::interaction::{self, AggregatedInteraction, SessionInteraction};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub hierarchy: Vec<SessionNode<FleetSession>>,
    /// Pre-order listing of `hierarchy`.
    pub sessions: Vec<FleetSession>,
    pub root_count: usize,
    pub subsession_count: usize,
    /// In the same order as `sessions`.
    pub interactions: Vec<SessionInteraction>,
    pub aggregated: AggregatedInteraction,
}

/// Progress of the task whose root sessions are `task_session_ids`.
///
/// Only root sessions are matched; sub-sessions come along with their root.
pub fn task_progress<S: AsRef<str>>(
    sandbox: &SandboxSnapshot,
    task_session_ids: &[S],
) -> TaskProgress {
    let wanted: HashSet<&str> = task_session_ids.iter().map(|id| id.as_ref()).collect();

    let roots: Vec<SessionNode<FleetSession>> = sandbox
        .hierarchy()
        .into_iter()
        .filter(|node| wanted.contains(node.item.session.id.as_str()))
        .collect();

    let sessions: Vec<FleetSession> = hierarchy::flatten(&roots).into_iter().cloned().collect();

    let mut summary = interaction::aggregate(
        sessions.iter().map(|s| s.session.id.as_str()),
        &sandbox.statuses,
        &sandbox.permissions,
        &sandbox.questions,
    );
    let interactions = sessions
        .iter()
        .filter_map(|s| summary.interactions.remove(&s.session.id))
        .collect();

    TaskProgress {
        root_count: roots.len(),
        subsession_count: sessions.len() - roots.len(),
        hierarchy: roots,
        sessions,
        interactions,
        aggregated: summary.aggregated,
    }
}
