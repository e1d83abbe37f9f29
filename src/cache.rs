//! Cache keys and the invalidation side-channel.
//!
//! The cache itself lives outside this crate. Routers only name the entries
//! that went stale; an [`Invalidator`] carries that to whatever store holds
//! the data.

use crate::model::Source;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// One cached collection or record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    SandboxList,
    SandboxDetail(String),
    SandboxServices(String),
    SandboxDevCommands(String),
    SandboxGitStatus(String),
    TaskList,
    TaskDetail(String),
    WorkspaceList,
    WorkspaceDetail(String),
    ConfigList,
    ConfigDetail(String),
    SystemStats,
    SessionTemplates,
    Sessions(Source),
    SessionStatuses(Source),
    Permissions(Source),
    Questions(Source),
    Todos(Source, String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::SandboxList => write!(f, "sandboxes"),
            CacheKey::SandboxDetail(id) => write!(f, "sandboxes/detail/{id}"),
            CacheKey::SandboxServices(id) => write!(f, "sandboxes/{id}/services"),
            CacheKey::SandboxDevCommands(id) => write!(f, "sandboxes/{id}/devCommands"),
            CacheKey::SandboxGitStatus(id) => write!(f, "sandboxes/{id}/gitStatus"),
            CacheKey::TaskList => write!(f, "tasks"),
            CacheKey::TaskDetail(id) => write!(f, "tasks/detail/{id}"),
            CacheKey::WorkspaceList => write!(f, "workspaces"),
            CacheKey::WorkspaceDetail(id) => write!(f, "workspaces/detail/{id}"),
            CacheKey::ConfigList => write!(f, "configFiles"),
            CacheKey::ConfigDetail(id) => write!(f, "configFiles/detail/{id}"),
            CacheKey::SystemStats => write!(f, "system/stats"),
            CacheKey::SessionTemplates => write!(f, "sessionTemplates"),
            CacheKey::Sessions(source) => write!(f, "sessions/{source}"),
            CacheKey::SessionStatuses(source) => write!(f, "sessionStatuses/{source}"),
            CacheKey::Permissions(source) => write!(f, "permissions/{source}"),
            CacheKey::Questions(source) => write!(f, "questions/{source}"),
            CacheKey::Todos(source, session_id) => write!(f, "todos/{source}/{session_id}"),
        }
    }
}

/// Marks cache entries stale. Called concurrently from every stream loop,
/// so implementations must be idempotent and thread-safe.
pub trait Invalidator: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

const NOTIFY_CAPACITY: usize = 256;

/// In-memory invalidation recorder.
///
/// Counts how often each key went stale and rebroadcasts every invalidation
/// to subscribers, which is how the fleet watcher learns that the sandbox
/// list must be re-read.
pub struct StaleTracker {
    counts: Mutex<HashMap<CacheKey, u64>>,
    notify: broadcast::Sender<CacheKey>,
}

impl StaleTracker {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            counts: Mutex::new(HashMap::new()),
            notify,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.notify.subscribe()
    }

    /// Number of invalidations recorded for `key`.
    pub fn count(&self, key: &CacheKey) -> u64 {
        self.counts
            .lock()
            .map(|counts| counts.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Every key seen so far with its count, sorted by key.
    pub fn snapshot(&self) -> Vec<(CacheKey, u64)> {
        let mut entries: Vec<(CacheKey, u64)> = match self.counts.lock() {
            Ok(counts) => counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(_) => Vec::new(),
        };
        entries.sort();
        entries
    }
}

impl Default for StaleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Invalidator for StaleTracker {
    fn invalidate(&self, key: &CacheKey) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
        // No subscribers is fine.
        let _ = self.notify.send(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        let source = Source::new("http://10.0.0.2:3000");
        assert_eq!(
            CacheKey::Todos(source.clone(), "ses_1".into()).to_string(),
            "todos/http://10.0.0.2:3000/ses_1"
        );
        assert_eq!(CacheKey::SandboxServices("sb".into()).to_string(), "sandboxes/sb/services");
    }

    #[tokio::test]
    async fn tracker_counts_and_broadcasts() {
        let tracker = StaleTracker::new();
        let mut rx = tracker.subscribe();

        tracker.invalidate(&CacheKey::SandboxList);
        tracker.invalidate(&CacheKey::SandboxList);
        tracker.invalidate(&CacheKey::TaskList);

        assert_eq!(tracker.count(&CacheKey::SandboxList), 2);
        assert_eq!(tracker.count(&CacheKey::TaskList), 1);
        assert_eq!(tracker.count(&CacheKey::SystemStats), 0);

        assert_eq!(rx.recv().await.unwrap(), CacheKey::SandboxList);
        assert_eq!(rx.recv().await.unwrap(), CacheKey::SandboxList);
        assert_eq!(rx.recv().await.unwrap(), CacheKey::TaskList);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot, vec![(CacheKey::SandboxList, 2), (CacheKey::TaskList, 1)]);
    }
}
