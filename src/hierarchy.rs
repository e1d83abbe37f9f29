//! Parent/child session trees rebuilt from a flat list.
//!
//! Nodes are resolved by index into the input slice; the owned tree is
//! assembled bottom-up at the end, so no node ever refers back to its parent.

use crate::model::Session;
use serde::Serialize;
use std::collections::HashMap;

/// Anything that can be arranged in a session forest.
pub trait HierarchyItem {
    fn id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    /// Last update, falling back to creation.
    fn effective_time(&self) -> i64;
}

impl HierarchyItem for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn effective_time(&self) -> i64 {
        Session::effective_time(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionNode<T> {
    pub item: T,
    pub children: Vec<SessionNode<T>>,
}

const UNVISITED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// Build the session forest.
///
/// Items whose parent is missing are roots. When parent links form a cycle,
/// the item that closes the cycle (walking in input order) becomes a root.
/// Siblings and roots are sorted by effective time, newest first; ties keep
/// input order.
pub fn build<T: HierarchyItem + Clone>(items: &[T]) -> Vec<SessionNode<T>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        index.entry(item.id()).or_insert(i);
    }

    let mut parent: Vec<Option<usize>> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.parent_id()
                .and_then(|p| index.get(p).copied())
                .filter(|&p| p != i)
        })
        .collect();

    break_cycles(&mut parent);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut roots: Vec<usize> = Vec::new();
    for (i, p) in parent.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let newest_first = |a: &usize, b: &usize| {
        items[*b]
            .effective_time()
            .cmp(&items[*a].effective_time())
    };
    roots.sort_by(newest_first);
    for list in &mut children {
        list.sort_by(newest_first);
    }

    // Breadth-first order puts every parent before its children, so walking
    // it backwards finishes each subtree before its parent needs it.
    let mut order: Vec<usize> = Vec::with_capacity(items.len());
    order.extend_from_slice(&roots);
    let mut cursor = 0;
    while cursor < order.len() {
        let node = order[cursor];
        order.extend_from_slice(&children[node]);
        cursor += 1;
    }

    let mut built: Vec<Option<SessionNode<T>>> = (0..items.len()).map(|_| None).collect();
    for &node in order.iter().rev() {
        let kids = children[node]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[node] = Some(SessionNode {
            item: items[node].clone(),
            children: kids,
        });
    }

    roots.iter().filter_map(|&root| built[root].take()).collect()
}

fn break_cycles(parent: &mut [Option<usize>]) {
    let mut state = vec![UNVISITED; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        if state[start] != UNVISITED {
            continue;
        }
        let mut current = start;
        loop {
            state[current] = IN_PROGRESS;
            path.push(current);
            match parent[current] {
                Some(p) if state[p] == UNVISITED => current = p,
                Some(p) if state[p] == IN_PROGRESS => {
                    parent[current] = None;
                    break;
                }
                _ => break,
            }
        }
        for node in path.drain(..) {
            state[node] = DONE;
        }
    }
}

/// Pre-order listing: each item immediately precedes its descendants.
pub fn flatten<T>(roots: &[SessionNode<T>]) -> Vec<&T> {
    let mut out = Vec::new();
    let mut stack: Vec<&SessionNode<T>> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(&node.item);
        stack.extend(node.children.iter().rev());
    }
    out
}

/// Number of sessions below `node`, not counting `node` itself.
pub fn count_descendants<T>(node: &SessionNode<T>) -> usize {
    let mut count = 0;
    let mut stack: Vec<&SessionNode<T>> = node.children.iter().collect();
    while let Some(next) = stack.pop() {
        count += 1;
        stack.extend(next.children.iter());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionTime;

    fn node_count<T>(roots: &[SessionNode<T>]) -> usize {
        roots.iter().map(|root| 1 + count_descendants(root)).sum()
    }

    fn session(id: &str, parent: Option<&str>, created: i64, updated: Option<i64>) -> Session {
        Session {
            id: id.into(),
            parent_id: parent.map(str::to_string),
            title: None,
            directory: None,
            time: SessionTime { created, updated },
        }
    }

    fn ids<'a>(items: impl IntoIterator<Item = &'a Session>) -> Vec<&'a str> {
        items.into_iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn siblings_sorted_newest_first() {
        let sessions = vec![
            session("root", None, 0, Some(100)),
            session("a", Some("root"), 5, None),
            session("b", Some("root"), 1, None),
            session("c", Some("root"), 0, Some(3)),
        ];
        let forest = build(&sessions);
        assert_eq!(forest.len(), 1);
        let children: Vec<_> = forest[0].children.iter().map(|n| n.item.id.as_str()).collect();
        assert_eq!(children, vec!["a", "c", "b"]);
    }

    #[test]
    fn missing_parent_becomes_root() {
        let sessions = vec![
            session("child", Some("gone"), 10, None),
            session("root", None, 20, None),
        ];
        let forest = build(&sessions);
        assert_eq!(ids(forest.iter().map(|n| &n.item)), vec!["root", "child"]);
    }

    #[test]
    fn flatten_is_preorder_permutation() {
        let sessions = vec![
            session("grandchild", Some("child"), 1, None),
            session("other", None, 50, None),
            session("child", Some("root"), 2, None),
            session("root", None, 10, Some(60)),
            session("child2", Some("root"), 3, None),
        ];
        let forest = build(&sessions);
        let flat = flatten(&forest);
        assert_eq!(
            ids(flat.iter().copied()),
            vec!["root", "child2", "child", "grandchild", "other"]
        );
        assert_eq!(node_count(&forest), sessions.len());
        assert_eq!(count_descendants(&forest[0]), 3);
        assert_eq!(count_descendants(&forest[1]), 0);
    }

    #[test]
    fn parents_match_declared_ids() {
        let sessions = vec![
            session("a", None, 1, None),
            session("b", Some("a"), 2, None),
            session("c", Some("b"), 3, None),
            session("d", Some("a"), 4, None),
        ];
        let forest = build(&sessions);
        let mut stack: Vec<&SessionNode<Session>> = forest.iter().collect();
        while let Some(node) = stack.pop() {
            for child in &node.children {
                assert_eq!(child.item.parent_id.as_deref(), Some(node.item.id.as_str()));
                stack.push(child);
            }
        }
    }

    #[test]
    fn cycles_are_broken_without_dropping_nodes() {
        let sessions = vec![
            session("a", Some("b"), 1, None),
            session("b", Some("a"), 2, None),
            session("self", Some("self"), 3, None),
        ];
        let forest = build(&sessions);
        assert_eq!(node_count(&forest), 3);
        assert_eq!(ids(forest.iter().map(|n| &n.item)), vec!["self", "b"]);
        assert_eq!(forest[1].children[0].item.id, "a");
    }

    #[test]
    fn empty_input() {
        let forest = build::<Session>(&[]);
        assert!(forest.is_empty());
        assert!(flatten(&forest).is_empty());
    }
}
