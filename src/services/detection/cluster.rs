//! Incremental clustering of matched records.
//!
//! Union-find over scan indices. Each cluster remembers the group it was
//! persisted as, so a cluster that grows keeps its group ID, and when two
//! persisted clusters join the older group survives.

use crate::models::GroupId;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// A cluster already written to the store.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Group ID in the store.
    pub id: GroupId,
    /// Creation time, preserved across rewrites.
    pub created_at: DateTime<Utc>,
    seq: u64,
}

/// Union-find with per-root member lists and group bookkeeping.
#[derive(Debug, Default)]
pub struct Clusters {
    parent: Vec<usize>,
    members: Vec<Vec<usize>>,
    max_score: Vec<f64>,
    groups: HashMap<usize, Materialized>,
    dirty: BTreeSet<usize>,
    next_seq: u64,
}

impl Clusters {
    /// Adds a singleton and returns its index.
    pub fn push(&mut self) -> usize {
        let index = self.parent.len();
        self.parent.push(index);
        self.members.push(vec![index]);
        self.max_score.push(0.0);
        index
    }

    /// Root of the cluster containing `index`.
    pub fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = index;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Joins the clusters of `a` and `b` after a match scoring `score`.
    ///
    /// Returns the group that must be removed from the store when two
    /// persisted clusters collapse into one.
    pub fn union(&mut self, a: usize, b: usize, score: f64) -> Option<GroupId> {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            self.max_score[ra] = self.max_score[ra].max(score);
            self.dirty.insert(ra);
            return None;
        }

        // Smaller member list folds into the larger one.
        let (root, child) = if self.members[ra].len() >= self.members[rb].len() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[child] = root;
        let moved = std::mem::take(&mut self.members[child]);
        self.members[root].extend(moved);
        self.max_score[root] = self.max_score[root].max(self.max_score[child]).max(score);
        self.dirty.remove(&child);
        self.dirty.insert(root);

        match (self.groups.remove(&root), self.groups.remove(&child)) {
            (Some(kept), Some(other)) => {
                let (older, newer) = if kept.seq <= other.seq {
                    (kept, other)
                } else {
                    (other, kept)
                };
                self.groups.insert(root, older);
                Some(newer.id)
            },
            (Some(group), None) | (None, Some(group)) => {
                self.groups.insert(root, group);
                None
            },
            (None, None) => None,
        }
    }

    /// Drains the roots of clusters changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<usize> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut roots: Vec<usize> = dirty.into_iter().map(|r| self.find(r)).collect();
        roots.sort_unstable();
        roots.dedup();
        roots.retain(|&r| self.members[r].len() >= 2);
        roots
    }

    /// Indices in the cluster rooted at `root`.
    pub fn members(&self, root: usize) -> &[usize] {
        &self.members[root]
    }

    /// Highest match score inside the cluster rooted at `root`.
    pub fn max_score(&self, root: usize) -> f64 {
        self.max_score[root]
    }

    /// Group the cluster is persisted as, if any.
    pub fn group(&self, root: usize) -> Option<&Materialized> {
        self.groups.get(&root)
    }

    /// Records that the cluster rooted at `root` was persisted as `id`.
    pub fn assign(&mut self, root: usize, id: GroupId, created_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.groups.insert(root, Materialized { id, created_at, seq });
    }

    /// Forgets the group of the cluster rooted at `root`.
    ///
    /// The next persist writes the cluster under a fresh ID.
    pub fn release(&mut self, root: usize) -> Option<Materialized> {
        self.groups.remove(&root)
    }

    /// IDs of every persisted cluster, oldest first.
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut groups: Vec<&Materialized> = self.groups.values().collect();
        groups.sort_by_key(|g| g.seq);
        groups.into_iter().map(|g| g.id.clone()).collect()
    }

    /// Number of persisted clusters.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
