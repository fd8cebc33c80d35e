//! The blocking scan loop behind a detection task.
//!
//! Pages through candidates, scores each new record against earlier ones,
//! clusters matches, and persists changed clusters after every page so that
//! partial results survive failure and cancellation.
//!
//! Reviewers may act on groups while the scan runs. A group that was
//! resolved or deleted is never reopened: its members are retired from the
//! scan, as are records that disappeared from the store.

use super::cluster::Clusters;
use crate::models::{
    DuplicateGroup, EntityType, GroupId, Record, RecordId, SimilarityWeights, TaskId,
    TaskProgress,
};
use crate::services::CancellationFlag;
use crate::services::similarity::{
    SimilarityScorer, StringPair, normalize, phonetic_codes, tokens,
};
use crate::storage::{CandidateSource, DuplicateStore};
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Shortest token used as a blocking key.
const MIN_BLOCK_TOKEN_CHARS: usize = 3;

/// Parameters of one scan, fixed when the task starts.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// Task the groups are attributed to.
    pub task_id: TaskId,
    /// Project being scanned.
    pub project_id: i64,
    /// Entity type being scanned.
    pub entity_type: EntityType,
    /// Match threshold.
    pub threshold: f64,
    /// Scoring weights.
    pub weights: SimilarityWeights,
    /// Candidate page size.
    pub batch_size: usize,
    /// Hard cap on records scanned.
    pub max_items: Option<usize>,
    /// Compare only records that share a blocking key.
    pub blocking: bool,
}

/// How a scan ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every candidate (up to the cap) was scanned.
    Completed,
    /// The cancellation flag was observed between pages.
    Cancelled,
}

/// Progress report emitted after each page.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Counters so far.
    pub progress: TaskProgress,
    /// Groups currently owned by the scan, oldest first.
    pub groups: Vec<GroupId>,
}

/// A record admitted to the comparison set.
struct Seen {
    record: Record,
    normalized: String,
}

/// One scan over a project's candidates.
pub struct Scan<'a> {
    plan: &'a ScanPlan,
    source: &'a dyn CandidateSource,
    store: &'a dyn DuplicateStore,
    scorer: &'a SimilarityScorer,
    cancel: &'a CancellationFlag,

    seen: Vec<Seen>,
    index_of: HashMap<RecordId, usize>,
    retired: HashSet<usize>,
    blocks: HashMap<String, Vec<usize>>,
    clusters: Clusters,
    progress: TaskProgress,

    pending: Vec<(usize, usize)>,
    pending_pairs: Vec<StringPair>,
    absorbed: Vec<GroupId>,
}

impl<'a> Scan<'a> {
    /// Prepares a scan.
    pub fn new(
        plan: &'a ScanPlan,
        source: &'a dyn CandidateSource,
        store: &'a dyn DuplicateStore,
        scorer: &'a SimilarityScorer,
        cancel: &'a CancellationFlag,
    ) -> Self {
        Self {
            plan,
            source,
            store,
            scorer,
            cancel,
            seen: Vec::new(),
            index_of: HashMap::new(),
            retired: HashSet::new(),
            blocks: HashMap::new(),
            clusters: Clusters::default(),
            progress: TaskProgress::default(),
            pending: Vec::new(),
            pending_pairs: Vec::new(),
            absorbed: Vec::new(),
        }
    }

    /// Runs the scan to completion or cancellation.
    ///
    /// `on_page` receives a report after every page has been scored and its
    /// groups persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataSource`] when a candidate fetch fails, and any
    /// store or scoring error unchanged. Groups persisted by earlier pages
    /// stay in the store.
    pub fn run(mut self, mut on_page: impl FnMut(&ScanReport)) -> Result<ScanOutcome> {
        let batch_size = self.plan.batch_size.max(1);
        let mut offset = 0;

        match self
            .source
            .count_candidates(self.plan.project_id, self.plan.entity_type)
        {
            Ok(count) => {
                let total = self.plan.max_items.map_or(count, |cap| count.min(cap));
                self.progress.total = Some(total as u64);
                on_page(&ScanReport {
                    progress: self.progress,
                    groups: Vec::new(),
                });
            },
            Err(e) => tracing::warn!(
                task_id = %self.plan.task_id,
                error = %e,
                "Candidate count unavailable, progress has no total"
            ),
        }

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    task_id = %self.plan.task_id,
                    offset,
                    "Scan cancelled between batches"
                );
                return Ok(ScanOutcome::Cancelled);
            }

            let limit = match self.plan.max_items {
                Some(cap) => batch_size.min(cap.saturating_sub(offset)),
                None => batch_size,
            };
            if limit == 0 {
                break;
            }

            let mut page = self
                .source
                .fetch_candidate_batch(self.plan.project_id, self.plan.entity_type, offset, limit)
                .map_err(|e| match e {
                    Error::DataSource(_) => e,
                    other => Error::DataSource(other.to_string()),
                })?;
            page.truncate(limit);
            let fetched = page.len();
            if fetched == 0 {
                break;
            }
            offset += fetched;

            for record in page {
                self.admit(record)?;
            }
            self.flush_pairs()?;
            self.persist_clusters()?;

            on_page(&ScanReport {
                progress: self.progress,
                groups: self.clusters.group_ids(),
            });
            tracing::debug!(
                task_id = %self.plan.task_id,
                scanned = self.progress.scanned,
                compared = self.progress.compared,
                groups = self.clusters.group_count(),
                "Scan page processed"
            );

            if fetched < limit {
                break;
            }
        }

        Ok(ScanOutcome::Completed)
    }

    /// Queues comparisons for a new record, then adds it to the seen set.
    fn admit(&mut self, record: Record) -> Result<()> {
        self.progress.scanned += 1;
        let normalized = normalize(&record.name);
        if normalized.is_empty() || self.index_of.contains_key(&record.id) {
            return Ok(());
        }

        let keys = if self.plan.blocking {
            blocking_keys(&normalized)
        } else {
            Vec::new()
        };
        let candidates: Vec<usize> = if self.plan.blocking {
            keys.iter()
                .filter_map(|k| self.blocks.get(k))
                .flatten()
                .copied()
                .filter(|i| !self.retired.contains(i))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            (0..self.seen.len())
                .filter(|i| !self.retired.contains(i))
                .collect()
        };

        let index = self.clusters.push();
        self.index_of.insert(record.id, index);
        for earlier in candidates {
            self.pending.push((earlier, index));
            self.pending_pairs.push(StringPair::new(
                self.seen[earlier].normalized.clone(),
                normalized.clone(),
            ));
            if self.pending.len() >= self.scorer.max_batch_pairs().max(1) {
                self.flush_pairs()?;
            }
        }

        for key in keys {
            self.blocks.entry(key).or_default().push(index);
        }
        self.seen.push(Seen { record, normalized });
        Ok(())
    }

    /// Scores queued pairs and unions the matches.
    fn flush_pairs(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pairs = std::mem::take(&mut self.pending_pairs);
        let indices = std::mem::take(&mut self.pending);
        let (results, _) = self.scorer.batch_compare(&pairs, &self.plan.weights)?;
        self.progress.compared += indices.len() as u64;

        for ((left, right), result) in indices.into_iter().zip(results) {
            if result.score >= self.plan.threshold
                && let Some(absorbed) = self.clusters.union(left, right, result.score)
            {
                self.absorbed.push(absorbed);
            }
        }
        Ok(())
    }

    /// Writes every cluster changed since the last page.
    ///
    /// Surviving groups are saved before the groups they absorbed are
    /// removed, so a failed write never loses a persisted match.
    fn persist_clusters(&mut self) -> Result<()> {
        let absorbed = std::mem::take(&mut self.absorbed);
        for id in &absorbed {
            if let Some(group) = self.store.get_group(id)?
                && !group.is_open()
            {
                self.retire_closed(&group);
            }
        }

        for root in self.clusters.take_dirty() {
            self.persist_cluster(root)?;
        }

        for id in absorbed {
            if self.store.remove_open_group(&id)? {
                tracing::debug!(group_id = %id, "Absorbed group removed");
            }
        }
        Ok(())
    }

    fn persist_cluster(&mut self, root: usize) -> Result<()> {
        loop {
            let records = self.live_members(root)?;
            if records.len() < 2 {
                return Ok(());
            }
            let existing = self.clusters.group(root).cloned();
            let id = existing
                .as_ref()
                .map_or_else(GroupId::generate, |g| g.id.clone());

            let Some(mut group) =
                DuplicateGroup::from_records(id.clone(), &records, self.clusters.max_score(root))
            else {
                return Ok(());
            };
            group = group.with_task(self.plan.task_id.as_str());
            if let Some(existing) = &existing {
                group.created_at = existing.created_at;
            }

            if self.store.save_open_group(&group)? {
                if existing.is_none() {
                    self.clusters.assign(root, id, group.created_at);
                    self.progress.groups_found += 1;
                    metrics::counter!("duplicate_group_created_total").increment(1);
                }
                return Ok(());
            }

            tracing::info!(
                task_id = %self.plan.task_id,
                group_id = %id,
                "Group closed during scan, leaving it as reviewed"
            );
            metrics::counter!("duplicate_group_closed_during_scan_total").increment(1);
            self.clusters.release(root);
            if let Some(closed) = self.store.get_group(&id)? {
                self.retire_closed(&closed);
            }
            if existing.is_none() {
                return Ok(());
            }
        }
    }

    /// Member records of a cluster that are neither retired nor deleted.
    fn live_members(&mut self, root: usize) -> Result<Vec<Record>> {
        let indices: Vec<usize> = self
            .clusters
            .members(root)
            .iter()
            .copied()
            .filter(|i| !self.retired.contains(i))
            .collect();
        let ids: Vec<RecordId> = indices.iter().map(|&i| self.seen[i].record.id).collect();
        let present: HashSet<RecordId> = self
            .store
            .get_records(self.plan.project_id, &ids)?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut live = Vec::with_capacity(indices.len());
        for i in indices {
            let record = &self.seen[i].record;
            if present.contains(&record.id) {
                live.push(record.clone());
            } else {
                tracing::debug!(record_id = %record.id, "Deleted record retired from scan");
                self.retired.insert(i);
            }
        }
        Ok(live)
    }

    /// Takes a reviewed group's members out of further matching.
    fn retire_closed(&mut self, group: &DuplicateGroup) {
        for member in &group.members {
            if let Some(&index) = self.index_of.get(member) {
                self.retired.insert(index);
            }
        }
    }
}

/// Tokens of at least three characters plus their phonetic codes.
fn blocking_keys(normalized: &str) -> Vec<String> {
    let mut keys: BTreeSet<String> = tokens(normalized)
        .filter(|t| t.chars().count() >= MIN_BLOCK_TOKEN_CHARS)
        .map(|t| format!("t:{t}"))
        .collect();
    keys.extend(phonetic_codes(normalized).into_iter().map(|c| format!("p:{c}")));
    keys.into_iter().collect()
}
