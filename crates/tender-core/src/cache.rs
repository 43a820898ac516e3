//! Project state cache
//!
//! Process-lifetime store of the last observed run record and result
//! payload of every task kind, keyed by project. Entries are created lazily
//! on first access and never evicted, so task state outlives navigation
//! between projects. Readers always receive a copy of an entry.

use crate::lifecycle::validate_transition;
use crate::types::{ProjectId, RunId, RunRecord, TaskKind, TaskPayload};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cached state of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectEntry {
    /// Most recently observed run per kind (absent = never run)
    pub runs: BTreeMap<TaskKind, RunRecord>,
    /// Fetched result payload per kind
    pub results: BTreeMap<TaskKind, TaskPayload>,
}

impl ProjectEntry {
    /// Run record of a kind
    #[inline]
    #[must_use]
    pub fn run(&self, kind: TaskKind) -> Option<&RunRecord> {
        self.runs.get(&kind)
    }

    /// Result payload of a kind
    #[inline]
    #[must_use]
    pub fn result(&self, kind: TaskKind) -> Option<&TaskPayload> {
        self.results.get(&kind)
    }
}

/// Outcome of a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    /// Record stored
    Applied,
    /// Cached record of the same run is terminal; write ignored
    TerminalLocked,
    /// A different run is cached for this kind; write ignored
    Superseded,
}

impl CacheWrite {
    /// Whether the write changed the cache
    #[inline]
    #[must_use]
    pub fn applied(self) -> bool {
        matches!(self, CacheWrite::Applied)
    }
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of projects with an entry
    pub project_count: usize,
    /// Number of cached run records across projects
    pub run_count: usize,
}

/// Project state cache
#[derive(Debug, Default)]
pub struct ProjectStateCache {
    inner: DashMap<ProjectId, ProjectEntry>,
}

impl ProjectStateCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a project's entry, creating an empty one on first access
    #[must_use]
    pub fn get(&self, project: &ProjectId) -> ProjectEntry {
        self.inner.entry(project.clone()).or_default().clone()
    }

    /// Cached record of one kind
    #[must_use]
    pub fn record(&self, project: &ProjectId, kind: TaskKind) -> Option<RunRecord> {
        self.inner
            .get(project)
            .and_then(|entry| entry.runs.get(&kind).cloned())
    }

    /// Store a record as the current run of its kind.
    ///
    /// Used for submissions and resume answers: a record of another run
    /// replaces the cached one, but a terminal record is never overwritten
    /// by its own run.
    pub fn set(&self, project: &ProjectId, kind: TaskKind, record: RunRecord) -> CacheWrite {
        let mut entry = self.inner.entry(project.clone()).or_default();
        if let Some(existing) = entry.runs.get(&kind) {
            if existing.id == record.id && existing.is_terminal() {
                return CacheWrite::TerminalLocked;
            }
        }
        entry.runs.insert(kind, record);
        CacheWrite::Applied
    }

    /// Store a record observed by a poll tick.
    ///
    /// Only the run currently cached for the kind can be updated, and only
    /// while it is not terminal. Among non-terminal observations the last
    /// one written wins.
    pub fn apply_observed(
        &self,
        project: &ProjectId,
        kind: TaskKind,
        record: RunRecord,
    ) -> CacheWrite {
        let mut entry = self.inner.entry(project.clone()).or_default();
        match entry.runs.get(&kind) {
            Some(existing) if existing.id != record.id => return CacheWrite::Superseded,
            Some(existing) if validate_transition(existing.status, record.status).is_err() => {
                return CacheWrite::TerminalLocked;
            }
            _ => {}
        }
        entry.runs.insert(kind, record);
        CacheWrite::Applied
    }

    /// Store the result payload of `run_id`, if that run is still current
    pub fn set_result(
        &self,
        project: &ProjectId,
        kind: TaskKind,
        run_id: &RunId,
        payload: TaskPayload,
    ) -> bool {
        let mut entry = self.inner.entry(project.clone()).or_default();
        if entry.runs.get(&kind).is_some_and(|run| &run.id == run_id) {
            entry.results.insert(kind, payload);
            true
        } else {
            false
        }
    }

    /// Merge a preview into the result slot while `run_id` is still running
    pub fn merge_partial(
        &self,
        project: &ProjectId,
        kind: TaskKind,
        run_id: &RunId,
        partial: TaskPayload,
    ) -> bool {
        let mut entry = self.inner.entry(project.clone()).or_default();
        let current = entry
            .runs
            .get(&kind)
            .is_some_and(|run| &run.id == run_id && !run.is_terminal());
        if !current {
            return false;
        }
        match entry.results.get_mut(&kind) {
            Some(existing) => existing.merge_partial(partial),
            None => {
                entry.results.insert(kind, partial);
            }
        }
        true
    }

    /// Drop the result payload of a kind
    pub fn clear_result(&self, project: &ProjectId, kind: TaskKind) {
        if let Some(mut entry) = self.inner.get_mut(project) {
            entry.results.remove(&kind);
        }
    }

    /// Check whether a project has an entry
    #[inline]
    #[must_use]
    pub fn contains(&self, project: &ProjectId) -> bool {
        self.inner.contains_key(project)
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            project_count: self.inner.len(),
            run_count: self.inner.iter().map(|entry| entry.runs.len()).sum(),
        }
    }
}
