//! Backend collaborator interface
//!
//! The engine only ever submits jobs, fetches run records and fetches
//! result payloads. Everything else about the document, knowledge-base and
//! model backends stays behind this trait.

use crate::error::BackendError;
use crate::types::{ProjectId, RunId, RunRecord, SubmitRequest, TaskKind, TaskPayload};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Latest run of every task kind of a project (`None` = never run)
pub type LatestRuns = BTreeMap<TaskKind, Option<RunRecord>>;

/// Backend operations consumed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenderBackend: Send + Sync {
    /// Submit a job, returning its handle
    async fn submit(
        &self,
        project: &ProjectId,
        request: &SubmitRequest,
    ) -> Result<RunId, BackendError>;

    /// Fetch the current record of a run
    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, BackendError>;

    /// Fetch the latest run of every kind for a project in one call
    async fn get_latest_runs(&self, project: &ProjectId) -> Result<LatestRuns, BackendError>;

    /// Fetch the output payload of the latest successful run of `kind`
    async fn fetch_result(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<TaskPayload, BackendError>;

    /// Fetch a partial preview of a running job, if the backend has one
    async fn fetch_partial(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<Option<TaskPayload>, BackendError>;
}

/// Fill in `None` for every kind the backend left out of a latest-runs answer
#[must_use]
pub fn complete_latest_runs(mut runs: LatestRuns) -> LatestRuns {
    for kind in TaskKind::ALL {
        runs.entry(kind).or_insert(None);
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_latest_runs_covers_every_kind() {
        let mut partial = LatestRuns::new();
        partial.insert(
            TaskKind::Review,
            Some(RunRecord::pending("r".into(), "p".into(), TaskKind::Review)),
        );

        let runs = complete_latest_runs(partial);

        assert_eq!(runs.len(), 4);
        assert!(runs[&TaskKind::Review].is_some());
        assert!(runs[&TaskKind::InfoExtraction].is_none());
    }
}
