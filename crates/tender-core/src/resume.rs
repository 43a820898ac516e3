//! Resume on project entry
//!
//! Asks the backend for the latest run of every kind in one call, seeds
//! the cache from the answer and re-attaches a poll timer to every run that
//! is still in progress. Successful runs get their payload loaded eagerly.

use crate::backend::complete_latest_runs;
use crate::error::WorkspaceError;
use crate::types::{RunStatus, TaskKind};
use crate::view::{NoticeUpdate, Ticket};
use crate::workspace::Shared;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

/// What a resume found, per task kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeSummary {
    /// Kinds with a pending or running job now being polled
    pub polling: Vec<TaskKind>,
    /// Kinds whose latest run succeeded
    pub completed: Vec<TaskKind>,
    /// Kinds whose latest run failed
    pub failed: Vec<TaskKind>,
    /// Kinds that were never run
    pub never_run: Vec<TaskKind>,
}

impl Shared {
    /// Resume the jobs of `ticket.project`.
    ///
    /// Idempotent: resuming twice leaves the same cache content and the same
    /// set of live timers. Timers are only attached while the ticket is current.
    pub(crate) async fn resume(
        self: &Arc<Self>,
        ticket: Ticket,
    ) -> Result<ResumeSummary, WorkspaceError> {
        let project = ticket.project.clone();
        let latest = self
            .backend
            .get_latest_runs(&project)
            .await
            .map_err(|source| {
                tracing::warn!(project = %project, "resume failed: {}", source);
                WorkspaceError::Resume {
                    project: project.clone(),
                    source,
                }
            })?;

        let mut summary = ResumeSummary::default();
        let mut fetches = Vec::new();

        for (kind, latest) in complete_latest_runs(latest) {
            let Some(record) = latest else {
                summary.never_run.push(kind);
                continue;
            };
            if record.project_id != project || record.kind != kind {
                tracing::warn!(
                    project = %project,
                    kind = %kind,
                    run_id = %record.id,
                    "latest run belongs to another project or kind, ignoring"
                );
                continue;
            }

            let run_id = record.id.clone();
            let status = record.status;
            let message = record.message.clone();
            let known = self
                .cache
                .record(&project, kind)
                .is_some_and(|cached| cached.id == run_id);
            if !known {
                self.cache.clear_result(&project, kind);
            }
            self.cache.set(&project, kind, record);
            let current = self.project(&ticket, kind, NoticeUpdate::Keep);

            match status {
                RunStatus::Pending | RunStatus::Running => {
                    summary.polling.push(kind);
                    if current {
                        self.start_polling(ticket.clone(), kind, run_id);
                    }
                }
                RunStatus::Success => {
                    summary.completed.push(kind);
                    let cached = self.cache.get(&project).result(kind).is_some();
                    if !cached {
                        let shared = Arc::clone(self);
                        let ticket = ticket.clone();
                        fetches.push(async move {
                            shared.refresh_result(&ticket, kind, run_id).await;
                        });
                    }
                }
                RunStatus::Failed => {
                    summary.failed.push(kind);
                    let notice = self.classifier.classify(kind, message.as_deref());
                    self.project(&ticket, kind, NoticeUpdate::Raise(notice));
                }
            }
        }

        join_all(fetches).await;

        tracing::info!(
            project = %project,
            polling = summary.polling.len(),
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            "project resumed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LatestRuns, MockTenderBackend};
    use crate::error::BackendError;
    use crate::types::{ProjectId, RunId, RunRecord, TaskPayload, WorkspaceConfig};
    use crate::view::TaskNotice;
    use crate::workspace::Workspace;
    use serde_json::json;

    fn p1() -> ProjectId {
        ProjectId::new("p1")
    }

    #[tokio::test]
    async fn resume_failure_keeps_cached_view() {
        let mut backend = MockTenderBackend::new();
        backend
            .expect_get_latest_runs()
            .returning(|_| Err(BackendError::Network("refused".to_string())));
        let ws = Workspace::new(Arc::new(backend), WorkspaceConfig::default()).unwrap();
        ws.cache().set(
            &p1(),
            TaskKind::Review,
            RunRecord::pending(RunId::new("v1"), p1(), TaskKind::Review),
        );

        let result = ws.select_project("p1").await;

        assert!(matches!(result, Err(WorkspaceError::Resume { .. })));
        assert_eq!(ws.active_project(), Some(p1()));
        assert_eq!(
            ws.panel(TaskKind::Review).run.map(|r| r.id),
            Some(RunId::new("v1"))
        );
    }

    #[tokio::test]
    async fn resume_loads_results_and_failures() {
        let mut backend = MockTenderBackend::new();
        backend.expect_get_latest_runs().returning(|project| {
            let mut runs = LatestRuns::new();
            runs.insert(
                TaskKind::RequirementExtraction,
                Some(
                    RunRecord::pending(
                        RunId::new("q1"),
                        project.clone(),
                        TaskKind::RequirementExtraction,
                    )
                    .succeeded("req-1"),
                ),
            );
            runs.insert(
                TaskKind::Review,
                Some(
                    RunRecord::pending(RunId::new("v1"), project.clone(), TaskKind::Review)
                        .failed("requirements have not been extracted"),
                ),
            );
            Ok(runs)
        });
        backend
            .expect_fetch_result()
            .times(1)
            .returning(|_, _| Ok(TaskPayload::Requirements(vec![json!({ "id": "R1" })])));
        let ws = Workspace::new(Arc::new(backend), WorkspaceConfig::default()).unwrap();

        let summary = ws.select_project("p1").await.unwrap();

        assert_eq!(summary.completed, vec![TaskKind::RequirementExtraction]);
        assert_eq!(summary.failed, vec![TaskKind::Review]);
        assert_eq!(
            summary.never_run,
            vec![TaskKind::InfoExtraction, TaskKind::DirectoryGeneration]
        );
        assert!(summary.polling.is_empty());
        assert!(ws.live_timers().is_empty());
        assert!(ws.panel(TaskKind::RequirementExtraction).result.is_some());
        assert_eq!(
            ws.panel(TaskKind::Review).notice,
            Some(TaskNotice::MissingRequirements)
        );
    }

    #[tokio::test]
    async fn resume_of_inactive_project_only_fills_cache() {
        let mut backend = MockTenderBackend::new();
        backend.expect_get_latest_runs().returning(|project| {
            let mut runs = LatestRuns::new();
            runs.insert(
                TaskKind::DirectoryGeneration,
                Some(
                    RunRecord::pending(
                        RunId::new("d1"),
                        project.clone(),
                        TaskKind::DirectoryGeneration,
                    )
                    .running(0.3),
                ),
            );
            Ok(runs)
        });
        let ws = Workspace::new(Arc::new(backend), WorkspaceConfig::default()).unwrap();

        let summary = ws.resume("p9").await.unwrap();

        assert_eq!(summary.polling, vec![TaskKind::DirectoryGeneration]);
        assert!(ws.live_timers().is_empty());
        assert!(ws
            .cache()
            .record(&ProjectId::new("p9"), TaskKind::DirectoryGeneration)
            .is_some());
        assert!(ws.view().project.is_none());
    }
}
