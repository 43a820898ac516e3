//! Task lifecycle
//!
//! Each task kind runs the machine `pending -> running -> {success, failed}`.
//! Terminal states accept no transition; a new submission creates a new run
//! that starts over from `pending`. Entering `success` triggers exactly one
//! fetch of the result payload.

use crate::error::{LifecycleError, WorkspaceError};
use crate::types::{RunId, RunRecord, RunStatus, SubmitRequest, TaskKind};
use crate::view::{NoticeUpdate, TaskNotice, Ticket};
use crate::workspace::Shared;
use regex::Regex;
use std::sync::Arc;

/// Validates a status transition of one run.
///
/// Non-terminal observations may arrive out of order (overlapping polls),
/// so any move out of `pending` or `running` is accepted, including a
/// repeat of the same status with new progress.
pub fn validate_transition(from: RunStatus, to: RunStatus) -> Result<(), LifecycleError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(LifecycleError::IllegalTransition { from, to })
    }
}

/// Statuses a run in `from` may be observed in next
#[must_use]
pub fn allowed_transitions(from: RunStatus) -> Vec<RunStatus> {
    use RunStatus::{Failed, Pending, Running, Success};
    match from {
        Pending | Running => vec![Pending, Running, Success, Failed],
        Success | Failed => vec![],
    }
}

/// Maps a failed run's message to the notice shown to the user
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    missing_requirements: Regex,
}

impl FailureClassifier {
    /// Create classifier from the missing-requirements pattern
    #[inline]
    #[must_use]
    pub fn new(missing_requirements: Regex) -> Self {
        Self {
            missing_requirements,
        }
    }

    /// Classify the failure message of a run of `kind`
    #[must_use]
    pub fn classify(&self, kind: TaskKind, message: Option<&str>) -> TaskNotice {
        let message = message.map(str::trim).unwrap_or_default();
        if kind == TaskKind::Review && self.missing_requirements.is_match(message) {
            TaskNotice::MissingRequirements
        } else if message.is_empty() {
            TaskNotice::JobFailed("no reason given".to_string())
        } else {
            TaskNotice::JobFailed(message.to_string())
        }
    }
}

impl Shared {
    /// Submit a job and start tracking it
    pub(crate) async fn submit(
        self: &Arc<Self>,
        ticket: Ticket,
        request: SubmitRequest,
    ) -> Result<RunId, WorkspaceError> {
        let kind = request.kind();
        let project = ticket.project.clone();

        if kind == TaskKind::Review && !self.requirements_ready(&ticket) {
            tracing::debug!(
                project = %project,
                "review submitted before requirement extraction succeeded"
            );
        }

        let run_id = match self.backend.submit(&project, &request).await {
            Ok(run_id) => run_id,
            Err(source) => {
                tracing::warn!(project = %project, kind = %kind, "submission failed: {}", source);
                self.project(
                    &ticket,
                    kind,
                    NoticeUpdate::Raise(TaskNotice::SubmitFailed(source.to_string())),
                );
                return Err(WorkspaceError::Submission { kind, source });
            }
        };
        tracing::info!(project = %project, kind = %kind, run_id = %run_id, "job submitted");

        let record = RunRecord::pending(run_id.clone(), project.clone(), kind);
        self.cache.set(&project, kind, record);
        self.cache.clear_result(&project, kind);

        if self.project(&ticket, kind, NoticeUpdate::Clear) {
            self.start_polling(ticket, kind, run_id.clone());
        } else {
            tracing::debug!(
                project = %project,
                kind = %kind,
                "project switched during submission, polling deferred to resume"
            );
        }

        Ok(run_id)
    }

    /// Handle a run observed in `success`: fetch its payload once, then
    /// record the terminal state.
    ///
    /// Ignored unless the run is still the cached, non-terminal run of its
    /// kind. The claim in `completions` only covers the payload fetch.
    pub(crate) async fn complete_run(&self, ticket: &Ticket, kind: TaskKind, record: RunRecord) {
        let project = &ticket.project;
        let tracked = self
            .cache
            .record(project, kind)
            .is_some_and(|cached| cached.id == record.id && !cached.is_terminal());
        if !tracked {
            tracing::debug!(
                project = %project,
                kind = %kind,
                run_id = %record.id,
                "success of a replaced or finished run, ignoring"
            );
            return;
        }
        if !self.completions.insert(record.id.clone()) {
            tracing::trace!(run_id = %record.id, "completion already in progress");
            return;
        }

        let (stored, notice) = match self.backend.fetch_result(project, kind).await {
            Ok(payload) => (
                self.cache.set_result(project, kind, &record.id, payload),
                NoticeUpdate::Clear,
            ),
            Err(source) => {
                let notice = TaskNotice::ResultFetchFailed(source.to_string());
                let error = WorkspaceError::ResultFetch { kind, source };
                tracing::warn!(project = %project, run_id = %record.id, "{}", error);
                (false, NoticeUpdate::Raise(notice))
            }
        };

        let run_id = record.id.clone();
        let applied = self.cache.apply_observed(project, kind, record).applied();
        self.completions.remove(&run_id);

        if !(applied || stored) {
            tracing::debug!(
                project = %project,
                kind = %kind,
                run_id = %run_id,
                "run replaced during result fetch"
            );
            return;
        }
        tracing::info!(project = %project, kind = %kind, run_id = %run_id, "job succeeded");
        if !self.project(ticket, kind, notice) {
            tracing::debug!(project = %project, kind = %kind, "discarding stale completion");
        }
    }

    /// Handle a run observed in `failed`
    pub(crate) fn fail_run(&self, ticket: &Ticket, kind: TaskKind, record: RunRecord) {
        let notice = self.classifier.classify(kind, record.message.as_deref());
        tracing::warn!(
            project = %ticket.project,
            kind = %kind,
            run_id = %record.id,
            "job failed: {}",
            record.message.as_deref().unwrap_or("no reason given")
        );
        if self
            .cache
            .apply_observed(&ticket.project, kind, record)
            .applied()
        {
            self.project(ticket, kind, NoticeUpdate::Raise(notice));
        }
    }

    /// Fetch the payload of an already successful run (no completion claim)
    pub(crate) async fn refresh_result(&self, ticket: &Ticket, kind: TaskKind, run_id: RunId) {
        let project = &ticket.project;
        match self.backend.fetch_result(project, kind).await {
            Ok(payload) => {
                if self.cache.set_result(project, kind, &run_id, payload) {
                    self.project(ticket, kind, NoticeUpdate::Keep);
                }
            }
            Err(source) => {
                let notice = TaskNotice::ResultFetchFailed(source.to_string());
                let error = WorkspaceError::ResultFetch { kind, source };
                tracing::warn!(project = %project, run_id = %run_id, "{}", error);
                self.project(ticket, kind, NoticeUpdate::Raise(notice));
            }
        }
    }

    fn requirements_ready(&self, ticket: &Ticket) -> bool {
        self.cache
            .record(&ticket.project, TaskKind::RequirementExtraction)
            .is_some_and(|run| run.status == RunStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkspaceConfig;
    use proptest::prelude::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new(WorkspaceConfig::default().missing_requirements_regex().unwrap())
    }

    #[test]
    fn non_terminal_transitions() {
        assert!(validate_transition(RunStatus::Pending, RunStatus::Running).is_ok());
        assert!(validate_transition(RunStatus::Pending, RunStatus::Success).is_ok());
        assert!(validate_transition(RunStatus::Running, RunStatus::Running).is_ok());
        assert!(validate_transition(RunStatus::Running, RunStatus::Failed).is_ok());
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(validate_transition(RunStatus::Success, RunStatus::Running).is_err());
        assert!(validate_transition(RunStatus::Success, RunStatus::Success).is_err());
        assert_eq!(
            validate_transition(RunStatus::Failed, RunStatus::Pending),
            Err(LifecycleError::IllegalTransition {
                from: RunStatus::Failed,
                to: RunStatus::Pending
            })
        );
    }

    #[test]
    fn review_rejection_gets_guidance() {
        let notice = classifier().classify(
            TaskKind::Review,
            Some("Requirements have not been extracted for this project"),
        );
        assert_eq!(notice, TaskNotice::MissingRequirements);
    }

    #[test]
    fn other_failures_keep_backend_text() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify(TaskKind::Review, Some("model quota exceeded")),
            TaskNotice::JobFailed("model quota exceeded".to_string())
        );
        // the pattern only applies to reviews
        assert_eq!(
            classifier.classify(TaskKind::DirectoryGeneration, Some("missing requirements")),
            TaskNotice::JobFailed("missing requirements".to_string())
        );
        assert_eq!(
            classifier.classify(TaskKind::InfoExtraction, None),
            TaskNotice::JobFailed("no reason given".to_string())
        );
    }

    fn any_status() -> impl Strategy<Value = RunStatus> {
        prop_oneof![
            Just(RunStatus::Pending),
            Just(RunStatus::Running),
            Just(RunStatus::Success),
            Just(RunStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in any_status(), to in any_status()) {
            let res = validate_transition(from, to);
            prop_assert_eq!(res.is_ok(), allowed_transitions(from).contains(&to));
            if from.is_terminal() {
                prop_assert!(res.is_err());
            }
        }
    }
}
