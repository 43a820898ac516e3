//! Scriptable in-memory backend
//!
//! Simulates the tender backend for the CLI and for tests. Every run
//! replays a script of steps, one per status check, repeating the last
//! step forever. Results, previews, failures and fetch gates are set up by
//! the caller.

use crate::backend::{LatestRuns, TenderBackend};
use crate::error::BackendError;
use crate::types::{ProjectId, RunId, RunRecord, RunStatus, SubmitRequest, TaskKind, TaskPayload};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Message of a review rejected because requirements were never extracted
pub const REQUIREMENTS_NOT_EXTRACTED: &str =
    "requirements have not been extracted for this project; run requirement extraction first";

/// One scripted status of a simulated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStep {
    /// Queued
    Pending,
    /// Processing with progress
    Running {
        /// Completion fraction
        #[serde(default)]
        progress: f64,
    },
    /// Finished
    Success,
    /// Finished with an error
    Failed {
        /// Failure text
        message: String,
    },
}

impl RunStep {
    fn record(&self, id: &RunId, project: &ProjectId, kind: TaskKind) -> RunRecord {
        let base = RunRecord::pending(id.clone(), project.clone(), kind);
        match self {
            RunStep::Pending => base,
            RunStep::Running { progress } => base.running(*progress),
            RunStep::Success => base.succeeded(format!("{kind}/{id}")),
            RunStep::Failed { message } => base.failed(message.clone()),
        }
    }
}

/// Script used when none was queued for a submission
#[must_use]
pub fn default_script() -> Vec<RunStep> {
    vec![RunStep::Running { progress: 0.5 }, RunStep::Success]
}

type Pair = (ProjectId, TaskKind);

#[derive(Debug)]
struct SimulatedRun {
    remaining: VecDeque<RunRecord>,
    current: RunRecord,
}

#[derive(Debug, Default)]
struct State {
    runs: HashMap<RunId, SimulatedRun>,
    latest: HashMap<Pair, RunId>,
    scripts: HashMap<Pair, VecDeque<Vec<RunStep>>>,
    results: HashMap<Pair, TaskPayload>,
    result_errors: HashMap<Pair, BackendError>,
    partials: HashMap<Pair, VecDeque<TaskPayload>>,
    submit_error: Option<BackendError>,
    latest_error: Option<BackendError>,
}

/// Call counters
#[derive(Debug, Default)]
struct Calls {
    submit: AtomicUsize,
    get_run: AtomicUsize,
    latest: AtomicUsize,
    fetch_result: AtomicUsize,
}

/// Simulated [`TenderBackend`]
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    status_gates: Mutex<HashMap<Pair, Arc<Semaphore>>>,
    result_gates: Mutex<HashMap<Pair, Arc<Semaphore>>>,
    calls: Calls,
}

impl InMemoryBackend {
    /// Create empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script of the next submission of `kind` for `project`
    pub fn script(&self, project: &ProjectId, kind: TaskKind, steps: Vec<RunStep>) {
        self.state
            .lock()
            .scripts
            .entry((project.clone(), kind))
            .or_default()
            .push_back(steps);
    }

    /// Register a run that already exists on the backend and make it the
    /// latest run of its pair. Its first step is visible before any check.
    pub fn seed_run(&self, project: &ProjectId, kind: TaskKind, steps: Vec<RunStep>) -> RunId {
        let run_id = RunId::generate();
        self.state.lock().register(run_id.clone(), project, kind, steps);
        run_id
    }

    /// Payload served by `fetch_result` for a pair
    pub fn set_result(&self, project: &ProjectId, kind: TaskKind, payload: TaskPayload) {
        self.state
            .lock()
            .results
            .insert((project.clone(), kind), payload);
    }

    /// Queue a preview served by one `fetch_partial` call
    pub fn push_partial(&self, project: &ProjectId, kind: TaskKind, payload: TaskPayload) {
        self.state
            .lock()
            .partials
            .entry((project.clone(), kind))
            .or_default()
            .push_back(payload);
    }

    /// Make the next submission fail
    pub fn fail_next_submit(&self, error: BackendError) {
        self.state.lock().submit_error = Some(error);
    }

    /// Make result fetches of a pair fail until cleared
    pub fn fail_results(&self, project: &ProjectId, kind: TaskKind, error: Option<BackendError>) {
        let mut state = self.state.lock();
        let pair = (project.clone(), kind);
        match error {
            Some(error) => {
                state.result_errors.insert(pair, error);
            }
            None => {
                state.result_errors.remove(&pair);
            }
        }
    }

    /// Make latest-run queries fail until cleared
    pub fn fail_latest(&self, error: Option<BackendError>) {
        self.state.lock().latest_error = error;
    }

    /// Hold status checks of a pair until [`release`](Self::release)
    pub fn hold_status(&self, project: &ProjectId, kind: TaskKind) {
        self.status_gates
            .lock()
            .insert((project.clone(), kind), Arc::new(Semaphore::new(0)));
    }

    /// Hold result fetches of a pair until [`release`](Self::release)
    pub fn hold_results(&self, project: &ProjectId, kind: TaskKind) {
        self.result_gates
            .lock()
            .insert((project.clone(), kind), Arc::new(Semaphore::new(0)));
    }

    /// Let held calls of a pair through
    pub fn release(&self, project: &ProjectId, kind: TaskKind) {
        let pair = (project.clone(), kind);
        for gates in [&self.status_gates, &self.result_gates] {
            if let Some(gate) = gates.lock().remove(&pair) {
                gate.close();
            }
        }
    }

    /// Number of `submit` calls
    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.calls.submit.load(Ordering::SeqCst)
    }

    /// Number of `get_run` calls
    #[must_use]
    pub fn get_run_calls(&self) -> usize {
        self.calls.get_run.load(Ordering::SeqCst)
    }

    /// Number of `get_latest_runs` calls
    #[must_use]
    pub fn latest_calls(&self) -> usize {
        self.calls.latest.load(Ordering::SeqCst)
    }

    /// Number of `fetch_result` calls
    #[must_use]
    pub fn fetch_result_calls(&self) -> usize {
        self.calls.fetch_result.load(Ordering::SeqCst)
    }

    async fn pass(gates: &Mutex<HashMap<Pair, Arc<Semaphore>>>, pair: &Pair) {
        let gate = gates.lock().get(pair).cloned();
        if let Some(gate) = gate {
            // closed on release
            let _ = gate.acquire().await;
        }
    }
}

impl State {
    fn register(
        &mut self,
        run_id: RunId,
        project: &ProjectId,
        kind: TaskKind,
        steps: Vec<RunStep>,
    ) {
        let steps = if steps.is_empty() { default_script() } else { steps };
        let remaining: VecDeque<RunRecord> = steps
            .iter()
            .map(|step| step.record(&run_id, project, kind))
            .collect();
        let current = remaining
            .front()
            .cloned()
            .unwrap_or_else(|| RunRecord::pending(run_id.clone(), project.clone(), kind));
        self.runs.insert(run_id.clone(), SimulatedRun { remaining, current });
        self.latest.insert((project.clone(), kind), run_id);
    }

    fn latest_record(&self, project: &ProjectId, kind: TaskKind) -> Option<&RunRecord> {
        self.latest
            .get(&(project.clone(), kind))
            .and_then(|id| self.runs.get(id))
            .map(|run| &run.current)
    }

    fn requirements_extracted(&self, project: &ProjectId) -> bool {
        self.latest_record(project, TaskKind::RequirementExtraction)
            .is_some_and(|run| run.status == RunStatus::Success)
    }
}

#[async_trait]
impl TenderBackend for InMemoryBackend {
    async fn submit(
        &self,
        project: &ProjectId,
        request: &SubmitRequest,
    ) -> Result<RunId, BackendError> {
        self.calls.submit.fetch_add(1, Ordering::SeqCst);
        let kind = request.kind();
        let mut state = self.state.lock();
        if let Some(error) = state.submit_error.take() {
            return Err(error);
        }

        let queued = state
            .scripts
            .get_mut(&(project.clone(), kind))
            .and_then(VecDeque::pop_front);
        let steps = if kind == TaskKind::Review && !state.requirements_extracted(project) {
            vec![
                RunStep::Pending,
                RunStep::Failed {
                    message: REQUIREMENTS_NOT_EXTRACTED.to_string(),
                },
            ]
        } else {
            queued.unwrap_or_else(default_script)
        };

        let run_id = RunId::generate();
        state.register(run_id.clone(), project, kind, steps);
        Ok(run_id)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, BackendError> {
        self.calls.get_run.fetch_add(1, Ordering::SeqCst);
        let pair = {
            let state = self.state.lock();
            let run = state
                .runs
                .get(run_id)
                .ok_or_else(|| BackendError::NotFound(format!("run {run_id}")))?;
            (run.current.project_id.clone(), run.current.kind)
        };
        Self::pass(&self.status_gates, &pair).await;

        let mut state = self.state.lock();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| BackendError::NotFound(format!("run {run_id}")))?;
        if let Some(next) = run.remaining.pop_front() {
            run.current = next;
        }
        Ok(run.current.clone())
    }

    async fn get_latest_runs(&self, project: &ProjectId) -> Result<LatestRuns, BackendError> {
        self.calls.latest.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(error) = &state.latest_error {
            return Err(error.clone());
        }
        Ok(TaskKind::ALL
            .into_iter()
            .map(|kind| (kind, state.latest_record(project, kind).cloned()))
            .collect())
    }

    async fn fetch_result(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<TaskPayload, BackendError> {
        self.calls.fetch_result.fetch_add(1, Ordering::SeqCst);
        let pair = (project.clone(), kind);
        Self::pass(&self.result_gates, &pair).await;

        let state = self.state.lock();
        if let Some(error) = state.result_errors.get(&pair) {
            return Err(error.clone());
        }
        state
            .results
            .get(&pair)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{kind} result of project {project}")))
    }

    async fn fetch_partial(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<Option<TaskPayload>, BackendError> {
        Ok(self
            .state
            .lock()
            .partials
            .get_mut(&(project.clone(), kind))
            .and_then(VecDeque::pop_front))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p1() -> ProjectId {
        ProjectId::new("p1")
    }

    #[tokio::test]
    async fn script_replays_and_repeats_last_step() {
        let backend = InMemoryBackend::new();
        backend.script(
            &p1(),
            TaskKind::DirectoryGeneration,
            vec![RunStep::Running { progress: 0.2 }, RunStep::Success],
        );
        let run_id = backend
            .submit(&p1(), &SubmitRequest::DirectoryGeneration { mode: Default::default() })
            .await
            .unwrap();

        let statuses = [
            backend.get_run(&run_id).await.unwrap().status,
            backend.get_run(&run_id).await.unwrap().status,
            backend.get_run(&run_id).await.unwrap().status,
        ];

        assert_eq!(statuses, [RunStatus::Running, RunStatus::Success, RunStatus::Success]);
        assert_eq!(backend.get_run_calls(), 3);
    }

    #[tokio::test]
    async fn latest_reflects_last_served_record() {
        let backend = InMemoryBackend::new();
        let run_id = backend.seed_run(
            &p1(),
            TaskKind::InfoExtraction,
            vec![RunStep::Pending, RunStep::Running { progress: 0.7 }],
        );

        let before = backend.get_latest_runs(&p1()).await.unwrap();
        assert_eq!(
            before[&TaskKind::InfoExtraction].as_ref().map(|r| r.status),
            Some(RunStatus::Pending)
        );

        backend.get_run(&run_id).await.unwrap();
        backend.get_run(&run_id).await.unwrap();

        let after = backend.get_latest_runs(&p1()).await.unwrap();
        assert_eq!(
            after[&TaskKind::InfoExtraction].as_ref().map(|r| r.status),
            Some(RunStatus::Running)
        );
        assert!(after[&TaskKind::Review].is_none());
    }

    #[tokio::test]
    async fn review_without_requirements_fails() {
        let backend = InMemoryBackend::new();
        let request = SubmitRequest::Review {
            bidder: "ACME".to_string(),
            rule_pack_ids: vec![],
        };

        let run_id = backend.submit(&p1(), &request).await.unwrap();
        backend.get_run(&run_id).await.unwrap();
        let record = backend.get_run(&run_id).await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.message.as_deref(), Some(REQUIREMENTS_NOT_EXTRACTED));
    }

    #[tokio::test]
    async fn review_after_requirements_uses_script() {
        let backend = InMemoryBackend::new();
        backend.seed_run(&p1(), TaskKind::RequirementExtraction, vec![RunStep::Success]);
        let request = SubmitRequest::Review {
            bidder: "ACME".to_string(),
            rule_pack_ids: vec![],
        };

        let run_id = backend.submit(&p1(), &request).await.unwrap();
        backend.get_run(&run_id).await.unwrap();
        let record = backend.get_run(&run_id).await.unwrap();

        assert_eq!(record.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn injected_failures() {
        let backend = InMemoryBackend::new();
        backend.fail_next_submit(BackendError::Network("down".to_string()));
        assert!(backend
            .submit(&p1(), &SubmitRequest::InfoExtraction)
            .await
            .is_err());
        assert!(backend
            .submit(&p1(), &SubmitRequest::InfoExtraction)
            .await
            .is_ok());

        backend.set_result(
            &p1(),
            TaskKind::InfoExtraction,
            TaskPayload::ProjectInfo(Default::default()),
        );
        backend.fail_results(
            &p1(),
            TaskKind::InfoExtraction,
            Some(BackendError::Rejected {
                status: 500,
                message: "storage".to_string(),
            }),
        );
        assert!(backend.fetch_result(&p1(), TaskKind::InfoExtraction).await.is_err());
        backend.fail_results(&p1(), TaskKind::InfoExtraction, None);
        assert!(backend.fetch_result(&p1(), TaskKind::InfoExtraction).await.is_ok());
        assert_eq!(backend.fetch_result_calls(), 2);
    }

    #[tokio::test]
    async fn partials_are_served_once() {
        let backend = InMemoryBackend::new();
        let preview =
            TaskPayload::from_json(TaskKind::InfoExtraction, json!({ "name": "A" })).unwrap();
        backend.push_partial(&p1(), TaskKind::InfoExtraction, preview.clone());

        assert_eq!(
            backend.fetch_partial(&p1(), TaskKind::InfoExtraction).await.unwrap(),
            Some(preview)
        );
        assert!(backend
            .fetch_partial(&p1(), TaskKind::InfoExtraction)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn held_fetch_waits_for_release() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_result(&p1(), TaskKind::Review, TaskPayload::ReviewItems(vec![]));
        backend.hold_results(&p1(), TaskKind::Review);

        let pending = tokio::spawn({
            let backend = Arc::clone(&backend);
            async move { backend.fetch_result(&p1(), TaskKind::Review).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        backend.release(&p1(), TaskKind::Review);
        assert!(pending.await.unwrap().is_ok());
    }

    #[test]
    fn run_steps_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Script {
            steps: Vec<RunStep>,
        }
        let script: Script = toml::from_str(
            r#"
            steps = [
                { status = "pending" },
                { status = "running", progress = 0.4 },
                { status = "failed", message = "quota" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(
            script.steps,
            vec![
                RunStep::Pending,
                RunStep::Running { progress: 0.4 },
                RunStep::Failed {
                    message: "quota".to_string()
                },
            ]
        );
    }
}
