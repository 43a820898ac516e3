//! Project workspace
//!
//! The entry point used by the presentation layer. It owns the project
//! state cache, the poll timers and the published view, and tracks which
//! project is active:
//! - Selecting a project stops the previous project's timers, bumps the
//!   activation generation and resumes the new project's jobs
//! - Every asynchronous continuation carries a [`Ticket`] and only touches
//!   the view while its generation is still current
//! - The cache is written regardless, so no observed state is lost

use crate::backend::TenderBackend;
use crate::cache::ProjectStateCache;
use crate::error::WorkspaceError;
use crate::lifecycle::FailureClassifier;
use crate::poll::{PollManager, TimerKey};
use crate::resume::ResumeSummary;
use crate::types::{ProjectId, RunId, SubmitRequest, TaskKind, WorkspaceConfig};
use crate::view::{self, NoticeUpdate, TaskPanel, Ticket, ViewState};
use dashmap::DashSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// State shared between the workspace handle and its timer tasks
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn TenderBackend>,
    pub(crate) config: WorkspaceConfig,
    pub(crate) cache: ProjectStateCache,
    pub(crate) timers: PollManager,
    pub(crate) classifier: FailureClassifier,
    /// Runs whose result fetch is in flight
    pub(crate) completions: DashSet<RunId>,
    view: watch::Sender<ViewState>,
    generation: AtomicU64,
}

impl Shared {
    /// Check whether a continuation's project is still the active one
    pub(crate) fn is_current(&self, ticket: &Ticket) -> bool {
        self.view.borrow().is_current(ticket)
    }

    /// Project the cached state of `kind` into the view if `ticket` is
    /// current. Returns whether the ticket was current.
    pub(crate) fn project(&self, ticket: &Ticket, kind: TaskKind, notice: NoticeUpdate) -> bool {
        let entry = self.cache.get(&ticket.project);
        let mut current = false;
        self.view.send_if_modified(|state| {
            if !state.is_current(ticket) {
                return false;
            }
            current = true;
            view::project_panel(state, kind, &entry, notice)
        });
        current
    }

    fn activate(&self, project: ProjectId) -> Ticket {
        let previous = self.view.borrow().project.clone();
        if let Some(previous) = previous {
            self.timers.stop(&previous, None);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = self.cache.get(&project);
        self.view
            .send_replace(ViewState::for_project(project.clone(), generation, &entry));
        tracing::info!(project = %project, generation, "project activated");
        Ticket {
            project,
            generation,
        }
    }

    fn deactivate(&self) {
        let previous = self.view.borrow().project.clone();
        if let Some(previous) = previous {
            self.timers.stop(&previous, None);
            tracing::info!(project = %previous, "project deactivated");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.view.send_replace(ViewState::detached(generation));
    }

    fn active_ticket(&self) -> Result<Ticket, WorkspaceError> {
        self.view.borrow().ticket().ok_or(WorkspaceError::NoActiveProject)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .field("timers", &self.timers.len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle to the project workspace engine
///
/// Cloning is cheap; clones share the same state.
#[derive(Debug, Clone)]
pub struct Workspace {
    shared: Arc<Shared>,
}

impl Workspace {
    /// Create a workspace over a backend
    ///
    /// # Errors
    /// `WorkspaceError::Config` if the configuration is invalid.
    pub fn new(
        backend: Arc<dyn TenderBackend>,
        config: WorkspaceConfig,
    ) -> Result<Self, WorkspaceError> {
        config.validate()?;
        let classifier = FailureClassifier::new(config.missing_requirements_regex()?);
        let (view, _) = watch::channel(ViewState::detached(0));

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                config,
                cache: ProjectStateCache::new(),
                timers: PollManager::new(),
                classifier,
                completions: DashSet::new(),
                view,
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Make `project` the active project and resume its jobs.
    ///
    /// The cached state of the project is visible in the view immediately,
    /// before the backend answers.
    ///
    /// # Errors
    /// `WorkspaceError::Resume` if the latest runs cannot be loaded. The
    /// project stays active and shows its cached state.
    pub async fn select_project(
        &self,
        project: impl Into<ProjectId>,
    ) -> Result<ResumeSummary, WorkspaceError> {
        let ticket = self.shared.activate(project.into());
        self.shared.resume(ticket).await
    }

    /// Leave the project detail view: stop every timer of the active project
    /// and clear the view. Fetches already in flight still land in the cache.
    pub fn leave_project(&self) {
        self.shared.deactivate();
    }

    /// Re-attach to the jobs of `project` without submitting anything.
    ///
    /// Timers are only started when `project` is the active project; for any
    /// other project the cache is refreshed and nothing else happens.
    ///
    /// # Errors
    /// `WorkspaceError::Resume` if the latest runs cannot be loaded.
    pub async fn resume(
        &self,
        project: impl Into<ProjectId>,
    ) -> Result<ResumeSummary, WorkspaceError> {
        let project = project.into();
        let ticket = match self.shared.active_ticket() {
            Ok(ticket) if ticket.project == project => ticket,
            _ => Ticket {
                project,
                generation: 0,
            },
        };
        self.shared.resume(ticket).await
    }

    /// Submit a job for the active project and start polling it
    ///
    /// # Errors
    /// - `WorkspaceError::NoActiveProject` if no project is selected
    /// - `WorkspaceError::Submission` if the backend refused the job
    pub async fn submit(&self, request: SubmitRequest) -> Result<RunId, WorkspaceError> {
        let ticket = self.shared.active_ticket()?;
        self.shared.submit(ticket, request).await
    }

    /// Stop polling one task of the active project.
    ///
    /// The backend job keeps running; selecting the project again resumes it.
    ///
    /// # Errors
    /// `WorkspaceError::NoActiveProject` if no project is selected.
    pub fn cancel(&self, kind: TaskKind) -> Result<(), WorkspaceError> {
        let ticket = self.shared.active_ticket()?;
        self.shared.timers.stop(&ticket.project, Some(kind));
        Ok(())
    }

    /// Stop the timer of one pair, or all timers of a project
    pub fn stop(&self, project: &ProjectId, kind: Option<TaskKind>) {
        self.shared.timers.stop(project, kind);
    }

    /// Currently active project
    #[must_use]
    pub fn active_project(&self) -> Option<ProjectId> {
        self.shared.view.borrow().project.clone()
    }

    /// Copy of the current view
    #[must_use]
    pub fn view(&self) -> ViewState {
        self.shared.view.borrow().clone()
    }

    /// Copy of one panel of the current view
    #[must_use]
    pub fn panel(&self, kind: TaskKind) -> TaskPanel {
        self.shared.view.borrow().panel(kind)
    }

    /// Subscribe to view changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.shared.view.subscribe()
    }

    /// Project state cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ProjectStateCache {
        &self.shared.cache
    }

    /// Live timers and the run each one polls
    #[must_use]
    pub fn live_timers(&self) -> BTreeMap<TimerKey, RunId> {
        self.shared.timers.live()
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorkspaceConfig {
        &self.shared.config
    }
}
