//! UI-facing projection of the active project
//!
//! The view only ever mirrors the cache entry of the active project plus
//! panel-scoped notices. It is published through a `tokio::sync::watch`
//! channel so the presentation layer can redraw on change.

use crate::cache::ProjectEntry;
use crate::types::{ProjectId, RunRecord, TaskKind, TaskPayload};
use serde::Serialize;
use std::collections::BTreeMap;

/// Identity of an asynchronous continuation: the project it was issued for
/// and the activation generation current at that moment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Project the continuation belongs to
    pub project: ProjectId,
    /// Activation generation at issue time
    pub generation: u64,
}

/// User-visible message attached to a task panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum TaskNotice {
    /// The submit call failed; no job was created
    SubmitFailed(String),
    /// The job reached `failed`
    JobFailed(String),
    /// A review was rejected because requirements were never extracted
    MissingRequirements,
    /// The job succeeded but its output could not be loaded
    ResultFetchFailed(String),
}

impl TaskNotice {
    /// Text shown in the task panel
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            TaskNotice::SubmitFailed(detail) => format!("Could not start the task: {detail}"),
            TaskNotice::JobFailed(detail) => format!("Task failed: {detail}"),
            TaskNotice::MissingRequirements => "Requirement extraction has not completed for \
                 this project. Run requirement extraction first, then start the review again."
                .to_string(),
            TaskNotice::ResultFetchFailed(detail) => {
                format!(
                    "The task finished but its result could not be loaded: {detail}. \
                     Run the task again to retry."
                )
            }
        }
    }
}

/// Everything one task panel displays
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPanel {
    /// Current run record
    pub run: Option<RunRecord>,
    /// Fetched result payload
    pub result: Option<TaskPayload>,
    /// Inline notice
    pub notice: Option<TaskNotice>,
}

/// Projection of the active project
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewState {
    /// Active project, if any
    pub project: Option<ProjectId>,
    /// Activation generation; bumped on every project switch
    pub generation: u64,
    /// One panel per task kind
    pub panels: BTreeMap<TaskKind, TaskPanel>,
}

impl ViewState {
    /// View with no active project
    #[must_use]
    pub fn detached(generation: u64) -> Self {
        Self {
            project: None,
            generation,
            panels: empty_panels(),
        }
    }

    /// View of a freshly activated project, projected from its cache entry
    #[must_use]
    pub fn for_project(project: ProjectId, generation: u64, entry: &ProjectEntry) -> Self {
        let panels = TaskKind::ALL
            .into_iter()
            .map(|kind| {
                let panel = TaskPanel {
                    run: entry.run(kind).cloned(),
                    result: entry.result(kind).cloned(),
                    notice: None,
                };
                (kind, panel)
            })
            .collect();
        Self {
            project: Some(project),
            generation,
            panels,
        }
    }

    /// Check whether a continuation still belongs to this view
    #[inline]
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.generation == ticket.generation && self.project.as_ref() == Some(&ticket.project)
    }

    /// Ticket for continuations issued now, if a project is active
    #[must_use]
    pub fn ticket(&self) -> Option<Ticket> {
        self.project.clone().map(|project| Ticket {
            project,
            generation: self.generation,
        })
    }

    /// Copy of one panel
    #[must_use]
    pub fn panel(&self, kind: TaskKind) -> TaskPanel {
        self.panels.get(&kind).cloned().unwrap_or_default()
    }
}

fn empty_panels() -> BTreeMap<TaskKind, TaskPanel> {
    TaskKind::ALL
        .into_iter()
        .map(|kind| (kind, TaskPanel::default()))
        .collect()
}

/// How a projection treats the panel notice
#[derive(Debug, Clone)]
pub(crate) enum NoticeUpdate {
    Keep,
    Clear,
    Raise(TaskNotice),
}

/// Copy the cached state of `kind` into the panel, leaving other panels alone.
/// Returns whether anything changed.
pub(crate) fn project_panel(
    view: &mut ViewState,
    kind: TaskKind,
    entry: &ProjectEntry,
    notice: NoticeUpdate,
) -> bool {
    let panel = view.panels.entry(kind).or_default();
    let next = TaskPanel {
        run: entry.run(kind).cloned(),
        result: entry.result(kind).cloned(),
        notice: match notice {
            NoticeUpdate::Keep => panel.notice.clone(),
            NoticeUpdate::Clear => None,
            NoticeUpdate::Raise(notice) => Some(notice),
        },
    };
    if *panel == next {
        return false;
    }
    *panel = next;
    true
}
