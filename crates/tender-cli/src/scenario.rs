//! Scripted scenarios for `tender simulate`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tender_core::{
    InMemoryBackend, ProjectEntry, ProjectId, RunStep, SubmitRequest, TaskKind, TaskPanel,
    TaskPayload, ViewState, Workspace, WorkspaceConfig,
};

/// A simulated session: backend fixtures plus the user's actions
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Scenario {
    /// Overrides the configured poll interval
    #[serde(default)]
    pub(crate) poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub(crate) runs: Vec<ScriptedRun>,
    #[serde(default)]
    pub(crate) results: Vec<ScriptedResult>,
    #[serde(default)]
    pub(crate) partials: Vec<ScriptedResult>,
    pub(crate) actions: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScriptedRun {
    pub(crate) project: ProjectId,
    pub(crate) kind: TaskKind,
    pub(crate) steps: Vec<RunStep>,
    /// Run already exists when the session starts
    #[serde(default)]
    pub(crate) existing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScriptedResult {
    pub(crate) project: ProjectId,
    pub(crate) kind: TaskKind,
    pub(crate) data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum Action {
    Select { project: ProjectId },
    Resume { project: ProjectId },
    Submit { request: SubmitRequest },
    Cancel { kind: TaskKind },
    Wait { ms: u64 },
    Leave,
}

/// Final state of a simulated session
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) view: ViewState,
    pub(crate) cache: BTreeMap<ProjectId, ProjectEntry>,
    pub(crate) errors: Vec<String>,
}

impl Scenario {
    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read scenario {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub(crate) fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    fn backend(&self) -> Result<InMemoryBackend> {
        let backend = InMemoryBackend::new();
        for run in &self.runs {
            if run.existing {
                backend.seed_run(&run.project, run.kind, run.steps.clone());
            } else {
                backend.script(&run.project, run.kind, run.steps.clone());
            }
        }
        for result in &self.results {
            let payload = TaskPayload::from_json(result.kind, result.data.clone())
                .with_context(|| format!("bad {} result for {}", result.kind, result.project))?;
            backend.set_result(&result.project, result.kind, payload);
        }
        for partial in &self.partials {
            let payload = TaskPayload::from_json(partial.kind, partial.data.clone())
                .with_context(|| format!("bad {} preview for {}", partial.kind, partial.project))?;
            backend.push_partial(&partial.project, partial.kind, payload);
        }
        Ok(backend)
    }

    fn projects(&self) -> BTreeSet<ProjectId> {
        let mut projects: BTreeSet<ProjectId> =
            self.runs.iter().map(|run| run.project.clone()).collect();
        for action in &self.actions {
            if let Action::Select { project } | Action::Resume { project } = action {
                projects.insert(project.clone());
            }
        }
        projects
    }

    /// Play the scenario and collect the final view and cache.
    ///
    /// Command failures are recorded in the report instead of aborting.
    pub(crate) async fn run(&self, mut config: WorkspaceConfig) -> Result<Report> {
        if let Some(interval) = self.poll_interval_ms {
            config = config.with_poll_interval_ms(interval);
        }
        let workspace = Workspace::new(Arc::new(self.backend()?), config)?;
        let mut errors = Vec::new();

        for (step, action) in self.actions.iter().enumerate() {
            tracing::debug!(step, ?action, "scenario action");
            let outcome = match action {
                Action::Select { project } => {
                    workspace.select_project(project.clone()).await.map(|_| ())
                }
                Action::Resume { project } => workspace.resume(project.clone()).await.map(|_| ()),
                Action::Submit { request } => workspace.submit(request.clone()).await.map(|_| ()),
                Action::Cancel { kind } => workspace.cancel(*kind),
                Action::Wait { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    Ok(())
                }
                Action::Leave => {
                    workspace.leave_project();
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(step, "scenario action failed: {}", e);
                errors.push(format!("step {step}: {e}"));
            }
        }

        let cache = self
            .projects()
            .into_iter()
            .map(|project| {
                let entry = workspace.cache().get(&project);
                (project, entry)
            })
            .collect();

        Ok(Report {
            view: workspace.view(),
            cache,
            errors,
        })
    }
}

impl Report {
    pub(crate) fn render_text(&self) -> String {
        let mut out = String::new();
        match &self.view.project {
            Some(project) => {
                out.push_str(&format!(
                    "active project {project} (generation {})\n",
                    self.view.generation
                ));
                for (kind, panel) in &self.view.panels {
                    out.push_str(&render_panel(*kind, panel));
                }
            }
            None => out.push_str("no active project\n"),
        }

        for (project, entry) in &self.cache {
            out.push_str(&format!("\ncache {project}\n"));
            for kind in TaskKind::ALL {
                let panel = TaskPanel {
                    run: entry.run(kind).cloned(),
                    result: entry.result(kind).cloned(),
                    notice: None,
                };
                out.push_str(&render_panel(kind, &panel));
            }
        }

        if !self.errors.is_empty() {
            out.push_str("\nerrors\n");
            for error in &self.errors {
                out.push_str(&format!("  {error}\n"));
            }
        }
        out
    }
}

pub(crate) fn render_panel(kind: TaskKind, panel: &TaskPanel) -> String {
    let status = panel
        .run
        .as_ref()
        .map_or_else(|| "-".to_string(), |run| run.status.to_string());
    let progress = panel
        .run
        .as_ref()
        .and_then(|run| run.progress)
        .map_or_else(String::new, |p| format!("{:>3.0}%", p * 100.0));
    let mut line = format!("  {:<24}{status:<9}{progress:>5}", kind.as_str());
    if let Some(result) = &panel.result {
        line.push_str(&format!("  result: {}", payload_summary(result)));
    }
    if let Some(notice) = &panel.notice {
        line.push_str(&format!("  ! {}", notice.message()));
    }
    line.push('\n');
    line
}

fn payload_summary(payload: &TaskPayload) -> String {
    match payload {
        TaskPayload::ProjectInfo(fields) => format!("{} fields", fields.len()),
        TaskPayload::Requirements(items) => format!("{} requirements", items.len()),
        TaskPayload::DirectoryTree(_) => "directory tree".to_string(),
        TaskPayload::ReviewItems(items) => format!("{} review items", items.len()),
    }
}
