//! Core types for the tender workspace
//!
//! Defines the fundamental types shared by every component:
//! - Project and run identifiers
//! - Task kinds and run status
//! - Run records as reported by the backend
//! - Submission requests and result payloads
//! - Workspace configuration

use crate::error::{BackendError, WorkspaceError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::str::FromStr;

/// Project identifier (opaque, assigned by the document backend)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// Create project ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job handle assigned by the backend at submission time
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Create run ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, sortable run ID (used by simulated backends)
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four independent background job categories of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Extract basic project information from the tender document
    InfoExtraction,
    /// Extract requirements and risk items
    RequirementExtraction,
    /// Generate the bid document directory
    DirectoryGeneration,
    /// Review a bid against the extracted requirements
    Review,
}

impl TaskKind {
    /// Every task kind, in display order
    pub const ALL: [TaskKind; 4] = [
        TaskKind::InfoExtraction,
        TaskKind::RequirementExtraction,
        TaskKind::DirectoryGeneration,
        TaskKind::Review,
    ];

    /// Wire name of the kind
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::InfoExtraction => "info_extraction",
            TaskKind::RequirementExtraction => "requirement_extraction",
            TaskKind::DirectoryGeneration => "directory_generation",
            TaskKind::Review => "review",
        }
    }

    /// Whether a running job of this kind exposes a partial result preview
    #[inline]
    #[must_use]
    pub fn supports_preview(&self) -> bool {
        matches!(self, TaskKind::InfoExtraction)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind: {s}"))
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a backend job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted, not yet picked up
    Pending,
    /// Being processed
    Running,
    /// Finished, result available
    Success,
    /// Finished with an error
    Failed,
}

impl RunStatus {
    /// Terminal states never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status snapshot of one backend job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Job handle
    pub id: RunId,
    /// Owning project
    pub project_id: ProjectId,
    /// Task kind
    pub kind: TaskKind,
    /// Current status
    pub status: RunStatus,
    /// Advisory completion fraction (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Human-readable status or error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pointer to the output payload, only set on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
}

impl RunRecord {
    /// Optimistic record for a just-submitted job
    #[inline]
    #[must_use]
    pub fn pending(id: RunId, project_id: ProjectId, kind: TaskKind) -> Self {
        Self {
            id,
            project_id,
            kind,
            status: RunStatus::Pending,
            progress: None,
            message: None,
            result_ref: None,
        }
    }

    /// Running record with progress
    #[inline]
    #[must_use]
    pub fn running(mut self, progress: f64) -> Self {
        self.status = RunStatus::Running;
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    /// Successful record pointing at its result
    #[inline]
    #[must_use]
    pub fn succeeded(mut self, result_ref: impl Into<String>) -> Self {
        self.status = RunStatus::Success;
        self.progress = Some(1.0);
        self.result_ref = Some(result_ref.into());
        self
    }

    /// Failed record carrying the backend message
    #[inline]
    #[must_use]
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.message = Some(message.into());
        self.result_ref = None;
        self
    }

    /// With status message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Check whether the record reached a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Directory generation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryMode {
    /// Full directory with section content hints
    #[default]
    Full,
    /// Headings only
    Outline,
}

/// A job submission, one variant per task kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitRequest {
    /// Start project information extraction
    InfoExtraction,
    /// Start requirement and risk extraction
    RequirementExtraction,
    /// Start directory generation
    DirectoryGeneration {
        /// Generation mode
        #[serde(default)]
        mode: DirectoryMode,
    },
    /// Start a bid review
    Review {
        /// Bidder whose documents are reviewed
        bidder: String,
        /// Rule packs to apply
        #[serde(default)]
        rule_pack_ids: Vec<String>,
    },
}

impl SubmitRequest {
    /// Task kind started by this request
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            SubmitRequest::InfoExtraction => TaskKind::InfoExtraction,
            SubmitRequest::RequirementExtraction => TaskKind::RequirementExtraction,
            SubmitRequest::DirectoryGeneration { .. } => TaskKind::DirectoryGeneration,
            SubmitRequest::Review { .. } => TaskKind::Review,
        }
    }
}

/// Output of a successful job, one slot per task kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Extracted project information fields
    ProjectInfo(Map<String, Value>),
    /// Requirement and risk items
    Requirements(Vec<Value>),
    /// Generated directory tree
    DirectoryTree(Value),
    /// Review findings
    ReviewItems(Vec<Value>),
}

impl TaskPayload {
    /// Build the payload for `kind` from a raw backend JSON body
    ///
    /// List payloads are accepted either bare or wrapped in an `items` field.
    ///
    /// # Errors
    /// `BackendError::Decode` if the body does not have the shape the kind expects.
    pub fn from_json(kind: TaskKind, value: Value) -> Result<Self, BackendError> {
        match kind {
            TaskKind::InfoExtraction => match value {
                Value::Object(map) => Ok(TaskPayload::ProjectInfo(map)),
                other => Err(BackendError::Decode(format!(
                    "project info must be an object, got {other}"
                ))),
            },
            TaskKind::RequirementExtraction => list_body(value).map(TaskPayload::Requirements),
            TaskKind::DirectoryGeneration => Ok(TaskPayload::DirectoryTree(value)),
            TaskKind::Review => list_body(value).map(TaskPayload::ReviewItems),
        }
    }

    /// Task kind whose result slot this payload fills
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::ProjectInfo(_) => TaskKind::InfoExtraction,
            TaskPayload::Requirements(_) => TaskKind::RequirementExtraction,
            TaskPayload::DirectoryTree(_) => TaskKind::DirectoryGeneration,
            TaskPayload::ReviewItems(_) => TaskKind::Review,
        }
    }

    /// Merge an incremental preview into this payload.
    ///
    /// Project info merges field by field with the preview winning; every
    /// other kind is replaced wholesale.
    pub fn merge_partial(&mut self, partial: TaskPayload) {
        match (self, partial) {
            (TaskPayload::ProjectInfo(current), TaskPayload::ProjectInfo(fields)) => {
                current.extend(fields);
            }
            (slot, other) => *slot = other,
        }
    }
}

fn list_body(value: Value) -> Result<Vec<Value>, BackendError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(BackendError::Decode(
                "expected a list or an object with an `items` list".to_string(),
            )),
        },
        other => Err(BackendError::Decode(format!("expected a list, got {other}"))),
    }
}

/// Default pattern for the backend's "review without requirements" rejection
pub const DEFAULT_MISSING_REQUIREMENTS_PATTERN: &str = concat!(
    r"(?i)requirements?\s+(have\s+not\s+been|has\s+not\s+been|not\s+(yet\s+)?)\s*(extracted|found|available)",
    r"|missing\s+requirements?",
    r"|no\s+requirements?\s+(found|available|extracted)",
    r"|extract\s+requirements?\s+first",
    r"|请先.*(提取|抽取).*要求",
    r"|招标要求.*(不存在|未提取|为空)",
);

/// HTTP backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the tender API
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Interval between two status checks of one job
    pub poll_interval_ms: u64,
    /// Merge partial results of running jobs that support previews
    pub preview_partial_results: bool,
    /// Skip a tick while the previous check of the same job is outstanding
    pub skip_tick_while_in_flight: bool,
    /// Pattern recognising a review rejected for missing requirements
    pub missing_requirements_pattern: String,
    /// HTTP backend settings
    pub backend: BackendConfig,
}

impl WorkspaceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// With partial preview merging switched on or off
    #[inline]
    #[must_use]
    pub fn with_partial_preview(mut self, enabled: bool) -> Self {
        self.preview_partial_results = enabled;
        self
    }

    /// With in-flight tick skipping switched on or off
    #[inline]
    #[must_use]
    pub fn with_skip_in_flight(mut self, enabled: bool) -> Self {
        self.skip_tick_while_in_flight = enabled;
        self
    }

    /// Poll interval as a duration
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Compile the missing-requirements pattern
    ///
    /// # Errors
    /// `WorkspaceError::Config` if the pattern is not a valid regex.
    pub fn missing_requirements_regex(&self) -> Result<Regex, WorkspaceError> {
        Regex::new(&self.missing_requirements_pattern).map_err(|e| {
            WorkspaceError::Config(format!("invalid missing_requirements_pattern: {e}"))
        })
    }

    /// Check the configuration for values the engine cannot run with
    ///
    /// # Errors
    /// `WorkspaceError::Config` describing the first offending field.
    pub fn validate(&self) -> Result<(), WorkspaceError> {
        if self.poll_interval_ms == 0 {
            return Err(WorkspaceError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(WorkspaceError::Config(
                "backend.base_url must not be empty".to_string(),
            ));
        }
        self.missing_requirements_regex().map(|_| ())
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `WorkspaceError::Config` on syntax errors or invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self, WorkspaceError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| WorkspaceError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `WorkspaceError::Config` if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            WorkspaceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            preview_partial_results: true,
            skip_tick_while_in_flight: false,
            missing_requirements_pattern: DEFAULT_MISSING_REQUIREMENTS_PATTERN.to_string(),
            backend: BackendConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_kind_round_trips_through_wire_name() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("translation".parse::<TaskKind>().is_err());
    }

    #[test]
    fn only_info_extraction_previews() {
        assert!(TaskKind::InfoExtraction.supports_preview());
        assert!(!TaskKind::RequirementExtraction.supports_preview());
        assert!(!TaskKind::DirectoryGeneration.supports_preview());
        assert!(!TaskKind::Review.supports_preview());
    }

    #[test]
    fn run_record_builders() {
        let record = RunRecord::pending("r1".into(), "p1".into(), TaskKind::Review);
        assert_eq!(record.status, RunStatus::Pending);
        assert!(!record.is_terminal());

        let done = record.clone().running(0.4).succeeded("ref-1");
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.result_ref.as_deref(), Some("ref-1"));
        assert!(done.is_terminal());

        let failed = record.failed("boom");
        assert_eq!(failed.message.as_deref(), Some("boom"));
        assert!(failed.result_ref.is_none());
    }

    #[test]
    fn run_record_deserializes_backend_shape() {
        let record: RunRecord = serde_json::from_value(json!({
            "id": "run-7",
            "project_id": "p9",
            "kind": "directory_generation",
            "status": "running",
            "progress": 0.25
        }))
        .unwrap();

        assert_eq!(record.kind, TaskKind::DirectoryGeneration);
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.progress, Some(0.25));
        assert!(record.message.is_none());
    }

    #[test]
    fn submit_request_kind() {
        let review = SubmitRequest::Review {
            bidder: "ACME".to_string(),
            rule_pack_ids: vec!["rp-1".to_string()],
        };
        assert_eq!(review.kind(), TaskKind::Review);
        assert_eq!(
            SubmitRequest::DirectoryGeneration {
                mode: DirectoryMode::Outline
            }
            .kind(),
            TaskKind::DirectoryGeneration
        );
    }

    #[test]
    fn payload_from_json_accepts_wrapped_lists() {
        let payload =
            TaskPayload::from_json(TaskKind::Review, json!({ "items": [{ "id": 1 }] })).unwrap();
        assert_eq!(payload, TaskPayload::ReviewItems(vec![json!({ "id": 1 })]));

        assert!(TaskPayload::from_json(TaskKind::InfoExtraction, json!([1, 2])).is_err());
        assert!(TaskPayload::from_json(TaskKind::RequirementExtraction, json!("x")).is_err());
    }

    #[test]
    fn project_info_preview_merges_fields() {
        let mut info = TaskPayload::from_json(
            TaskKind::InfoExtraction,
            json!({ "name": "Bridge", "budget": null }),
        )
        .unwrap();
        let partial =
            TaskPayload::from_json(TaskKind::InfoExtraction, json!({ "budget": "1.2M" })).unwrap();

        info.merge_partial(partial);

        assert_eq!(
            info,
            TaskPayload::ProjectInfo(
                json!({ "name": "Bridge", "budget": "1.2M" })
                    .as_object()
                    .cloned()
                    .unwrap()
            )
        );
    }

    #[test]
    fn default_config_is_valid() {
        let config = WorkspaceConfig::default();
        assert_eq!(config.poll_interval_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_interval_and_bad_pattern() {
        assert!(WorkspaceConfig::new()
            .with_poll_interval_ms(0)
            .validate()
            .is_err());

        let mut config = WorkspaceConfig::new();
        config.missing_requirements_pattern = "(unclosed".to_string();
        assert!(matches!(config.validate(), Err(WorkspaceError::Config(_))));
    }

    #[test]
    fn config_from_toml_keeps_defaults_for_missing_fields() {
        let config = WorkspaceConfig::from_toml_str(
            r#"
            poll_interval_ms = 500

            [backend]
            base_url = "https://tender.example.com/api"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_ms, 500);
        assert!(config.preview_partial_results);
        assert_eq!(config.backend.base_url, "https://tender.example.com/api");
        assert_eq!(config.backend.timeout_ms, 30_000);
    }

    #[test]
    fn config_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "skip_tick_while_in_flight = true").unwrap();
        let config = WorkspaceConfig::from_file(file.path()).unwrap();
        assert!(config.skip_tick_while_in_flight);

        let missing = WorkspaceConfig::from_file("/nonexistent/tender.toml");
        assert!(matches!(missing, Err(WorkspaceError::Config(_))));
    }

    #[test]
    fn default_pattern_matches_backend_wording() {
        let re = WorkspaceConfig::default().missing_requirements_regex().unwrap();
        assert!(re.is_match("Requirements have not been extracted for this project"));
        assert!(re.is_match("missing requirements"));
        assert!(re.is_match("请先提取招标要求"));
        assert!(!re.is_match("model provider timed out"));
    }
}
