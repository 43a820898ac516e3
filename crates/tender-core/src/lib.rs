//! Tender Core - background task orchestration for tender/bid projects
//!
//! Keeps a user's view of long-running backend jobs consistent while they
//! navigate between projects:
//! - Submits jobs and polls them on a fixed interval, one timer per task
//! - Caches the last observed state of every project for the whole session
//! - Resumes in-progress jobs when a project is opened again
//! - Discards results that arrive for a project that is no longer shown
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tender_core::{HttpBackend, SubmitRequest, Workspace, WorkspaceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkspaceConfig::from_file("tender.toml")?;
//! let backend = Arc::new(HttpBackend::new(&config.backend)?);
//! let workspace = Workspace::new(backend, config)?;
//!
//! workspace.select_project("p-42").await?;
//! workspace.submit(SubmitRequest::RequirementExtraction).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod backend;
pub mod cache;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod memory;
pub mod poll;
pub mod resume;
pub mod types;
pub mod view;
pub mod workspace;

// Re-exports for convenience
pub use backend::{complete_latest_runs, LatestRuns, TenderBackend};
pub use cache::{CacheStats, CacheWrite, ProjectEntry, ProjectStateCache};
pub use error::{BackendError, LifecycleError, WorkspaceError};
pub use http::HttpBackend;
pub use lifecycle::{allowed_transitions, validate_transition, FailureClassifier};
pub use memory::{default_script, InMemoryBackend, RunStep, REQUIREMENTS_NOT_EXTRACTED};
pub use poll::{PollManager, TimerKey};
pub use resume::ResumeSummary;
pub use types::{
    BackendConfig, DirectoryMode, ProjectId, RunId, RunRecord, RunStatus, SubmitRequest,
    TaskKind, TaskPayload, WorkspaceConfig, DEFAULT_MISSING_REQUIREMENTS_PATTERN,
};
pub use view::{TaskNotice, TaskPanel, Ticket, ViewState};
pub use workspace::Workspace;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a workspace
    pub use crate::{
        ProjectId, RunId, RunRecord, RunStatus, SubmitRequest, TaskKind, TaskNotice,
        TaskPayload, TenderBackend, ViewState, Workspace, WorkspaceConfig, WorkspaceError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
