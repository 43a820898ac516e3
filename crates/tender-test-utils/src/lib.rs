//! Testing utilities for the tender workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tender_core::{
    InMemoryBackend, ProjectId, RunStep, TaskKind, TaskPayload, Workspace, WorkspaceConfig,
};

/// Poll interval used by test workspaces
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn project_a() -> ProjectId {
    ProjectId::new("project-a")
}

pub fn project_b() -> ProjectId {
    ProjectId::new("project-b")
}

pub fn test_config() -> WorkspaceConfig {
    WorkspaceConfig::new().with_poll_interval_ms(TEST_POLL_INTERVAL.as_millis() as u64)
}

pub fn setup_test_workspace(backend: Arc<InMemoryBackend>) -> Workspace {
    Workspace::new(backend, test_config()).unwrap()
}

pub fn running(progress: f64) -> RunStep {
    RunStep::Running { progress }
}

pub fn failed(message: &str) -> RunStep {
    RunStep::Failed {
        message: message.to_string(),
    }
}

/// A small payload of the right shape for `kind`
pub fn sample_payload(kind: TaskKind) -> TaskPayload {
    let body = match kind {
        TaskKind::InfoExtraction => json!({ "project_name": "Harbour bridge", "budget": "1.2M" }),
        TaskKind::RequirementExtraction => {
            json!([{ "id": "R1", "text": "ISO 9001", "risk": "high" }])
        }
        TaskKind::DirectoryGeneration => {
            json!({ "title": "Bid", "children": [{ "title": "1. Technical" }] })
        }
        TaskKind::Review => json!({ "items": [{ "requirement": "R1", "verdict": "pass" }] }),
    };
    TaskPayload::from_json(kind, body).unwrap()
}

/// Advance (paused) time in poll-interval steps until `cond` holds.
/// Panics after `max` of virtual time.
pub async fn wait_until(mut cond: impl FnMut() -> bool, max: Duration) {
    let step = TEST_POLL_INTERVAL / 10;
    let mut waited = Duration::ZERO;
    while !cond() {
        assert!(waited < max, "condition not reached within {max:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}

/// Let spawned tasks run without advancing time
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
