//! REST backend over `reqwest`
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /projects/{project}/runs/{kind}` submits a job
//! - `GET /runs/{run_id}` returns a run record
//! - `GET /projects/{project}/runs/latest` returns `{kind: record | null}`
//! - `GET /projects/{project}/results/{kind}` returns the result body
//! - `GET /projects/{project}/results/{kind}/partial` returns a preview (404 = none)

use crate::backend::{LatestRuns, TenderBackend};
use crate::error::BackendError;
use crate::types::{
    BackendConfig, ProjectId, RunId, RunRecord, SubmitRequest, TaskKind, TaskPayload,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Answer of the submit endpoint
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "run_id")]
    id: RunId,
}

/// HTTP implementation of [`TenderBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: Url,
    client: Client,
}

impl HttpBackend {
    /// Build a client for `config`
    ///
    /// # Errors
    /// `BackendError::Network` if the base URL is not an absolute
    /// hierarchical URL or the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|e| {
            BackendError::Network(format!("invalid base URL {:?}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Network(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url, client })
    }

    /// Append path segments to the base URL; each segment is percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn runs_url(&self, project: &ProjectId, kind: TaskKind) -> Url {
        self.endpoint(&["projects", project.as_str(), "runs", kind.as_str()])
    }

    fn run_url(&self, run_id: &RunId) -> Url {
        self.endpoint(&["runs", run_id.as_str()])
    }

    fn latest_url(&self, project: &ProjectId) -> Url {
        self.endpoint(&["projects", project.as_str(), "runs", "latest"])
    }

    fn result_url(&self, project: &ProjectId, kind: TaskKind, partial: bool) -> Url {
        let mut segments = vec!["projects", project.as_str(), "results", kind.as_str()];
        if partial {
            segments.push("partial");
        }
        self.endpoint(&segments)
    }

    /// Send a request and decode a JSON body; `Ok(None)` on 404
    async fn request_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(format!("response read failed: {e}")))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode(format!("malformed JSON response: {e}")))
    }

    async fn require_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: String,
    ) -> Result<T, BackendError> {
        self.request_json(request)
            .await?
            .ok_or(BackendError::NotFound(what))
    }
}

/// Pull the human-readable message out of an error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => ["detail", "message", "error"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map_or_else(|| body.to_string(), str::to_string),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl TenderBackend for HttpBackend {
    async fn submit(
        &self,
        project: &ProjectId,
        request: &SubmitRequest,
    ) -> Result<RunId, BackendError> {
        let url = self.runs_url(project, request.kind());
        let what = url.to_string();
        let response: SubmitResponse = self
            .require_json(self.client.post(url).json(request), what)
            .await?;
        Ok(response.id)
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, BackendError> {
        self.require_json(self.client.get(self.run_url(run_id)), format!("run {run_id}"))
            .await
    }

    async fn get_latest_runs(&self, project: &ProjectId) -> Result<LatestRuns, BackendError> {
        self.require_json(
            self.client.get(self.latest_url(project)),
            format!("project {project}"),
        )
        .await
    }

    async fn fetch_result(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<TaskPayload, BackendError> {
        let body: Value = self
            .require_json(
                self.client.get(self.result_url(project, kind, false)),
                format!("{kind} result of project {project}"),
            )
            .await?;
        TaskPayload::from_json(kind, body)
    }

    async fn fetch_partial(
        &self,
        project: &ProjectId,
        kind: TaskKind,
    ) -> Result<Option<TaskPayload>, BackendError> {
        let body: Option<Value> = self
            .request_json(self.client.get(self.result_url(project, kind, true)))
            .await?;
        match body {
            None | Some(Value::Null) => Ok(None),
            Some(body) => TaskPayload::from_json(kind, body).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: base_url.to_string(),
            timeout_ms: 1000,
        })
        .unwrap()
    }

    #[test]
    fn endpoints_join_cleanly() {
        let http = backend("http://localhost:8000/api/");
        let project = ProjectId::new("p1");

        assert_eq!(
            http.runs_url(&project, TaskKind::DirectoryGeneration).as_str(),
            "http://localhost:8000/api/projects/p1/runs/directory_generation"
        );
        assert_eq!(
            http.run_url(&RunId::new("r9")).as_str(),
            "http://localhost:8000/api/runs/r9"
        );
        assert_eq!(
            http.latest_url(&project).as_str(),
            "http://localhost:8000/api/projects/p1/runs/latest"
        );
        assert_eq!(
            http.result_url(&project, TaskKind::InfoExtraction, true).as_str(),
            "http://localhost:8000/api/projects/p1/results/info_extraction/partial"
        );
        assert_eq!(
            backend("http://localhost:8000").run_url(&RunId::new("r9")).as_str(),
            "http://localhost:8000/runs/r9"
        );
    }

    #[test]
    fn opaque_ids_stay_inside_their_segment() {
        let http = backend("http://localhost:8000/api");

        assert_eq!(
            http.latest_url(&ProjectId::new("north/lot 4?draft#2")).as_str(),
            "http://localhost:8000/api/projects/north%2Flot%204%3Fdraft%232/runs/latest"
        );
        assert_eq!(
            http.run_url(&RunId::new("../admin")).as_str(),
            "http://localhost:8000/api/runs/..%2Fadmin"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        for base_url in ["not a url", "mailto:ops@example.com"] {
            let result = HttpBackend::new(&BackendConfig {
                base_url: base_url.to_string(),
                timeout_ms: 1000,
            });
            assert!(matches!(result, Err(BackendError::Network(_))), "{base_url}");
        }
    }

    #[test]
    fn submit_response_accepts_both_id_fields() {
        let a: SubmitResponse = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        let b: SubmitResponse =
            serde_json::from_str(r#"{"run_id":"r2","status":"pending"}"#).unwrap();
        assert_eq!(a.id, RunId::new("r1"));
        assert_eq!(b.id, RunId::new("r2"));
    }

    #[test]
    fn latest_runs_decode_with_nulls() {
        let runs: LatestRuns = serde_json::from_str(
            r#"{
                "review": null,
                "requirement_extraction": {
                    "id": "q1",
                    "project_id": "p1",
                    "kind": "requirement_extraction",
                    "status": "success",
                    "result_ref": "req-1"
                }
            }"#,
        )
        .unwrap();

        assert!(runs[&TaskKind::Review].is_none());
        assert_eq!(
            runs[&TaskKind::RequirementExtraction].as_ref().map(|r| r.is_terminal()),
            Some(true)
        );
    }

    #[test]
    fn error_message_prefers_detail_field() {
        assert_eq!(
            error_message(r#"{"detail":"bidder not found"}"#),
            "bidder not found"
        );
        assert_eq!(error_message("  gateway timeout \n"), "gateway timeout");
        assert_eq!(error_message(r#"{"code":7}"#), r#"{"code":7}"#);
    }

    #[test]
    fn submit_body_is_tagged_by_kind() {
        let body = serde_json::to_value(SubmitRequest::Review {
            bidder: "ACME".to_string(),
            rule_pack_ids: vec!["rp-1".to_string()],
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "kind": "review", "bidder": "ACME", "rule_pack_ids": ["rp-1"] })
        );
    }
}
