// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-intake
//!
//! The HTTP surface of the compile-job service: accepts submissions (either
//! a pointer to a pre-uploaded source archive, or an inline set of files
//! that this crate zips and uploads itself), writes the initial status
//! record, enqueues a descriptor for the worker, and serves status/log/PDF
//! reads back out. Job-level failures are never surfaced here as HTTP
//! errors — only invalid submissions and infrastructure failures are;
//! everything else becomes a `failed` status record the submitter polls for.

use axum::{
    Json, Router,
    extract::{Path as AxPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use inkproof_artifacts::ArtifactStore;
use inkproof_config::AppConfig;
use inkproof_core::{JobDescriptor, JobRecord};
use inkproof_queue::JobQueue;
use inkproof_store::JobStatusStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Job queue the worker pops from.
    pub queue: Arc<dyn JobQueue>,
    /// Job status/log store.
    pub status_store: Arc<dyn JobStatusStore>,
    /// Artifact store backing source archives, PDFs, and assets.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Runtime configuration (bucket names, TTLs).
    pub config: Arc<AppConfig>,
}

/// Structured API error, rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Build the Axum router serving every compile-intake route. Callers (the
/// daemon binary) are responsible for nesting this under any auth/CORS
/// middleware and merging it with the websocket router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/compile", post(submit_compile))
        .route("/api/compile-inline", post(submit_compile_inline))
        .route("/api/compile/{id}", get(get_status))
        .route("/api/compile/{id}/pdf", get(get_pdf))
        .route("/api/{id}/logs", get(get_logs))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /api/compile
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitCompileRequest {
    source_bucket: String,
    source_object: String,
    #[serde(default)]
    main_file: String,
    #[serde(default)]
    doc_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitCompileResponse {
    job_id: String,
    status: &'static str,
}

async fn submit_compile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitCompileRequest>,
) -> Result<(StatusCode, Json<SubmitCompileResponse>), ApiError> {
    if req.source_bucket.is_empty() || req.source_object.is_empty() {
        return Err(ApiError::bad_request(
            "source_bucket and source_object are required",
        ));
    }

    let descriptor = JobDescriptor {
        job_id: Uuid::new_v4().to_string(),
        user_id: user_id_from_headers(&headers),
        source_bucket: req.source_bucket,
        source_object: req.source_object,
        main_file: req.main_file,
        doc_id: req.doc_id,
    };

    enqueue(&state, descriptor.clone()).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitCompileResponse {
            job_id: descriptor.job_id,
            status: "queued",
        }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/compile-inline
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InlineFile {
    name: String,
    /// Raw file content, written into the archive as-is.
    content: String,
}

#[derive(Debug, Deserialize)]
struct SubmitCompileInlineRequest {
    files: Vec<InlineFile>,
    #[serde(default)]
    main_file: String,
    #[serde(default)]
    doc_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitCompileInlineResponse {
    job_id: String,
    status: &'static str,
    source_bucket: String,
    source_object: String,
}

async fn submit_compile_inline(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitCompileInlineRequest>,
) -> Result<(StatusCode, Json<SubmitCompileInlineResponse>), ApiError> {
    if req.files.is_empty() {
        return Err(ApiError::bad_request("files must not be empty"));
    }
    for file in &req.files {
        if file.name.is_empty() {
            return Err(ApiError::bad_request("every file must have a name"));
        }
    }

    let job_id = Uuid::new_v4().to_string();
    let zip_bytes = build_source_zip(&req.files)
        .map_err(|e| ApiError::bad_request(format!("failed to build source archive: {e}")))?;

    let source_bucket = state.config.buckets.sources.clone();
    let source_object = format!("inline/{job_id}.zip");

    state
        .artifacts
        .ensure_bucket(&source_bucket)
        .await
        .map_err(|e| ApiError::internal(format!("failed to prepare source bucket: {e}")))?;
    let mut reader = Cursor::new(zip_bytes.clone());
    state
        .artifacts
        .put(
            &source_bucket,
            &source_object,
            &mut reader,
            zip_bytes.len() as u64,
            "application/zip",
        )
        .await
        .map_err(|e| ApiError::internal(format!("failed to upload source archive: {e}")))?;

    let descriptor = JobDescriptor {
        job_id: job_id.clone(),
        user_id: user_id_from_headers(&headers),
        source_bucket: source_bucket.clone(),
        source_object: source_object.clone(),
        main_file: req.main_file,
        doc_id: req.doc_id,
    };
    enqueue(&state, descriptor).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitCompileInlineResponse {
            job_id,
            status: "queued",
            source_bucket,
            source_object,
        }),
    ))
}

fn build_source_zip(files: &[InlineFile]) -> Result<Vec<u8>, String> {
    use zip::write::{SimpleFileOptions, ZipWriter};

    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut buf);
        for file in files {
            writer
                .start_file(&file.name, SimpleFileOptions::default())
                .map_err(|e| e.to_string())?;
            std::io::Write::write_all(&mut writer, file.content.as_bytes()).map_err(|e| e.to_string())?;
        }
        writer.finish().map_err(|e| e.to_string())?;
    }
    Ok(buf.into_inner())
}

async fn enqueue(state: &AppState, descriptor: JobDescriptor) -> Result<(), ApiError> {
    let job_id = descriptor.job_id.clone();
    let record = JobRecord::queued(&descriptor, Utc::now());
    state
        .status_store
        .set_status(&job_id, record, state.config.status_ttl)
        .await;

    if let Err(e) = state.queue.push(descriptor).await {
        error!(job_id = %job_id, error = %e, "failed to enqueue compile job");
        return Err(ApiError::internal(format!("failed to enqueue job: {e}")));
    }
    info!(job_id = %job_id, "compile job submitted");
    Ok(())
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// GET /api/compile/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    job_id: String,
    status: inkproof_core::JobStatus,
    created_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<String>,
}

impl JobStatusResponse {
    fn from_record(r: JobRecord, logs: Option<String>) -> Self {
        Self {
            job_id: r.job_id,
            status: r.status,
            created_at: r.created_at,
            finished_at: r.finished_at,
            error: r.error_message,
            pdf_url: r.pdf_url,
            logs,
        }
    }
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let record = state
        .status_store
        .get_status(&id)
        .await
        .map_err(|_| ApiError::not_found(format!("job {id} not found")))?;
    let logs = state.status_store.get_logs(&id).await.ok();
    Ok(Json(JobStatusResponse::from_record(record, logs)))
}

// ---------------------------------------------------------------------------
// GET /api/compile/{id}/pdf
// ---------------------------------------------------------------------------

async fn get_pdf(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Response, ApiError> {
    let key = format!("{id}.pdf");
    let bytes = state
        .artifacts
        .get(&state.config.buckets.pdfs, &key)
        .await
        .map_err(|_| ApiError::not_found(format!("pdf for job {id} not found")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.pdf\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /api/{id}/logs
// ---------------------------------------------------------------------------

async fn get_logs(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Response, ApiError> {
    let logs = state
        .status_store
        .get_logs(&id)
        .await
        .map_err(|_| ApiError::not_found(format!("logs for job {id} not found")))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], logs).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use inkproof_artifacts::FsArtifactStore;
    use inkproof_queue::InMemoryJobQueue;
    use inkproof_store::TtlStore;
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState {
            queue: Arc::new(InMemoryJobQueue::default()),
            status_store: Arc::new(TtlStore::new()),
            artifacts: Arc::new(FsArtifactStore::new(
                root.join("artifacts"),
                "http://localhost:8089/download",
            )),
            config: Arc::new(AppConfig {
                workspace_root: root.join("workspaces"),
                ..AppConfig::default()
            }),
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_compile_rejects_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compile")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"source_bucket":"","source_object":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_compile_enqueues_and_records_queued_status() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compile")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(
                        r#"{"source_bucket":"compile-sources","source_object":"manual/a.zip"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert_eq!(body["status"], "queued");

        let record = state.status_store.get_status(&job_id).await.unwrap();
        assert_eq!(record.status, inkproof_core::JobStatus::Queued);
        assert_eq!(record.user_id.as_deref(), Some("user-1"));

        let popped = state.queue.blocking_pop(std::time::Duration::from_millis(10)).await;
        assert_eq!(popped.unwrap().job_id, job_id);
    }

    #[tokio::test]
    async fn submit_compile_inline_rejects_empty_files() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compile-inline")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"files":[],"main_file":"main.tex"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_compile_inline_rejects_blank_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compile-inline")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"files":[{"name":"","content":"hello"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_compile_inline_uploads_zip_and_enqueues() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());
        let body = serde_json::json!({
            "files": [{"name": "main.tex", "content": "\\documentclass{article}\\begin{document}Hi\\end{document}"}],
            "main_file": "main.tex",
        });

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compile-inline")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        let source_object = body["source_object"].as_str().unwrap();

        let bytes = state
            .artifacts
            .get(&state.config.buckets.sources, source_object)
            .await
            .unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut main_tex = archive.by_name("main.tex").unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut main_tex, &mut contents).unwrap();
        assert_eq!(
            contents,
            "\\documentclass{article}\\begin{document}Hi\\end{document}"
        );
    }

    #[tokio::test]
    async fn get_status_returns_404_for_unknown_job() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_status_reflects_stored_record() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        let descriptor = JobDescriptor {
            job_id: "job-xyz".into(),
            user_id: None,
            source_bucket: "compile-sources".into(),
            source_object: "manual/a.zip".into(),
            main_file: "main.tex".into(),
            doc_id: None,
        };
        let record = JobRecord::queued(&descriptor, Utc::now());
        state
            .status_store
            .set_status("job-xyz", record, state.config.status_ttl)
            .await;

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/job-xyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["job_id"], "job-xyz");
        assert_eq!(body["status"], "queued");
    }

    #[tokio::test]
    async fn get_status_includes_logs_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        let descriptor = JobDescriptor {
            job_id: "job-logs".into(),
            user_id: None,
            source_bucket: "compile-sources".into(),
            source_object: "manual/a.zip".into(),
            main_file: "main.tex".into(),
            doc_id: None,
        };
        let record = JobRecord::queued(&descriptor, Utc::now());
        state
            .status_store
            .set_status("job-logs", record, state.config.status_ttl)
            .await;
        state
            .status_store
            .set_logs("job-logs", "tectonic: warning: ...".into(), state.config.logs_ttl)
            .await;

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/job-logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["logs"], "tectonic: warning: ...");
    }

    #[tokio::test]
    async fn get_status_omits_logs_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        let descriptor = JobDescriptor {
            job_id: "job-nologs".into(),
            user_id: None,
            source_bucket: "compile-sources".into(),
            source_object: "manual/a.zip".into(),
            main_file: "main.tex".into(),
            doc_id: None,
        };
        let record = JobRecord::queued(&descriptor, Utc::now());
        state
            .status_store
            .set_status("job-nologs", record, state.config.status_ttl)
            .await;

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/job-nologs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert!(body.get("logs").is_none());
    }

    #[tokio::test]
    async fn get_pdf_returns_404_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/job-1/pdf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_pdf_streams_bytes_with_attachment_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        state
            .artifacts
            .ensure_bucket(&state.config.buckets.pdfs)
            .await
            .unwrap();
        let mut reader = Cursor::new(b"%PDF-1.5 fake".to_vec());
        state
            .artifacts
            .put(
                &state.config.buckets.pdfs,
                "job-1.pdf",
                &mut reader,
                13,
                "application/pdf",
            )
            .await
            .unwrap();

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/compile/job-1/pdf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"job-1.pdf\""
        );
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"%PDF-1.5 fake");
    }

    #[tokio::test]
    async fn get_logs_returns_404_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let router = build_router(test_state(tmp.path()));

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/job-1/logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_logs_returns_stored_text() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let router = build_router(state.clone());

        state
            .status_store
            .set_logs("job-2", "compiling...\ndone\n".into(), state.config.logs_ttl)
            .await;

        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/job-2/logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"compiling...\ndone\n");
    }
}
