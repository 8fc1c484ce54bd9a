use crate::assets::preflight_fetch_assets;
use crate::extract::extract_zip;
use crate::mainfile::resolve_main_file;
use crate::workspace::WorkspaceGuard;
use chrono::Utc;
use inkproof_artifacts::ArtifactStore;
use inkproof_config::AppConfig;
use inkproof_core::{JobDescriptor, JobRecord};
use inkproof_sandbox::{SandboxError, SandboxRunner};
use inkproof_store::JobStatusStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the full per-job compile algorithm for `descriptor`: stage a
/// workspace, extract the source archive, resolve the main file, best-effort
/// fetch missing assets, invoke the sandbox, classify the result via the
/// PDF-exists override, and record status + logs. Every exit path — success
/// or failure — stores logs and a terminal status before returning; the
/// workspace is always removed via [`WorkspaceGuard`]'s `Drop`.
pub async fn process_job(
    descriptor: JobDescriptor,
    status_store: Arc<dyn JobStatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
    sandbox: Arc<dyn SandboxRunner>,
    config: Arc<AppConfig>,
) {
    let job_id = descriptor.job_id.clone();
    info!(job_id = %job_id, "starting compile job");

    let mut record = match status_store.get_status(&job_id).await {
        Ok(r) => r,
        Err(_) => JobRecord::queued(&descriptor, Utc::now()),
    };
    if let Err(e) = record.mark_running() {
        warn!(job_id = %job_id, error = %e, "could not transition job to running");
    }
    status_store
        .set_status(&job_id, record.clone(), config.status_ttl)
        .await;

    let workspace = match WorkspaceGuard::create(&config.workspace_root, &job_id).await {
        Ok(w) => w,
        Err(e) => {
            finish_failed(
                &status_store,
                &config,
                &job_id,
                &mut record,
                format!("failed to create workspace: {e}"),
                String::new(),
            )
            .await;
            return;
        }
    };

    let source_bytes = match artifacts
        .get(&descriptor.source_bucket, &descriptor.source_object)
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            finish_failed(
                &status_store,
                &config,
                &job_id,
                &mut record,
                format!("failed to fetch source archive: {e}"),
                String::new(),
            )
            .await;
            return;
        }
    };

    let extracted = match extract_zip(source_bytes, workspace.path()).await {
        Ok(paths) => paths,
        Err(e) => {
            finish_failed(
                &status_store,
                &config,
                &job_id,
                &mut record,
                format!("failed to extract source archive: {e}"),
                String::new(),
            )
            .await;
            return;
        }
    };

    let main_file = match resolve_main_file(&descriptor.main_file, &extracted) {
        Ok(p) => p,
        Err(e) => {
            finish_failed(
                &status_store,
                &config,
                &job_id,
                &mut record,
                e.to_string(),
                String::new(),
            )
            .await;
            return;
        }
    };

    let fetched = preflight_fetch_assets(
        artifacts.as_ref(),
        &config.buckets.assets,
        workspace.path(),
        descriptor.user_id.as_deref(),
        descriptor.doc_id.as_deref(),
    )
    .await;
    if fetched > 0 {
        info!(job_id = %job_id, fetched, "pre-flight asset fetch completed");
    }

    let main_file_str = main_file.to_string_lossy().to_string();
    let sandbox_result = sandbox
        .run(
            &config.sandbox_image,
            workspace.path(),
            &main_file_str,
            &config.sandbox_limits,
        )
        .await;

    let (combined_output, exit_code, runner_err) = match &sandbox_result {
        Ok(outcome) => (outcome.combined_output.clone(), outcome.exit_code, None),
        Err(SandboxError::Timeout {
            combined_output,
            timeout,
        }) => (
            combined_output.clone(),
            -1,
            Some(format!("sandbox run timed out after {timeout:?}")),
        ),
        Err(SandboxError::LaunchFailed {
            combined_output,
            detail,
        }) => (combined_output.clone(), -1, Some(detail.clone())),
    };

    let pdf_name = format!(
        "{}.pdf",
        main_file.file_stem().and_then(|s| s.to_str()).unwrap_or("main")
    );
    let pdf_path = workspace.path().join(&pdf_name);

    if tokio::fs::metadata(&pdf_path).await.is_ok() {
        match upload_pdf(artifacts.as_ref(), &config, &job_id, &pdf_path).await {
            Ok(pdf_url) => {
                let now = Utc::now();
                if let Err(e) = record.mark_success(pdf_url, now) {
                    warn!(job_id = %job_id, error = %e, "could not transition job to success");
                }
            }
            Err(e) => {
                record.mark_failed(format!("failed to upload compiled pdf: {e}"), Utc::now());
            }
        }
    } else if exit_code != 0 || runner_err.is_some() {
        let message = match runner_err {
            Some(detail) => format!("compile failed (exit {exit_code}): {detail}"),
            None => format!("compile failed with exit code {exit_code}"),
        };
        record.mark_failed(message, Utc::now());
    } else {
        record.mark_failed("pdf not found after compile".into(), Utc::now());
    }

    if record.status == inkproof_core::JobStatus::Failed {
        error!(job_id = %job_id, message = ?record.error_message, "compile job failed");
    } else {
        info!(job_id = %job_id, "compile job succeeded");
    }

    status_store
        .set_logs(&job_id, combined_output, config.logs_ttl)
        .await;
    status_store
        .set_status(&job_id, record, config.status_ttl)
        .await;
}

async fn upload_pdf(
    artifacts: &dyn ArtifactStore,
    config: &AppConfig,
    job_id: &str,
    pdf_path: &std::path::Path,
) -> Result<String, inkproof_artifacts::ArtifactError> {
    let size = tokio::fs::metadata(pdf_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    let mut file = tokio::fs::File::open(pdf_path)
        .await
        .map_err(inkproof_artifacts::ArtifactError::Io)?;
    let key = format!("{job_id}.pdf");
    artifacts
        .put(&config.buckets.pdfs, &key, &mut file, size, "application/pdf")
        .await?;
    Ok(format!("/api/compile/{job_id}/pdf"))
}

async fn finish_failed(
    status_store: &Arc<dyn JobStatusStore>,
    config: &AppConfig,
    job_id: &str,
    record: &mut JobRecord,
    message: String,
    logs: String,
) {
    record.mark_failed(message, Utc::now());
    error!(job_id = %job_id, message = ?record.error_message, "compile job failed before sandbox run");
    status_store.set_logs(job_id, logs, config.logs_ttl).await;
    status_store
        .set_status(job_id, record.clone(), config.status_ttl)
        .await;
}
