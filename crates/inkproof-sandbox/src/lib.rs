// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! inkproof-sandbox
//!
//! The sandbox runner: executes a fixed command line inside a network-less,
//! read-only, resource-limited container, falling back to a host-local
//! invocation of an equivalent tool if the container cannot be launched at
//! all. A non-zero exit code from a completed run is not itself an error —
//! the worker re-examines the workspace for a produced PDF (the PDF-exists
//! override) rather than trusting the tool's own exit status.

use async_trait::async_trait;
use inkproof_config::SandboxLimits;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::warn;

const TECTONIC_CACHE_VOLUME: &str = "inkproof-tectonic-cache";

/// Errors that prevent a sandbox run from producing a usable result.
///
/// A non-zero tool exit code is *not* one of these — it surfaces as
/// [`SandboxOutcome::exit_code`] instead, per the PDF-exists override.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The run exceeded `limits.timeout` and was killed.
    #[error("sandbox run timed out after {timeout:?}")]
    Timeout {
        /// Output captured before the kill.
        combined_output: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },
    /// Neither the container runtime nor the host-local fallback could be
    /// launched at all (e.g. `docker` is not installed and no local TeX
    /// toolchain is present either).
    #[error("sandbox launch failed: {detail}")]
    LaunchFailed {
        /// Diagnostic output from both launch attempts.
        combined_output: String,
        /// Human-readable detail combining both failures.
        detail: String,
    },
}

/// Which tier actually produced a [`SandboxOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The containerized `docker run` invocation.
    Container,
    /// The host-local fallback invocation.
    HostLocal,
}

/// Result of a completed (not necessarily successful) sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    /// Stdout interleaved with stderr, in arrival order, one line per entry.
    pub combined_output: String,
    /// Exit code reported by the tool. `0` indicates the tool claims
    /// success; any other value does not by itself imply failure.
    pub exit_code: i32,
    /// Which tier produced this outcome.
    pub tier: Tier,
}

/// Runs a compile tool inside a sandboxed environment. The trait boundary
/// lets the compile worker be tested without a real container runtime.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Run `main_file` (a path relative to `workspace_path`) inside `image`,
    /// enforcing `limits`.
    async fn run(
        &self,
        image: &str,
        workspace_path: &Path,
        main_file: &str,
        limits: &SandboxLimits,
    ) -> Result<SandboxOutcome, SandboxError>;
}

/// The production [`SandboxRunner`]: `docker run`, falling back to a
/// host-local invocation if the container cannot be launched at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerSandboxRunner;

#[async_trait]
impl SandboxRunner for DockerSandboxRunner {
    async fn run(
        &self,
        image: &str,
        workspace_path: &Path,
        main_file: &str,
        limits: &SandboxLimits,
    ) -> Result<SandboxOutcome, SandboxError> {
        run(image, workspace_path, main_file, limits).await
    }
}

/// Run `main_file` (a path relative to `workspace_path`) inside `image`,
/// enforcing `limits`, falling back to a host-local invocation if the
/// container cannot be launched.
pub async fn run(
    image: &str,
    workspace_path: &Path,
    main_file: &str,
    limits: &SandboxLimits,
) -> Result<SandboxOutcome, SandboxError> {
    let docker_cmd = docker_command(image, workspace_path, main_file, limits);
    match exec_combined(docker_cmd, limits.timeout).await {
        Ok(result) => Ok(SandboxOutcome {
            combined_output: result.output,
            exit_code: result.exit_code,
            tier: Tier::Container,
        }),
        Err(ExecError::TimedOut { output }) => Err(SandboxError::Timeout {
            combined_output: output,
            timeout: limits.timeout,
        }),
        Err(ExecError::SpawnFailed(docker_err)) => {
            warn!(error = %docker_err, "container runtime unavailable, falling back to host-local compile");
            let local_cmd = host_local_command(workspace_path, main_file);
            match exec_combined(local_cmd, limits.timeout).await {
                Ok(result) => Ok(SandboxOutcome {
                    combined_output: result.output,
                    exit_code: result.exit_code,
                    tier: Tier::HostLocal,
                }),
                Err(ExecError::TimedOut { output }) => Err(SandboxError::Timeout {
                    combined_output: output,
                    timeout: limits.timeout,
                }),
                Err(ExecError::SpawnFailed(local_err)) => Err(SandboxError::LaunchFailed {
                    combined_output: format!(
                        "container launch failed: {docker_err}\nhost-local fallback also failed: {local_err}"
                    ),
                    detail: format!("docker: {docker_err}; host-local: {local_err}"),
                }),
            }
        }
    }
}

fn compile_shell_snippet(main_file: &str, outdir: &str) -> String {
    format!(
        "if command -v tectonic >/dev/null 2>&1; then tectonic --outdir={outdir} {main_file}; else latexmk -pdf -interaction=nonstopmode -halt-on-error -file-line-error -no-shell-escape -outdir={outdir} {main_file}; fi"
    )
}

fn docker_command(image: &str, workspace_path: &Path, main_file: &str, limits: &SandboxLimits) -> Command {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:/workspace", workspace_path.display()),
        "-v".into(),
        format!("{TECTONIC_CACHE_VOLUME}:/var/cache/tectonic"),
        "--network".into(),
        "none".into(),
        "--read-only".into(),
        "--tmpfs".into(),
        "/tmp:rw".into(),
        "--tmpfs".into(),
        "/var/tmp:rw".into(),
        "-w".into(),
        "/workspace".into(),
    ];

    let (uid, gid) = workspace_owner(workspace_path);
    args.push("--user".into());
    args.push(format!("{uid}:{gid}"));

    if limits.memory_bytes > 0 {
        args.push("--memory".into());
        args.push(limits.memory_bytes.to_string());
    }
    if limits.nano_cpus > 0 {
        let cpus = limits.nano_cpus as f64 / 1_000_000_000.0;
        args.push("--cpus".into());
        args.push(format!("{cpus}"));
    }

    let cmd_str = format!(
        "ls -la /workspace && {}",
        compile_shell_snippet(main_file, "/workspace")
    );
    args.push("--entrypoint".into());
    args.push("/bin/sh".into());
    args.push(image.into());
    args.push("-c".into());
    args.push(cmd_str);

    let mut cmd = Command::new("docker");
    cmd.args(&args);
    cmd
}

fn host_local_command(workspace_path: &Path, main_file: &str) -> Command {
    let ws = workspace_path.display();
    let cmd_str = format!(
        "ls -la {ws} && {}",
        compile_shell_snippet(main_file, &ws.to_string())
    );
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmd_str).current_dir(workspace_path);
    cmd
}

#[cfg(unix)]
fn workspace_owner(path: &Path) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path)
        .map(|m| (m.uid(), m.gid()))
        .unwrap_or((0, 0))
}

#[cfg(not(unix))]
fn workspace_owner(_path: &Path) -> (u32, u32) {
    (0, 0)
}

struct ExecResult {
    output: String,
    exit_code: i32,
}

enum ExecError {
    SpawnFailed(std::io::Error),
    TimedOut { output: String },
}

/// Run `cmd` to completion, merging stdout and stderr line-by-line in
/// arrival order, killing it if it outlives `timeout`.
async fn exec_combined(mut cmd: Command, timeout: Duration) -> Result<ExecResult, ExecError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ExecError::SpawnFailed)?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut output = String::new();
    let mut out_done = false;
    let mut err_done = false;

    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);

    loop {
        if out_done && err_done {
            break;
        }
        tokio::select! {
            _ = &mut sleep => {
                let _ = child.kill().await;
                return Err(ExecError::TimedOut { output });
            }
            line = out_lines.next_line(), if !out_done => {
                match line {
                    Ok(Some(l)) => { output.push_str(&l); output.push('\n'); }
                    _ => out_done = true,
                }
            }
            line = err_lines.next_line(), if !err_done => {
                match line {
                    Ok(Some(l)) => { output.push_str(&l); output.push('\n'); }
                    _ => err_done = true,
                }
            }
        }
    }

    let status = child.wait().await.map_err(ExecError::SpawnFailed)?;
    Ok(ExecResult {
        output,
        exit_code: status.code().unwrap_or(-1),
    })
}
