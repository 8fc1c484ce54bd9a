use std::path::{Path, PathBuf};
use tracing::warn;

/// A staged compile workspace directory, recursively removed on drop.
///
/// Cleanup happens unconditionally on every exit path (success, failure, or
/// an early return before the sandbox ever runs), mirroring the
/// `defer os.RemoveAll(workspace)` guarantee of the reference implementation
/// without needing an explicit defer in every branch.
pub struct WorkspaceGuard {
    path: PathBuf,
}

impl WorkspaceGuard {
    /// Create a fresh, empty workspace directory under `root` named after
    /// `job_id` (plus a random suffix, so retries of the same job id never
    /// collide with a workspace still being torn down).
    pub async fn create(root: &Path, job_id: &str) -> std::io::Result<Self> {
        let path = root.join(format!("job-{job_id}-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    /// The workspace's root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove compile workspace");
            }
        }
    }
}
