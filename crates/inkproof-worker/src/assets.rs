use inkproof_artifacts::ArtifactStore;
use regex::Regex;
use std::path::{Component, Path};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

fn includegraphics_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\includegraphics(?:\s*\[[^\]]*\])?\{([^}]+)\}").expect("valid regex")
    })
}

/// Scan every `.tex`/`.cls` file under `workspace` for `\includegraphics`
/// references and best-effort fetch any that are missing locally from the
/// assets bucket, trying a fixed set of candidate keys in order. Returns the
/// number of assets successfully fetched. Never fails the caller: any
/// individual reference that can't be resolved is simply skipped.
pub async fn preflight_fetch_assets(
    artifacts: &dyn ArtifactStore,
    assets_bucket: &str,
    workspace: &Path,
    user_id: Option<&str>,
    doc_id: Option<&str>,
) -> usize {
    let references = scan_asset_references(workspace);
    let mut fetched = 0;

    for reference in references {
        if !is_safe_relative_reference(&reference) {
            continue;
        }
        let target = workspace.join(&reference);
        if target.exists() {
            continue;
        }

        for key in candidate_keys(&reference, user_id, doc_id) {
            match artifacts.get(assets_bucket, &key).await {
                Ok(bytes) => {
                    if write_asset(&target, &bytes).await.is_ok() {
                        debug!(reference = %reference, key = %key, "fetched pre-flight asset");
                        fetched += 1;
                    }
                    break;
                }
                Err(_) => continue,
            }
        }
    }

    fetched
}

fn candidate_keys(reference: &str, user_id: Option<&str>, doc_id: Option<&str>) -> Vec<String> {
    let mut keys = vec![reference.to_string()];
    let basename = Path::new(reference)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(reference);

    if let Some(uid) = user_id {
        keys.push(format!("{uid}/{reference}"));
        keys.push(format!("{uid}/assets/{basename}"));
    }
    if let Some(did) = doc_id {
        keys.push(format!("project/{did}/{reference}"));
        keys.push(format!("project/{did}/assets/{basename}"));
    }
    keys
}

fn scan_asset_references(workspace: &Path) -> Vec<String> {
    let mut references = Vec::new();
    for entry in WalkDir::new(workspace).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext == "tex" || ext == "cls");
        if !is_source {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        for captures in includegraphics_pattern().captures_iter(&contents) {
            references.push(captures[1].trim().to_string());
        }
    }
    references
}

fn is_safe_relative_reference(reference: &str) -> bool {
    let p = Path::new(reference);
    if p.is_absolute() || reference.is_empty() {
        return false;
    }
    p.components().all(|c| matches!(c, Component::Normal(_)))
}

async fn write_asset(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = tokio::fs::metadata(target).await {
            let mut perms = meta.permissions();
            perms.set_mode(0o644);
            if let Err(e) = tokio::fs::set_permissions(target, perms).await {
                warn!(path = %target.display(), error = %e, "failed to chmod fetched asset");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_includegraphics_references() {
        let src = r"\includegraphics[width=0.5\linewidth]{figures/plot.png}
\includegraphics{logo.pdf}";
        let refs: Vec<_> = includegraphics_pattern()
            .captures_iter(src)
            .map(|c| c[1].to_string())
            .collect();
        assert_eq!(refs, vec!["figures/plot.png", "logo.pdf"]);
    }

    #[test]
    fn candidate_keys_follow_spec_order() {
        let keys = candidate_keys("figures/plot.png", Some("user-1"), Some("doc-7"));
        assert_eq!(
            keys,
            vec![
                "figures/plot.png",
                "user-1/figures/plot.png",
                "user-1/assets/plot.png",
                "project/doc-7/figures/plot.png",
                "project/doc-7/assets/plot.png",
            ]
        );
    }

    #[test]
    fn rejects_unsafe_references() {
        assert!(!is_safe_relative_reference("../../etc/passwd"));
        assert!(!is_safe_relative_reference("/etc/passwd"));
        assert!(is_safe_relative_reference("figures/plot.png"));
    }

    #[tokio::test]
    async fn skips_assets_already_present_in_workspace() {
        use inkproof_artifacts::FsArtifactStore;

        let bucket_dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(bucket_dir.path(), "http://localhost/download");

        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("main.tex"), b"\\includegraphics{plot.png}").unwrap();
        std::fs::write(workspace.path().join("plot.png"), b"already here").unwrap();

        let fetched =
            preflight_fetch_assets(&store, "assets", workspace.path(), None, None).await;
        assert_eq!(fetched, 0);
    }

    #[tokio::test]
    async fn fetches_missing_asset_from_bucket() {
        use inkproof_artifacts::FsArtifactStore;

        let bucket_dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(bucket_dir.path(), "http://localhost/download");
        store.ensure_bucket("assets").await.unwrap();
        let mut reader = std::io::Cursor::new(b"fake-png".to_vec());
        store
            .put("assets", "user-1/assets/plot.png", &mut reader, 8, "image/png")
            .await
            .unwrap();

        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(
            workspace.path().join("main.tex"),
            b"\\includegraphics{plot.png}",
        )
        .unwrap();

        let fetched =
            preflight_fetch_assets(&store, "assets", workspace.path(), Some("user-1"), None).await;
        assert_eq!(fetched, 1);
        assert!(workspace.path().join("plot.png").exists());
    }
}
