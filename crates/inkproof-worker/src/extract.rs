use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Errors while extracting a source archive into a workspace.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The archive could not be parsed as a zip file.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Writing an extracted entry to disk failed.
    #[error("failed to write extracted entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract `bytes` (a zip archive) into `dest`, skipping any entry whose
/// path contains `..` or starts with `/`. Returns the relative paths of
/// every entry actually written, for main-file resolution and diagnostics.
///
/// Runs on a blocking task since the `zip` crate's reader is synchronous.
pub async fn extract_zip(bytes: Vec<u8>, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip_blocking(&bytes, &dest))
        .await
        .expect("zip extraction task panicked")
}

fn extract_zip_blocking(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut extracted = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let raw_name = entry.name().to_string();

        if is_unsafe_zip_path(&raw_name) {
            warn!(entry = %raw_name, "skipping zip entry with unsafe path");
            continue;
        }
        let Some(rel_path) = entry.enclosed_name() else {
            warn!(entry = %raw_name, "skipping zip entry outside workspace root");
            continue;
        };

        let out_path = dest.join(&rel_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
        extracted.push(rel_path);
    }

    Ok(extracted)
}

fn is_unsafe_zip_path(name: &str) -> bool {
    name.starts_with('/') || name.split(['/', '\\']).any(|component| component == "..")
}
