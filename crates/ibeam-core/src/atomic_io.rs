//! Crash-safe JSON persistence: write to a temp file in the same directory,
//! fsync it, then rename into place (§4.6, §9 "JSON persistence").
//!
//! Grounded on the teacher's `atomic_write_file`/`atomic_write_file_sync`
//! pair: a temp file named after the target with a unique suffix, written
//! and fsynced before the rename so a reader never observes a partial file,
//! and the rename itself is atomic on the same filesystem.

use crate::error::{IbeamError, Result};
use serde::Serialize;
use std::path::Path;

/// Serialize `value` to pretty JSON and write it atomically to `path`.
///
/// Creates `path`'s parent directory if it does not already exist. The
/// temp file lives alongside `path` so the final `rename` stays within one
/// filesystem.
pub async fn atomic_write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &body).await
}

/// Write `bytes` atomically to `path` via temp-file-then-rename.
pub async fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = temp_path_for(path);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    use tokio::io::AsyncWriteExt;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        IbeamError::Io(std::io::Error::new(
            e.kind(),
            format!("failed renaming {} into {}: {e}", tmp_path.display(), path.display()),
        ))
    })
}

/// Synchronous counterpart, for call sites (e.g. CLI shutdown handlers)
/// that cannot await.
pub fn atomic_write_bytes_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_path_for(path);

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("metadata.json");
    let unique = uuid::Uuid::new_v4();
    path.with_file_name(format!(".{file_name}.{unique}.tmp"))
}

/// Read and parse a JSON document from `path`.
pub async fn read_json<T: for<'de> serde::Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        n: u32,
        s: String,
    }

    #[tokio::test]
    async fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("metadata.json");
        let doc = Doc {
            n: 7,
            s: "hello".to_string(),
        };

        atomic_write_json(&path, &doc).await.expect("write");
        let back: Doc = read_json(&path).await.expect("read");
        assert_eq!(doc, back);
    }

    #[tokio::test]
    async fn leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.json");
        atomic_write_json(&path, &Doc { n: 1, s: "x".into() })
            .await
            .expect("write");

        let mut entries = tokio::fs::read_dir(dir.path()).await.expect("read_dir");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.expect("next_entry") {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["metadata.json".to_string()]);
    }

    #[tokio::test]
    async fn overwrite_replaces_prior_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.json");
        atomic_write_json(&path, &Doc { n: 1, s: "a".into() })
            .await
            .expect("write 1");
        atomic_write_json(&path, &Doc { n: 2, s: "b".into() })
            .await
            .expect("write 2");

        let back: Doc = read_json(&path).await.expect("read");
        assert_eq!(back, Doc { n: 2, s: "b".into() });
    }
}
