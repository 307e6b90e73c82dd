//! Rooted attachment blob store.
//!
//! Every Collection owns one `FileSystem` rooted at
//! `<data_dir>/files/<namespace>/<name>/`. Keys are caller-chosen relative
//! paths; writes land atomically via a temp-file-then-rename so a reader
//! never observes a partially written blob.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, StowageError};

/// In-memory payload passed to `FileSystem::save`. `Uri` lets a caller
/// register a reference to externally-hosted content without copying
/// bytes through the store; `Inline` is copied to disk as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Inline(Vec<u8>),
    Uri(String),
}

/// Metadata returned by `FileSystem::stat` and included in `list` entries.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub key: String,
    pub size: u64,
    pub is_uri: bool,
}

/// A rooted, path-traversal-safe blob store.
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    /// Open (creating if absent) a FileSystem rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve `key` to an absolute path under `root`, rejecting any
    /// component that would escape it (`..`, absolute paths, empty key).
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StowageError::InvalidArgument(
                "file key must not be empty".to_string(),
            ));
        }
        let rel = Path::new(key);
        if rel.is_absolute() {
            return Err(StowageError::InvalidArgument(format!(
                "file key must be relative: {}",
                key
            )));
        }
        for component in rel.components() {
            use std::path::Component;
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StowageError::InvalidArgument(format!(
                        "file key must not contain '..' or root markers: {}",
                        key
                    )));
                }
            }
        }
        Ok(self.root.join(rel))
    }

    /// Write `data` to `key`, creating parent directories as needed.
    /// `Uri` payloads are recorded as a `.uri` sidecar file containing the
    /// URI text rather than fetched content.
    pub async fn save(&self, key: &str, data: FileData) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension(format!("tmp-{}", fastrand::u64(..)));
        match data {
            FileData::Inline(bytes) => {
                let mut f = tokio::fs::File::create(&tmp_path).await?;
                f.write_all(&bytes).await?;
                f.flush().await?;
            }
            FileData::Uri(uri) => {
                tokio::fs::write(&tmp_path, uri.as_bytes()).await?;
                let uri_marker = path.with_extension("uri");
                tokio::fs::rename(&tmp_path, &uri_marker).await?;
                return Ok(());
            }
        }
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Load the content previously saved at `key`. Returns `NotFound` if
    /// absent, whether it is an inline blob or a `.uri` marker.
    pub async fn load(&self, key: &str) -> Result<FileData> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(FileData::Inline(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let uri_marker = path.with_extension("uri");
                match tokio::fs::read(&uri_marker).await {
                    Ok(bytes) => Ok(FileData::Uri(String::from_utf8_lossy(&bytes).to_string())),
                    Err(e2) if e2.kind() == std::io::ErrorKind::NotFound => Err(
                        StowageError::NotFound(format!("file not found: {}", key)),
                    ),
                    Err(e2) => Err(e2.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the content at `key`. Idempotent: deleting a nonexistent key
    /// is not an error, mirroring `Collection::delete`'s semantics.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let uri_marker = path.with_extension("uri");
        match tokio::fs::remove_file(&uri_marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Stat a single key without reading its content.
    pub async fn stat(&self, key: &str) -> Result<FileStat> {
        let path = self.resolve(key)?;
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            return Ok(FileStat {
                key: key.to_string(),
                size: meta.len(),
                is_uri: false,
            });
        }
        let uri_marker = path.with_extension("uri");
        let meta = tokio::fs::metadata(&uri_marker)
            .await
            .map_err(|_| StowageError::NotFound(format!("file not found: {}", key)))?;
        Ok(FileStat {
            key: key.to_string(),
            size: meta.len(),
            is_uri: true,
        })
    }

    /// List all keys under `prefix` (empty string lists everything),
    /// sorted lexically for deterministic pagination.
    pub async fn list(&self, prefix: &str) -> Result<Vec<FileStat>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<FileStat>> {
            let mut out = Vec::new();
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                let is_uri = rel.ends_with(".uri");
                let key = if is_uri {
                    rel.trim_end_matches(".uri").to_string()
                } else {
                    rel
                };
                if !key.starts_with(&prefix) {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                out.push(FileStat { key, size, is_uri });
            }
            out.sort_by(|a, b| a.key.cmp(&b.key));
            out.dedup_by(|a, b| a.key == b.key);
            Ok(out)
        })
        .await
        .map_err(|e| StowageError::Internal(format!("list task join error: {}", e)))??;
        Ok(entries)
    }

    /// Root directory this FileSystem is bound to.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_inline() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path()).await.unwrap();
        fs.save("a/b.txt", FileData::Inline(b"hello".to_vec()))
            .await
            .unwrap();
        match fs.load("a/b.txt").await.unwrap() {
            FileData::Inline(bytes) => assert_eq!(bytes, b"hello"),
            _ => panic!("expected inline data"),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_uri() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path()).await.unwrap();
        fs.save("ref.bin", FileData::Uri("s3://bucket/key".to_string()))
            .await
            .unwrap();
        match fs.load("ref.bin").await.unwrap() {
            FileData::Uri(uri) => assert_eq!(uri, "s3://bucket/key"),
            _ => panic!("expected uri data"),
        }
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path()).await.unwrap();
        let err = fs
            .save("../escape.txt", FileData::Inline(vec![1]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");

        let err2 = fs.save("/abs/path", FileData::Inline(vec![1])).await;
        assert!(err2.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path()).await.unwrap();
        fs.delete("missing.txt").await.unwrap();
        fs.save("present.txt", FileData::Inline(vec![1, 2, 3]))
            .await
            .unwrap();
        fs.delete("present.txt").await.unwrap();
        fs.delete("present.txt").await.unwrap();
        let err = fs.load("present.txt").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path()).await.unwrap();
        fs.save("images/a.png", FileData::Inline(vec![1]))
            .await
            .unwrap();
        fs.save("images/b.png", FileData::Inline(vec![2, 2]))
            .await
            .unwrap();
        fs.save("docs/c.txt", FileData::Inline(vec![3, 3, 3]))
            .await
            .unwrap();

        let images = fs.list("images/").await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].key, "images/a.png");
        assert_eq!(images[1].key, "images/b.png");

        let all = fs.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
