// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Filesystem adapter.
//!
//! The model repository may live on a local disk or behind an object-store
//! URI; the core assumes only three operations. Additional schemes plug in
//! through [filesystem_for].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FsError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("unsupported path scheme: {0}")]
    UnsupportedScheme(String),
}

impl FsError {
    fn io(path: &Path, err: std::io::Error) -> FsError {
        if err.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(path.display().to_string())
        } else {
            FsError::Io {
                path: path.display().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub is_directory: bool,
    pub size_bytes: u64,
}

#[async_trait]
pub trait FileSystem: std::fmt::Debug + Send + Sync + 'static {
    /// Names of the entries directly under `path`.
    async fn list(&self, path: &Path) -> Result<Vec<String>, FsError>;

    async fn stat(&self, path: &Path) -> Result<FileInfo, FsError>;

    async fn read(&self, path: &Path) -> Result<Bytes, FsError>;
}

/// Adapter over the local disk.
#[derive(Debug)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn list(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let entries = std::fs::read_dir(path).map_err(|e| FsError::io(path, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io(path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo, FsError> {
        let meta = std::fs::metadata(path).map_err(|e| FsError::io(path, e))?;
        Ok(FileInfo {
            is_directory: meta.is_dir(),
            size_bytes: meta.len(),
        })
    }

    async fn read(&self, path: &Path) -> Result<Bytes, FsError> {
        let data = std::fs::read(path).map_err(|e| FsError::io(path, e))?;
        Ok(Bytes::from(data))
    }
}

/// Resolve a repository path to the adapter that serves it. Plain paths and
/// `file://` URIs map to [LocalFileSystem]; object-store schemes are the
/// plug-in point for deployments that mount cloud repositories.
pub fn filesystem_for(base_path: &str) -> Result<(Arc<dyn FileSystem>, PathBuf), FsError> {
    match base_path.split_once("://") {
        None => Ok((Arc::new(LocalFileSystem), PathBuf::from(base_path))),
        Some(("file", rest)) => Ok((Arc::new(LocalFileSystem), PathBuf::from(rest))),
        Some((scheme, _)) => Err(FsError::UnsupportedScheme(scheme.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_and_stat_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("1")).unwrap();
        std::fs::write(dir.path().join("weights.bin"), b"xx").unwrap();

        let fs = LocalFileSystem;
        let names = fs.list(dir.path()).await.unwrap();
        assert_eq!(names, vec!["1".to_string(), "weights.bin".to_string()]);

        let info = fs.stat(&dir.path().join("1")).await.unwrap();
        assert!(info.is_directory);
        let info = fs.stat(&dir.path().join("weights.bin")).await.unwrap();
        assert_eq!(info.size_bytes, 2);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let fs = LocalFileSystem;
        let err = fs.stat(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn scheme_dispatch() {
        assert!(filesystem_for("/models/a").is_ok());
        assert!(filesystem_for("file:///models/a").is_ok());
        let err = filesystem_for("s3://bucket/models").unwrap_err();
        assert!(matches!(err, FsError::UnsupportedScheme(s) if s == "s3"));
    }
}
