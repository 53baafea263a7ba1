// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::filesystem::{FileSystem, FsError};
use crate::model::ModelVersion;
use crate::status::Status;

/// Enumerates the version directories present under a model's base path.
///
/// A valid version directory has a name that parses as a positive integer.
/// Non-numeric or non-positive names are ignored with a warning. The reader
/// never mutates the filesystem.
pub struct VersionReader {
    fs: Arc<dyn FileSystem>,
}

impl VersionReader {
    pub fn new(fs: Arc<dyn FileSystem>) -> VersionReader {
        VersionReader { fs }
    }

    pub async fn read(&self, base_path: &Path) -> Result<BTreeSet<ModelVersion>, Status> {
        let info = self.fs.stat(base_path).await.map_err(|_| Status::PathInvalid {
            path: base_path.display().to_string(),
        })?;
        if !info.is_directory {
            return Err(Status::PathInvalid {
                path: base_path.display().to_string(),
            });
        }

        let entries = self.fs.list(base_path).await.map_err(|e| match e {
            FsError::NotFound(path) => Status::PathInvalid { path },
            other => Status::Filesystem {
                path: base_path.display().to_string(),
                reason: other.to_string(),
            },
        })?;

        let mut versions = BTreeSet::new();
        for name in entries {
            match name.parse::<ModelVersion>() {
                Ok(version) if version > 0 => {
                    versions.insert(version);
                }
                _ => {
                    tracing::warn!(
                        base_path = %base_path.display(),
                        entry = %name,
                        "Ignoring entry that is not a positive numeric version directory"
                    );
                }
            }
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> VersionReader {
        VersionReader::new(Arc::new(crate::filesystem::LocalFileSystem))
    }

    #[tokio::test]
    async fn enumerates_numeric_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1", "3", "12"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let versions = reader().read(dir.path()).await.unwrap();
        assert_eq!(versions, BTreeSet::from([1, 3, 12]));
    }

    #[tokio::test]
    async fn ignores_invalid_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0", "-2", "snapshot", "2a", "7"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let versions = reader().read(dir.path()).await.unwrap();
        assert_eq!(versions, BTreeSet::from([7]));
    }

    #[tokio::test]
    async fn empty_directory_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let versions = reader().read(dir.path()).await.unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn missing_base_path_is_invalid() {
        let err = reader()
            .read(Path::new("/no/such/repository"))
            .await
            .unwrap_err();
        assert!(matches!(err, Status::PathInvalid { .. }));
    }
}
