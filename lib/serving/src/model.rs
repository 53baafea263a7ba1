// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One logical model: the set of loaded [ModelInstance] versions plus the
//! currently advertised default version.
//!
//! A single reader-writer lock protects the version map. Readers take shared
//! mode and clone the `Arc` out, so liveness guards are acquired without
//! holding the map lock. Version mutations (add/retire/reload) are driven by
//! the manager's reconciliation and serialize per model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::backend::InferenceEngine;
use crate::config::ModelConfig;
use crate::filesystem::FileSystem;
use crate::status::Status;

pub mod instance;
pub mod version_policy;
pub mod version_reader;

pub use instance::{LivenessGuard, ModelInstance, ModelInstanceState, ModelVersion};
pub use version_policy::ModelVersionPolicy;
pub use version_reader::VersionReader;

pub struct Model {
    name: String,
    versions: RwLock<BTreeMap<ModelVersion, Arc<ModelInstance>>>,
    /// Highest AVAILABLE version; 0 when none is servable.
    default_version: AtomicU64,

    engine: Arc<dyn InferenceEngine>,
    fs: Arc<dyn FileSystem>,
}

impl Model {
    pub fn new(name: &str, engine: Arc<dyn InferenceEngine>, fs: Arc<dyn FileSystem>) -> Model {
        Model {
            name: name.to_string(),
            versions: RwLock::new(BTreeMap::new()),
            default_version: AtomicU64::new(0),
            engine,
            fs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The advertised default version, or None when no version is servable.
    pub fn default_version(&self) -> Option<ModelVersion> {
        match self.default_version.load(Ordering::SeqCst) {
            0 => None,
            v => Some(v),
        }
    }

    pub fn get_instance_by_version(&self, version: ModelVersion) -> Option<Arc<ModelInstance>> {
        self.versions.read().get(&version).cloned()
    }

    pub fn get_default_instance(&self) -> Option<Arc<ModelInstance>> {
        let version = self.default_version()?;
        self.get_instance_by_version(version)
    }

    /// Versions present in the map and not yet retired. This is the `Cur`
    /// set reconciliation diffs against the on-disk target.
    pub fn tracked_versions(&self) -> BTreeSet<ModelVersion> {
        self.versions
            .read()
            .iter()
            .filter(|(_, instance)| instance.state() != ModelInstanceState::End)
            .map(|(version, _)| *version)
            .collect()
    }

    /// All instances, including retired and failed ones. Diagnostic surface.
    pub fn instances(&self) -> Vec<Arc<ModelInstance>> {
        self.versions.read().values().cloned().collect()
    }

    /// Recompute the default as the numerically highest AVAILABLE version.
    fn update_default_version(&self) {
        let new_default = self
            .versions
            .read()
            .iter()
            .rev()
            .find(|(_, instance)| instance.is_available())
            .map(|(version, _)| *version)
            .unwrap_or(0);
        self.default_version.store(new_default, Ordering::SeqCst);
        tracing::debug!(model = %self.name, default_version = new_default, "Updated default version");
    }

    /// Load every version in `new_versions` not already live in the map.
    ///
    /// Outcomes accumulate per version: a failed load leaves a
    /// LOADING_FAILED instance in the map for diagnostic visibility and does
    /// not roll back the versions that loaded. Returns the first error.
    pub async fn add_versions(
        &self,
        new_versions: &BTreeSet<ModelVersion>,
        config: &ModelConfig,
    ) -> Result<(), Status> {
        let mut first_error = None;
        for &version in new_versions {
            // A retired END entry that was not swept yet is replaced; an
            // active entry is left alone.
            let active = self
                .versions
                .read()
                .get(&version)
                .is_some_and(|instance| instance.state() != ModelInstanceState::End);
            if active {
                continue;
            }
            let instance = ModelInstance::new(
                &self.name,
                version,
                config.clone(),
                Arc::clone(&self.engine),
                Arc::clone(&self.fs),
            );
            let outcome = instance.load(config.clone()).await;
            self.versions.write().insert(version, instance);
            if let Err(status) = outcome {
                tracing::error!(model = %self.name, version, %status, "Adding model version failed");
                first_error.get_or_insert(status);
            }
        }
        self.update_default_version();
        match first_error {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }

    /// Unload every version in `old_versions` present in the map. Retired
    /// instances stay in the map in END state until the next reconciliation
    /// sweep removes them; concurrent reads skip them as not AVAILABLE.
    pub async fn retire_versions(&self, old_versions: &BTreeSet<ModelVersion>) {
        for &version in old_versions {
            let Some(instance) = self.get_instance_by_version(version) else {
                continue;
            };
            instance.unload().await;
            self.update_default_version();
        }
    }

    /// Retire every version. Used at shutdown and on config removal.
    pub async fn retire_all_versions(&self) {
        let all = self.versions.read().keys().copied().collect();
        self.retire_versions(&all).await;
    }

    /// Reload versions in place with a changed configuration.
    pub async fn reload_versions(
        &self,
        versions_to_reload: &BTreeSet<ModelVersion>,
        config: &ModelConfig,
    ) -> Result<(), Status> {
        let mut first_error = None;
        for &version in versions_to_reload {
            let Some(instance) = self.get_instance_by_version(version) else {
                continue;
            };
            if let Err(status) = instance.reload(config.clone()).await {
                tracing::error!(model = %self.name, version, %status, "Reloading model version failed");
                first_error.get_or_insert(status);
            }
        }
        self.update_default_version();
        match first_error {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }

    /// Drop END-state instances from the map. Called at the start of every
    /// reconciliation sweep; an END instance has already drained.
    pub fn sweep_retired(&self) {
        let mut versions = self.versions.write();
        versions.retain(|_, instance| instance.state() != ModelInstanceState::End);
    }

    /// Resolve a version selector against the map without waiting.
    pub fn resolve(&self, version: Option<ModelVersion>) -> Result<Arc<ModelInstance>, Status> {
        match version {
            Some(v) => self
                .get_instance_by_version(v)
                .ok_or_else(|| Status::ModelVersionMissing {
                    name: self.name.clone(),
                    requested: v.to_string(),
                }),
            None => self
                .get_default_instance()
                .ok_or_else(|| Status::ModelVersionMissing {
                    name: self.name.clone(),
                    requested: "default".to_string(),
                }),
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("versions", &self.tracked_versions())
            .field("default_version", &self.default_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockEngine;
    use crate::filesystem::LocalFileSystem;

    fn setup() {
        serval_runtime::logging::init();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: MockEngine,
        config: ModelConfig,
        model: Model,
    }

    fn fixture(name: &str, versions: &[u64]) -> Fixture {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(name);
        for v in versions {
            let vdir = base.join(v.to_string());
            std::fs::create_dir_all(&vdir).unwrap();
            std::fs::write(vdir.join("graph.xml"), b"<graph/>").unwrap();
        }
        let engine = MockEngine::new();
        let config: ModelConfig = serde_json::from_str(&format!(
            r#"{{"name": "{name}", "base_path": "{}"}}"#,
            base.display()
        ))
        .unwrap();
        let model = Model::new(name, Arc::new(engine.clone()), Arc::new(LocalFileSystem));
        Fixture {
            _dir: dir,
            engine,
            config,
            model,
        }
    }

    #[tokio::test]
    async fn add_versions_sets_highest_available_as_default() {
        let f = fixture("resnet", &[1, 2, 3]);
        f.model
            .add_versions(&BTreeSet::from([1, 3]), &f.config)
            .await
            .unwrap();
        assert_eq!(f.model.default_version(), Some(3));
        assert_eq!(f.model.tracked_versions(), BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn failed_version_stays_visible_but_not_default() {
        let f = fixture("resnet", &[1]);
        // Version 2 has no directory on disk: load fails.
        let err = f
            .model
            .add_versions(&BTreeSet::from([1, 2]), &f.config)
            .await
            .unwrap_err();
        assert!(matches!(err, Status::PathInvalid { .. }));

        assert_eq!(f.model.default_version(), Some(1));
        let failed = f.model.get_instance_by_version(2).unwrap();
        assert_eq!(failed.state(), ModelInstanceState::LoadingFailed);
        // Failed version does not block the healthy one.
        assert!(f.model.resolve(None).is_ok());
    }

    #[tokio::test]
    async fn retire_moves_default_to_next_available() {
        let f = fixture("resnet", &[1, 2]);
        f.model
            .add_versions(&BTreeSet::from([1, 2]), &f.config)
            .await
            .unwrap();
        assert_eq!(f.model.default_version(), Some(2));

        f.model.retire_versions(&BTreeSet::from([2])).await;
        assert_eq!(f.model.default_version(), Some(1));

        // Retired instance visible until swept, then gone.
        assert!(f.model.get_instance_by_version(2).is_some());
        f.model.sweep_retired();
        assert!(f.model.get_instance_by_version(2).is_none());
    }

    #[tokio::test]
    async fn retire_all_leaves_no_default() {
        let f = fixture("resnet", &[1, 2]);
        f.model
            .add_versions(&BTreeSet::from([1, 2]), &f.config)
            .await
            .unwrap();
        f.model.retire_all_versions().await;
        assert_eq!(f.model.default_version(), None);
        let err = f.model.resolve(None).unwrap_err();
        assert!(matches!(err, Status::ModelVersionMissing { .. }));
    }

    #[tokio::test]
    async fn reload_applies_new_config() {
        let f = fixture("resnet", &[1]);
        f.model
            .add_versions(&BTreeSet::from([1]), &f.config)
            .await
            .unwrap();
        let loads_before = f.engine.loads();

        let mut changed = f.config.clone();
        changed.nireq = 8;
        f.model
            .reload_versions(&BTreeSet::from([1]), &changed)
            .await
            .unwrap();
        assert_eq!(f.engine.loads(), loads_before + 1);
        let instance = f.model.get_instance_by_version(1).unwrap();
        assert_eq!(instance.config().nireq, 8);
        assert_eq!(f.model.default_version(), Some(1));
    }

    #[tokio::test]
    async fn readd_after_retire_restores_identical_io() {
        let f = fixture("resnet", &[1]);
        f.model
            .add_versions(&BTreeSet::from([1]), &f.config)
            .await
            .unwrap();
        let io_before = f.model.get_instance_by_version(1).unwrap().inputs();

        // Re-add directly over the retired END entry, no sweep in between.
        f.model.retire_all_versions().await;
        f.model
            .add_versions(&BTreeSet::from([1]), &f.config)
            .await
            .unwrap();
        let io_after = f.model.get_instance_by_version(1).unwrap().inputs();
        assert_eq!(io_before, io_after);
    }

    #[tokio::test]
    async fn resolve_specific_version() {
        let f = fixture("resnet", &[1, 2]);
        f.model
            .add_versions(&BTreeSet::from([1, 2]), &f.config)
            .await
            .unwrap();
        assert_eq!(f.model.resolve(Some(1)).unwrap().version(), 1);
        let err = f.model.resolve(Some(9)).unwrap_err();
        assert!(matches!(err, Status::ModelVersionMissing { .. }));
    }
}
