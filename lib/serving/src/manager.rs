// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Registry of all models.
//!
//! The [ModelManager] owns one [Model] per configured name, drives
//! repository reconciliation (one-shot or from a background watcher), and
//! dispatches client lookups. Reconciliation is cooperative: a single
//! background task per manager re-reads the configuration source and every
//! model's version directories, diffs against the loaded set, and applies
//! the minimal reload/retire/add sequence per model.
//!
//! Lock order: manager registry, then Model map, then instance internals.
//! The pipeline factory lock is independent and never taken while any of
//! the above are held. No lock is held across a backend call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serval_runtime::CancellationToken;

use crate::backend::InferenceEngine;
use crate::config::{ModelConfig, ServerConfig};
use crate::filesystem::{FileSystem, filesystem_for};
use crate::model::{LivenessGuard, Model, ModelInstance, ModelVersion, VersionReader};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::status::Status;
use crate::tensor::TensorMap;

/// How long a lookup with waiting semantics tolerates an in-progress load.
pub const DEFAULT_WAIT_FOR_LOADED: Duration = Duration::from_secs(10);

pub struct ModelManager {
    models: RwLock<HashMap<String, Arc<Model>>>,
    factory: PipelineFactory,

    engine: Arc<dyn InferenceEngine>,
    /// Adapter for the configuration source. Model repositories resolve
    /// their own adapter from the `base_path` scheme via [filesystem_for].
    fs: Arc<dyn FileSystem>,

    /// Configuration source re-read by [ModelManager::reconcile].
    config_path: Mutex<Option<PathBuf>>,
    last_config: Mutex<Option<ServerConfig>>,

    cancel: CancellationToken,
    watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ModelManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, fs: Arc<dyn FileSystem>) -> ModelManager {
        ModelManager {
            models: RwLock::new(HashMap::new()),
            factory: PipelineFactory::new(),
            engine,
            fs,
            config_path: Mutex::new(None),
            last_config: Mutex::new(None),
            cancel: CancellationToken::new(),
            watcher: Mutex::new(None),
        }
    }

    pub fn pipeline_factory(&self) -> &PipelineFactory {
        &self.factory
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    pub fn get_model(&self, name: &str) -> Option<Arc<Model>> {
        self.models.read().get(name).cloned()
    }

    /// Fetch a model by name, creating it with the repository adapter its
    /// base path dispatched to.
    fn get_or_create_model(&self, name: &str, fs: &Arc<dyn FileSystem>) -> Arc<Model> {
        if let Some(model) = self.get_model(name) {
            return model;
        }
        let mut models = self.models.write();
        Arc::clone(models.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Model::new(name, Arc::clone(&self.engine), Arc::clone(fs)))
        }))
    }

    /// Load a configuration document from the filesystem adapter and apply
    /// it. The path is remembered so the watcher re-reads it every cycle.
    pub async fn load_config_file(&self, path: impl AsRef<Path>) -> Result<(), Status> {
        let path = path.as_ref();
        let bytes = self.fs.read(path).await.map_err(|e| Status::Filesystem {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let text = std::str::from_utf8(&bytes).map_err(|_| Status::ConfigInvalid {
            reason: format!("configuration file {} is not valid UTF-8", path.display()),
        })?;
        let config = ServerConfig::from_json(text)?;
        *self.config_path.lock() = Some(path.to_path_buf());
        self.load_config(config).await
    }

    /// Apply a configuration document.
    ///
    /// Idempotent: repeated calls diff against the current state and apply
    /// the minimal set of add/retire/reload per model, then reconcile the
    /// pipeline definitions. Per-model failures are reported but do not
    /// stop the rest of the fleet from reconciling.
    pub async fn load_config(&self, config: ServerConfig) -> Result<(), Status> {
        config.validate()?;
        let mut first_error = None;

        for entry in &config.model_config_list {
            // Scheme dispatch: each base path selects its own adapter, with
            // the path normalized to the form that adapter understands.
            let (fs, base) = match filesystem_for(&entry.config.base_path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::error!(model = %entry.config.name, %e, "Unusable model repository path");
                    first_error.get_or_insert(Status::Filesystem {
                        path: entry.config.base_path.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let mut model_config = entry.config.clone();
            model_config.base_path = base.display().to_string();

            let model = self.get_or_create_model(&model_config.name, &fs);
            if let Err(status) = self.reconcile_model(&model, &model_config, &fs).await {
                tracing::error!(model = %model_config.name, %status, "Model reconciliation failed");
                first_error.get_or_insert(status);
            }
        }

        // Models dropped from the configuration retire in place.
        let configured: HashSet<&str> = config
            .model_config_list
            .iter()
            .map(|entry| entry.config.name.as_str())
            .collect();
        let removed: Vec<Arc<Model>> = self
            .models
            .read()
            .values()
            .filter(|model| !configured.contains(model.name()))
            .cloned()
            .collect();
        for model in removed {
            tracing::info!(model = %model.name(), "Retiring model removed from configuration");
            model.retire_all_versions().await;
        }

        if let Err(status) = self.factory.reconcile(&config.pipeline_config_list, self) {
            first_error.get_or_insert(status);
        }

        *self.last_config.lock() = Some(config);
        match first_error {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }

    /// Diff one model against the repository and apply the outcome.
    ///
    /// With `On` the versions on disk and `Cur` the versions tracked, the
    /// target `T` is the version policy applied to `On`; then
    /// `toAdd = T \ Cur`, `toRetire = Cur \ T`, and `toReload` the tracked
    /// versions whose effective config changed. Applied as reload, retire,
    /// add, so the newest effective config is in force before old versions
    /// disappear.
    async fn reconcile_model(
        &self,
        model: &Model,
        config: &ModelConfig,
        fs: &Arc<dyn FileSystem>,
    ) -> Result<(), Status> {
        model.sweep_retired();

        let reader = VersionReader::new(Arc::clone(fs));
        let on_disk = reader.read(Path::new(&config.base_path)).await?;
        let target = config.model_version_policy.filter(&on_disk);
        let current = model.tracked_versions();

        let to_add: BTreeSet<ModelVersion> = target.difference(&current).copied().collect();
        let to_retire: BTreeSet<ModelVersion> = current.difference(&target).copied().collect();
        let to_reload: BTreeSet<ModelVersion> = target
            .intersection(&current)
            .filter(|v| {
                model
                    .get_instance_by_version(**v)
                    .is_some_and(|instance| instance.config() != *config)
            })
            .copied()
            .collect();

        if to_add.is_empty() && to_retire.is_empty() && to_reload.is_empty() {
            return Ok(());
        }
        tracing::info!(
            model = %model.name(),
            to_reload = ?to_reload,
            to_retire = ?to_retire,
            to_add = ?to_add,
            "Applying version changes"
        );

        let mut first_error = None;
        if !to_reload.is_empty() {
            if let Err(status) = model.reload_versions(&to_reload, config).await {
                first_error.get_or_insert(status);
            }
        }
        model.retire_versions(&to_retire).await;
        if !to_add.is_empty() {
            if let Err(status) = model.add_versions(&to_add, config).await {
                first_error.get_or_insert(status);
            }
        }

        match first_error {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }

    /// One reconciliation cycle: re-read the configuration source (file if
    /// one was given, the last in-memory document otherwise) and re-apply.
    pub async fn reconcile(&self) -> Result<(), Status> {
        let path = self.config_path.lock().clone();
        if let Some(path) = path {
            return self.load_config_file(path).await;
        }
        let config = self.last_config.lock().clone();
        match config {
            Some(config) => self.load_config(config).await,
            None => Ok(()),
        }
    }

    /// Spawn the background reconciliation task. An interval of 0 disables
    /// watching; callers may invoke [ModelManager::reconcile] themselves.
    pub fn start_watcher(self: &Arc<Self>, poll_interval_secs: u64) {
        if poll_interval_secs == 0 {
            tracing::info!("Repository watcher disabled");
            return;
        }
        let manager = Arc::clone(self);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The configuration was applied when it was loaded; the first
            // tick fires immediately and would duplicate that work.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(status) = manager.reconcile().await {
                            tracing::warn!(%status, "Reconciliation cycle reported errors");
                        }
                    }
                }
            }
            tracing::debug!("Repository watcher stopped");
        });
        let previous = self.watcher.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel the watcher and retire every version of every model. Returns
    /// once all liveness guards are released and no network remains loaded.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let models: Vec<Arc<Model>> = self.models.read().values().cloned().collect();
        for model in models {
            model.retire_all_versions().await;
        }
        self.factory.retire_all();
        tracing::info!("Model manager stopped");
    }

    /// Resolve `(name, version)` to an AVAILABLE instance plus a liveness
    /// guard. Omitting the version selects the model's default. Never
    /// blocks on a backend call.
    pub fn find_model_instance(
        &self,
        name: &str,
        version: Option<ModelVersion>,
    ) -> Result<(Arc<ModelInstance>, LivenessGuard), Status> {
        let model = self
            .get_model(name)
            .ok_or_else(|| Status::ModelNameMissing {
                name: name.to_string(),
            })?;
        let instance = model.resolve(version)?;
        let guard = instance.acquire_liveness_guard()?;
        Ok((instance, guard))
    }

    /// As [ModelManager::find_model_instance], but tolerates an in-progress
    /// load or reload for up to `wait`.
    pub async fn find_model_instance_with_timeout(
        &self,
        name: &str,
        version: Option<ModelVersion>,
        wait: Duration,
    ) -> Result<(Arc<ModelInstance>, LivenessGuard), Status> {
        let model = self
            .get_model(name)
            .ok_or_else(|| Status::ModelNameMissing {
                name: name.to_string(),
            })?;
        let instance = model.resolve(version)?;
        let guard = instance.wait_for_available(wait).await?;
        Ok((instance, guard))
    }

    /// Materialize a pipeline for one request.
    pub fn create_pipeline(&self, name: &str, request: TensorMap) -> Result<Pipeline, Status> {
        self.factory.create(name, request, self)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("models", &self.model_names())
            .field("pipelines", &self.factory.definition_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockEngine;
    use crate::filesystem::LocalFileSystem;
    use crate::model::ModelInstanceState;

    fn setup() {
        serval_runtime::logging::init();
    }

    struct Fixture {
        dir: tempfile::TempDir,
        engine: MockEngine,
        manager: Arc<ModelManager>,
    }

    impl Fixture {
        fn new() -> Fixture {
            setup();
            let engine = MockEngine::new();
            let manager = Arc::new(ModelManager::new(
                Arc::new(engine.clone()),
                Arc::new(LocalFileSystem),
            ));
            Fixture {
                dir: tempfile::tempdir().unwrap(),
                engine,
                manager,
            }
        }

        fn base_path(&self, model: &str) -> PathBuf {
            self.dir.path().join(model)
        }

        fn put_version(&self, model: &str, version: u64) {
            let vdir = self.base_path(model).join(version.to_string());
            std::fs::create_dir_all(&vdir).unwrap();
            std::fs::write(vdir.join("graph.xml"), b"<graph/>").unwrap();
        }

        fn drop_version(&self, model: &str, version: u64) {
            std::fs::remove_dir_all(self.base_path(model).join(version.to_string())).unwrap();
        }

        fn config_for(&self, model: &str, extra: &str) -> ServerConfig {
            let doc = format!(
                r#"{{"model_config_list": [{{"config": {{
                    "name": "{model}", "base_path": "{}"{extra}
                }}}}]}}"#,
                self.base_path(model).display()
            );
            ServerConfig::from_json(&doc).unwrap()
        }
    }

    #[tokio::test]
    async fn load_config_loads_latest_version_by_default() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.put_version("resnet", 2);
        f.manager
            .load_config(f.config_for("resnet", ""))
            .await
            .unwrap();

        let (instance, _guard) = f.manager.find_model_instance("resnet", None).unwrap();
        assert_eq!(instance.version(), 2);
        assert_eq!(f.engine.loads(), 1);
    }

    #[tokio::test]
    async fn lookup_errors_distinguish_name_and_version() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.manager
            .load_config(f.config_for("resnet", ""))
            .await
            .unwrap();

        let err = f.manager.find_model_instance("unknown", None).unwrap_err();
        assert!(matches!(err, Status::ModelNameMissing { .. }));

        let err = f.manager.find_model_instance("resnet", Some(9)).unwrap_err();
        assert!(matches!(err, Status::ModelVersionMissing { .. }));
    }

    #[tokio::test]
    async fn repeated_load_config_is_a_no_op() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        let config = f.config_for("resnet", r#", "nireq": 2"#);

        f.manager.load_config(config.clone()).await.unwrap();
        let loads = f.engine.loads();
        f.manager.load_config(config).await.unwrap();
        assert_eq!(f.engine.loads(), loads);
    }

    #[tokio::test]
    async fn config_change_triggers_reload_only() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.manager
            .load_config(f.config_for("resnet", r#", "nireq": 2"#))
            .await
            .unwrap();
        assert_eq!(f.engine.loads(), 1);

        f.manager
            .load_config(f.config_for("resnet", r#", "nireq": 4"#))
            .await
            .unwrap();
        assert_eq!(f.engine.loads(), 2);
        let (instance, _guard) = f.manager.find_model_instance("resnet", None).unwrap();
        assert_eq!(instance.config().nireq, 4);
    }

    #[tokio::test]
    async fn version_promotion_retires_previous_latest() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.put_version("resnet", 2);
        f.manager
            .load_config(f.config_for("resnet", ""))
            .await
            .unwrap();

        // Client pinned to v2 while v3 appears on disk.
        let (v2, guard) = f.manager.find_model_instance("resnet", None).unwrap();
        assert_eq!(v2.version(), 2);

        f.put_version("resnet", 3);
        let reconcile = {
            let manager = Arc::clone(&f.manager);
            tokio::spawn(async move { manager.reconcile().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Retire of v2 blocks on the outstanding guard.
        assert!(!reconcile.is_finished());
        assert_eq!(v2.state(), ModelInstanceState::Unloading);

        drop(guard);
        reconcile.await.unwrap().unwrap();

        let (instance, _guard) = f.manager.find_model_instance("resnet", None).unwrap();
        assert_eq!(instance.version(), 3);
        let err = f.manager.find_model_instance("resnet", Some(2)).unwrap_err();
        assert!(matches!(
            err,
            Status::ModelVersionNotLoadedAnymore { .. } | Status::ModelVersionMissing { .. }
        ));
    }

    #[tokio::test]
    async fn latest_policy_keeps_greatest_versions() {
        let f = Fixture::new();
        for v in [1, 3, 5, 7] {
            f.put_version("resnet", v);
        }
        f.manager
            .load_config(f.config_for(
                "resnet",
                r#", "model_version_policy": {"latest": {"num_versions": 2}}"#,
            ))
            .await
            .unwrap();

        let model = f.manager.get_model("resnet").unwrap();
        assert_eq!(model.tracked_versions(), BTreeSet::from([5, 7]));
        assert_eq!(f.engine.loads(), 2);
    }

    #[tokio::test]
    async fn version_removed_from_disk_is_retired() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.put_version("resnet", 2);
        f.manager
            .load_config(f.config_for(
                "resnet",
                r#", "model_version_policy": {"all": {}}"#,
            ))
            .await
            .unwrap();
        let model = f.manager.get_model("resnet").unwrap();
        assert_eq!(model.tracked_versions(), BTreeSet::from([1, 2]));

        f.drop_version("resnet", 2);
        f.manager.reconcile().await.unwrap();
        assert_eq!(model.tracked_versions(), BTreeSet::from([1]));
        assert_eq!(model.default_version(), Some(1));
    }

    #[tokio::test]
    async fn model_removed_from_config_is_retired() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.manager
            .load_config(f.config_for("resnet", ""))
            .await
            .unwrap();

        f.manager.load_config(ServerConfig::default()).await.unwrap();
        let err = f.manager.find_model_instance("resnet", None).unwrap_err();
        assert!(matches!(err, Status::ModelVersionMissing { .. }));
    }

    #[tokio::test]
    async fn missing_base_path_reported_and_retried() {
        let f = Fixture::new();
        let config = f.config_for("ghost", "");
        let err = f.manager.load_config(config).await.unwrap_err();
        assert!(matches!(err, Status::PathInvalid { .. }));

        // The next cycle finds the repository populated.
        f.put_version("ghost", 1);
        f.manager.reconcile().await.unwrap();
        assert!(f.manager.find_model_instance("ghost", None).is_ok());
    }

    #[tokio::test]
    async fn failed_load_does_not_block_other_versions() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.put_version("resnet", 2);
        let config = f.config_for(
            "resnet",
            r#", "model_version_policy": {"all": {}}"#,
        );
        f.manager.load_config(config.clone()).await.unwrap();

        // v3 appears while the backend rejects loads: only v3 fails.
        f.engine.set_failing("resnet", true);
        f.put_version("resnet", 3);
        let err = f.manager.reconcile().await.unwrap_err();
        assert!(matches!(err, Status::NetworkNotLoaded { .. }));
        f.engine.set_failing("resnet", false);

        // v1 and v2 still serve; v3 is visible as LOADING_FAILED.
        assert!(f.manager.find_model_instance("resnet", Some(1)).is_ok());
        assert!(f.manager.find_model_instance("resnet", Some(2)).is_ok());
        let err = f.manager.find_model_instance("resnet", Some(3)).unwrap_err();
        assert!(matches!(err, Status::ModelVersionNotLoadedAnymore { .. }));

        // Next cycle does not silently retry the backend failure.
        f.manager.reconcile().await.unwrap();
        let model = f.manager.get_model("resnet").unwrap();
        let v3 = model.get_instance_by_version(3).unwrap();
        assert_eq!(v3.state(), ModelInstanceState::LoadingFailed);
    }

    #[tokio::test]
    async fn watcher_picks_up_new_versions() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        let config_path = f.dir.path().join("config.json");
        let doc = format!(
            r#"{{"model_config_list": [{{"config": {{"name": "resnet", "base_path": "{}"}}}}]}}"#,
            f.base_path("resnet").display()
        );
        std::fs::write(&config_path, doc).unwrap();

        f.manager.load_config_file(&config_path).await.unwrap();
        f.manager.start_watcher(1);

        f.put_version("resnet", 2);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok((instance, _guard)) = f.manager.find_model_instance("resnet", None)
                && instance.version() == 2
            {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "watcher never loaded version 2"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        f.manager.stop().await;
    }

    #[tokio::test]
    async fn stop_retires_everything() {
        let f = Fixture::new();
        f.put_version("a", 1);
        f.put_version("b", 1);
        let doc = format!(
            r#"{{"model_config_list": [
                {{"config": {{"name": "a", "base_path": "{}"}}}},
                {{"config": {{"name": "b", "base_path": "{}"}}}}
            ]}}"#,
            f.base_path("a").display(),
            f.base_path("b").display()
        );
        f.manager
            .load_config(ServerConfig::from_json(&doc).unwrap())
            .await
            .unwrap();
        f.manager.start_watcher(1);

        f.manager.stop().await;
        for name in ["a", "b"] {
            let model = f.manager.get_model(name).unwrap();
            for instance in model.instances() {
                assert_eq!(instance.state(), ModelInstanceState::End);
                assert_eq!(instance.in_flight_count(), 0);
                assert!(!instance.has_network());
            }
        }
    }

    #[tokio::test]
    async fn wait_variant_rides_out_a_reload() {
        let f = Fixture::new();
        f.put_version("resnet", 1);
        f.manager
            .load_config(f.config_for("resnet", ""))
            .await
            .unwrap();

        f.engine.set_load_delay(Duration::from_millis(100));
        let reloader = {
            let model = f.manager.get_model("resnet").unwrap();
            let config = f.config_for("resnet", r#", "nireq": 2"#);
            tokio::spawn(async move {
                let instance = model.get_instance_by_version(1).unwrap();
                instance
                    .reload(config.model_config("resnet").unwrap().clone())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Immediate resolve fails fast; the waiting variant rides it out.
        let err = f.manager.find_model_instance("resnet", Some(1)).unwrap_err();
        assert!(matches!(err, Status::ModelVersionNotLoadedYet { .. }));

        let (instance, _guard) = f
            .manager
            .find_model_instance_with_timeout("resnet", Some(1), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(instance.config().nireq, 2);
        reloader.await.unwrap().unwrap();
    }
}
