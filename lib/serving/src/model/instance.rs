// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One loaded version of one model.
//!
//! A [ModelInstance] owns the backend network handle and a bounded pool of
//! inference slots, and moves through a small state machine:
//!
//! ```text
//! NEW ── load() ──▶ LOADING ── ok ──▶ AVAILABLE ── unload() ──▶ UNLOADING ─▶ END
//!                     │                   │
//!                     │                   └── reload() ──▶ LOADING
//!                     └── fail ──▶ LOADING_FAILED ── reload() ──▶ LOADING
//! ```
//!
//! Only `AVAILABLE` accepts inference requests. Liveness is accounted on an
//! atomic in-flight counter: [ModelInstance::acquire_liveness_guard] is a
//! wait-free increment-then-check, and unload blocks until the counter
//! drains to zero, so no instance is ever destroyed under an active request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::backend::{BackendError, InferenceEngine, LoadedNetwork, NetworkFiles};
use crate::config::ModelConfig;
use crate::filesystem::FileSystem;
use crate::status::Status;
use crate::tensor::{TensorInfoMap, TensorMap};

pub type ModelVersion = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModelInstanceState {
    New = 0,
    Loading = 1,
    Available = 2,
    LoadingFailed = 3,
    Unloading = 4,
    End = 5,
}

impl ModelInstanceState {
    fn from_u8(value: u8) -> ModelInstanceState {
        match value {
            0 => ModelInstanceState::New,
            1 => ModelInstanceState::Loading,
            2 => ModelInstanceState::Available,
            3 => ModelInstanceState::LoadingFailed,
            4 => ModelInstanceState::Unloading,
            _ => ModelInstanceState::End,
        }
    }
}

pub struct ModelInstance {
    name: String,
    version: ModelVersion,

    state: AtomicU8,
    state_changed: Notify,

    /// In-flight users. Non-zero forbids destruction of the network.
    in_flight: AtomicUsize,
    drained: Notify,

    /// Serializes load/reload/unload transitions.
    transition: Mutex<()>,

    config: parking_lot::RwLock<ModelConfig>,
    network: parking_lot::RwLock<Option<Arc<dyn LoadedNetwork>>>,
    inputs: parking_lot::RwLock<TensorInfoMap>,
    outputs: parking_lot::RwLock<TensorInfoMap>,

    /// Inference slot pool, rebuilt on every successful (re)load.
    slots: parking_lot::RwLock<Option<Arc<Semaphore>>>,

    /// Self-reshape gate: inference holds it shared, a reshape exclusively.
    reshape_gate: tokio::sync::RwLock<()>,

    engine: Arc<dyn InferenceEngine>,
    fs: Arc<dyn FileSystem>,
}

/// Keeps a [ModelInstance] from being destroyed while a request uses it.
pub struct LivenessGuard {
    instance: Arc<ModelInstance>,
}

impl LivenessGuard {
    pub fn instance(&self) -> &Arc<ModelInstance> {
        &self.instance
    }
}

impl std::fmt::Debug for LivenessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessGuard").finish_non_exhaustive()
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        if self.instance.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.instance.drained.notify_waiters();
        }
    }
}

impl ModelInstance {
    pub fn new(
        name: &str,
        version: ModelVersion,
        config: ModelConfig,
        engine: Arc<dyn InferenceEngine>,
        fs: Arc<dyn FileSystem>,
    ) -> Arc<ModelInstance> {
        Arc::new(ModelInstance {
            name: name.to_string(),
            version,
            state: AtomicU8::new(ModelInstanceState::New as u8),
            state_changed: Notify::new(),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            transition: Mutex::new(()),
            config: parking_lot::RwLock::new(config),
            network: parking_lot::RwLock::new(None),
            inputs: parking_lot::RwLock::new(TensorInfoMap::new()),
            outputs: parking_lot::RwLock::new(TensorInfoMap::new()),
            slots: parking_lot::RwLock::new(None),
            reshape_gate: tokio::sync::RwLock::new(()),
            engine,
            fs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> ModelVersion {
        self.version
    }

    pub fn state(&self) -> ModelInstanceState {
        ModelInstanceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_available(&self) -> bool {
        self.state() == ModelInstanceState::Available
    }

    pub fn config(&self) -> ModelConfig {
        self.config.read().clone()
    }

    /// Declared input tensors of the loaded network.
    pub fn inputs(&self) -> TensorInfoMap {
        self.inputs.read().clone()
    }

    /// Declared output tensors of the loaded network.
    pub fn outputs(&self) -> TensorInfoMap {
        self.outputs.read().clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_network(&self) -> bool {
        self.network.read().is_some()
    }

    fn set_state(&self, state: ModelInstanceState) {
        self.state.store(state as u8, Ordering::SeqCst);
        self.state_changed.notify_waiters();
    }

    /// Atomic check-and-increment of the in-flight counter. Succeeds iff the
    /// instance is `AVAILABLE`; the guard's destruction decrements.
    pub fn acquire_liveness_guard(self: &Arc<Self>) -> Result<LivenessGuard, Status> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state != ModelInstanceState::Available {
            if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.drained.notify_waiters();
            }
            return Err(self.unavailable_status(state));
        }
        Ok(LivenessGuard {
            instance: Arc::clone(self),
        })
    }

    fn unavailable_status(&self, state: ModelInstanceState) -> Status {
        match state {
            ModelInstanceState::New | ModelInstanceState::Loading => {
                Status::ModelVersionNotLoadedYet {
                    name: self.name.clone(),
                    version: self.version,
                }
            }
            _ => Status::ModelVersionNotLoadedAnymore {
                name: self.name.clone(),
                version: self.version,
            },
        }
    }

    /// Acquire a guard, waiting up to `timeout` for an in-progress load or
    /// reload to finish. Terminal states fail immediately.
    pub async fn wait_for_available(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<LivenessGuard, Status> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Create the waiter before checking state, so a transition
            // between the check and the await is not missed.
            let notified = self.state_changed.notified();
            match self.acquire_liveness_guard() {
                Ok(guard) => return Ok(guard),
                Err(status @ Status::ModelVersionNotLoadedYet { .. }) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(status);
                    }
                }
                Err(status) => return Err(status),
            }
        }
    }

    async fn wait_for_drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn load_network(&self, config: &ModelConfig) -> Result<Arc<dyn LoadedNetwork>, Status> {
        let version_dir = config.version_path(self.version);
        let path_invalid = || Status::PathInvalid {
            path: version_dir.display().to_string(),
        };

        let info = self
            .fs
            .stat(&version_dir)
            .await
            .map_err(|_| path_invalid())?;
        if !info.is_directory {
            return Err(path_invalid());
        }
        let files = self.fs.list(&version_dir).await.map_err(|_| path_invalid())?;
        if files.is_empty() {
            return Err(path_invalid());
        }

        self.engine
            .load_network(
                &NetworkFiles {
                    base: version_dir,
                    files,
                },
                &config.target_device,
                &config.plugin_config,
                &config.shape,
                &config.batch_size,
            )
            .await
            .map_err(|e| match e {
                BackendError::ReshapeFailed(reason) => Status::ReshapeFailed {
                    name: self.name.clone(),
                    version: self.version,
                    reason,
                },
                other => Status::NetworkNotLoaded {
                    name: self.name.clone(),
                    version: self.version,
                    reason: other.to_string(),
                },
            })
    }

    fn install_network(&self, network: Arc<dyn LoadedNetwork>, config: ModelConfig) {
        let permits = if config.nireq > 0 {
            config.nireq as usize
        } else {
            network.optimal_request_count().max(1)
        };
        *self.inputs.write() = network.inputs();
        *self.outputs.write() = network.outputs();
        *self.config.write() = config;
        *self.network.write() = Some(network);
        *self.slots.write() = Some(Arc::new(Semaphore::new(permits)));
    }

    /// Load the instance from its version directory. On success the
    /// declared IO maps are published and the state becomes `AVAILABLE`.
    pub async fn load(&self, config: ModelConfig) -> Result<(), Status> {
        let _transition = self.transition.lock().await;
        self.set_state(ModelInstanceState::Loading);
        tracing::info!(model = %self.name, version = self.version, "Loading model version");

        match self.load_network(&config).await {
            Ok(network) => {
                self.install_network(network, config);
                self.set_state(ModelInstanceState::Available);
                tracing::info!(model = %self.name, version = self.version, "Model version available");
                Ok(())
            }
            Err(status) => {
                *self.config.write() = config;
                self.set_state(ModelInstanceState::LoadingFailed);
                tracing::error!(model = %self.name, version = self.version, %status, "Loading model version failed");
                Err(status)
            }
        }
    }

    /// Replace the loaded network with one loaded under `config`.
    ///
    /// Atomic from the caller's perspective: on failure the previous network
    /// and configuration stay in force. In-flight requests hold liveness
    /// guards, so the swap waits for them to finish; new requests block in
    /// [ModelInstance::wait_for_available] or fail fast with
    /// `MODEL_VERSION_NOT_LOADED_YET`.
    pub async fn reload(&self, config: ModelConfig) -> Result<(), Status> {
        let _transition = self.transition.lock().await;
        let previous_state = self.state();
        let previous_config = self.config();

        self.set_state(ModelInstanceState::Loading);
        tracing::info!(model = %self.name, version = self.version, "Reloading model version");
        self.wait_for_drain().await;

        match self.load_network(&config).await {
            Ok(network) => {
                self.install_network(network, config);
                self.set_state(ModelInstanceState::Available);
                Ok(())
            }
            Err(status) => {
                // Old network untouched; fall back to what was in force.
                *self.config.write() = previous_config;
                if previous_state == ModelInstanceState::Available && self.has_network() {
                    self.set_state(ModelInstanceState::Available);
                } else {
                    self.set_state(ModelInstanceState::LoadingFailed);
                }
                tracing::error!(model = %self.name, version = self.version, %status, "Reloading model version failed");
                Err(status)
            }
        }
    }

    /// Retire the instance: refuse new requests, wait for the in-flight
    /// counter to drain, release the network, enter `END`.
    pub async fn unload(&self) {
        let _transition = self.transition.lock().await;
        if self.state() == ModelInstanceState::End {
            return;
        }
        self.set_state(ModelInstanceState::Unloading);
        tracing::info!(model = %self.name, version = self.version, "Unloading model version");
        self.wait_for_drain().await;

        *self.network.write() = None;
        *self.slots.write() = None;
        self.inputs.write().clear();
        self.outputs.write().clear();
        self.set_state(ModelInstanceState::End);
    }

    /// Input dimensions that differ from the declared ones, or None when the
    /// request matches the current network exactly.
    fn pending_reshape(
        &self,
        request: &TensorMap,
    ) -> Result<Option<HashMap<String, Vec<i64>>>, Status> {
        let declared = self.inputs.read();
        let mut changed = HashMap::new();
        for (name, info) in declared.iter() {
            let tensor = request
                .get(name)
                .ok_or_else(|| self.infer_error(format!("request is missing input {name}")))?;
            if tensor.datatype != info.datatype {
                return Err(self.infer_error(format!("unexpected datatype of input {name}")));
            }
            if tensor.shape != info.shape {
                changed.insert(name.clone(), tensor.shape.clone());
            }
        }
        Ok((!changed.is_empty()).then_some(changed))
    }

    fn infer_error(&self, reason: String) -> Status {
        Status::InferenceFailed {
            name: self.name.clone(),
            version: self.version,
            reason,
        }
    }

    /// Execute one inference. The caller must hold a [LivenessGuard].
    ///
    /// At most `nireq` requests run concurrently; excess callers queue FIFO
    /// on the slot pool, bounded by `deadline` when one is given. When the
    /// configuration declares an auto batch size or shape, a mismatching
    /// request triggers a self-reshape which serializes against all other
    /// requests on this instance.
    pub async fn infer(
        &self,
        request: &TensorMap,
        deadline: Option<Duration>,
    ) -> Result<TensorMap, Status> {
        let slots = self.slots.read().clone().ok_or_else(|| {
            Status::ModelVersionNotLoadedAnymore {
                name: self.name.clone(),
                version: self.version,
            }
        })?;
        let _permit = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, slots.acquire_owned())
                .await
                .map_err(|_| Status::InferSlotDeadlineExceeded {
                    name: self.name.clone(),
                    version: self.version,
                })?,
            None => slots.acquire_owned().await,
        }
        .map_err(|_| Status::ModelVersionNotLoadedAnymore {
            name: self.name.clone(),
            version: self.version,
        })?;

        let network = self.network.read().clone().ok_or_else(|| {
            Status::ModelVersionNotLoadedAnymore {
                name: self.name.clone(),
                version: self.version,
            }
        })?;

        if let Some(new_shapes) = self.pending_reshape(request)? {
            let config = self.config();
            if !config.is_dynamic() {
                return Err(self.infer_error(
                    "request dimensions do not match the fixed network dimensions".to_string(),
                ));
            }
            // Exclusive: drain concurrent requests, reconfigure, resume.
            let _exclusive = self.reshape_gate.write().await;
            if self.pending_reshape(request)?.is_some() {
                network
                    .reshape(&new_shapes)
                    .await
                    .map_err(|e| Status::ReshapeFailed {
                        name: self.name.clone(),
                        version: self.version,
                        reason: e.to_string(),
                    })?;
                *self.inputs.write() = network.inputs();
                *self.outputs.write() = network.outputs();
                tracing::debug!(model = %self.name, version = self.version, "Self-reshape applied");
            }
            let mut infer_request = network.create_infer_request();
            return infer_request
                .infer(request)
                .await
                .map_err(|e| self.infer_error(e.to_string()));
        }

        let _shared = self.reshape_gate.read().await;
        let mut infer_request = network.create_infer_request();
        infer_request
            .infer(request)
            .await
            .map_err(|e| self.infer_error(e.to_string()))
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockEngine, MockNetworkSpec};
    use crate::config::{BatchSize, ShapeSpec};
    use crate::filesystem::LocalFileSystem;
    use crate::tensor::{DataType, Tensor, TensorInfo};

    fn setup() {
        serval_runtime::logging::init();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: MockEngine,
        config: ModelConfig,
    }

    fn fixture(model: &str, versions: &[u64]) -> Fixture {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(model);
        for v in versions {
            let vdir = base.join(v.to_string());
            std::fs::create_dir_all(&vdir).unwrap();
            std::fs::write(vdir.join("graph.xml"), b"<graph/>").unwrap();
            std::fs::write(vdir.join("weights.bin"), b"\0\0").unwrap();
        }
        let config: ModelConfig = serde_json::from_str(&format!(
            r#"{{"name": "{model}", "base_path": "{}"}}"#,
            base.display()
        ))
        .unwrap();
        Fixture {
            _dir: dir,
            engine: MockEngine::new(),
            config,
        }
    }

    fn instance(fixture: &Fixture, version: u64) -> Arc<ModelInstance> {
        ModelInstance::new(
            &fixture.config.name,
            version,
            fixture.config.clone(),
            Arc::new(fixture.engine.clone()),
            Arc::new(LocalFileSystem),
        )
    }

    fn request_for(instance: &ModelInstance) -> TensorMap {
        instance
            .inputs()
            .iter()
            .map(|(name, info)| (name.clone(), Tensor::zeros(info)))
            .collect()
    }

    #[tokio::test]
    async fn load_success_publishes_io_and_state() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);
        assert_eq!(inst.state(), ModelInstanceState::New);

        inst.load(f.config.clone()).await.unwrap();
        assert_eq!(inst.state(), ModelInstanceState::Available);
        assert!(inst.inputs().contains_key("data"));
        assert!(inst.outputs().contains_key("prob"));
    }

    #[tokio::test]
    async fn load_missing_version_dir_is_path_invalid() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 9);
        let err = inst.load(f.config.clone()).await.unwrap_err();
        assert!(matches!(err, Status::PathInvalid { .. }));
        assert_eq!(inst.state(), ModelInstanceState::LoadingFailed);
    }

    #[tokio::test]
    async fn load_backend_failure_is_network_not_loaded() {
        let f = fixture("resnet", &[1]);
        f.engine.set_failing("resnet", true);
        let inst = instance(&f, 1);
        let err = inst.load(f.config.clone()).await.unwrap_err();
        assert!(matches!(err, Status::NetworkNotLoaded { .. }));
        assert_eq!(inst.state(), ModelInstanceState::LoadingFailed);
    }

    #[tokio::test]
    async fn guard_states() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);

        // NEW rejects with not-loaded-yet
        let err = inst.acquire_liveness_guard().unwrap_err();
        assert!(matches!(err, Status::ModelVersionNotLoadedYet { .. }));

        inst.load(f.config.clone()).await.unwrap();
        let guard = inst.acquire_liveness_guard().unwrap();
        assert_eq!(inst.in_flight_count(), 1);
        drop(guard);
        assert_eq!(inst.in_flight_count(), 0);

        inst.unload().await;
        let err = inst.acquire_liveness_guard().unwrap_err();
        assert!(matches!(err, Status::ModelVersionNotLoadedAnymore { .. }));
    }

    #[tokio::test]
    async fn unload_waits_for_guard_release() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);
        inst.load(f.config.clone()).await.unwrap();

        let guard = inst.acquire_liveness_guard().unwrap();
        let unloader = {
            let inst = Arc::clone(&inst);
            tokio::spawn(async move { inst.unload().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!unloader.is_finished());
        assert_eq!(inst.state(), ModelInstanceState::Unloading);

        drop(guard);
        unloader.await.unwrap();
        assert_eq!(inst.state(), ModelInstanceState::End);
        assert!(!inst.has_network());
        assert_eq!(inst.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn reload_failure_preserves_old_network() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);
        inst.load(f.config.clone()).await.unwrap();
        let io_before = inst.inputs();

        let mut bad = f.config.clone();
        bad.shape = ShapeSpec::Named(HashMap::from([("nonexistent".to_string(), vec![1, 2])]));
        let err = inst.reload(bad).await.unwrap_err();
        assert!(matches!(err, Status::ReshapeFailed { .. }));

        // Old network and config stay in force.
        assert_eq!(inst.state(), ModelInstanceState::Available);
        assert_eq!(inst.inputs(), io_before);
        assert_eq!(inst.config(), f.config);
        assert!(inst.acquire_liveness_guard().is_ok());
    }

    #[tokio::test]
    async fn reload_waits_for_guards_then_swaps() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);
        inst.load(f.config.clone()).await.unwrap();
        let guard = inst.acquire_liveness_guard().unwrap();

        let mut new_config = f.config.clone();
        new_config.nireq = 3;
        let reloader = {
            let inst = Arc::clone(&inst);
            tokio::spawn(async move { inst.reload(new_config).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reloader.is_finished());

        drop(guard);
        reloader.await.unwrap().unwrap();
        assert_eq!(inst.state(), ModelInstanceState::Available);
        assert_eq!(inst.config().nireq, 3);
    }

    #[tokio::test]
    async fn wait_for_available_times_out_during_slow_load() {
        let f = fixture("resnet", &[1]);
        f.engine.set_load_delay(Duration::from_millis(200));
        let inst = instance(&f, 1);

        let loader = {
            let inst = Arc::clone(&inst);
            let config = f.config.clone();
            tokio::spawn(async move { inst.load(config).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = inst
            .wait_for_available(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Status::ModelVersionNotLoadedYet { .. }));

        let guard = inst.wait_for_available(Duration::from_secs(2)).await.unwrap();
        drop(guard);
        loader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn nireq_bounds_concurrency() {
        let f = fixture("resnet", &[1]);
        f.engine.set_infer_delay(Duration::from_millis(30));
        let mut config = f.config.clone();
        config.nireq = 2;
        let inst = instance(&f, 1);
        inst.load(config).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let inst = Arc::clone(&inst);
            tasks.push(tokio::spawn(async move {
                let _guard = inst.acquire_liveness_guard().unwrap();
                let request = request_for(&inst);
                inst.infer(&request, None).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(f.engine.max_concurrent_infers() <= 2);
        assert_eq!(f.engine.infers(), 6);
    }

    #[tokio::test]
    async fn fixed_model_rejects_mismatched_batch() {
        let f = fixture("resnet", &[1]);
        let inst = instance(&f, 1);
        inst.load(f.config.clone()).await.unwrap();

        let mut request = request_for(&inst);
        let grown = TensorInfo::new(DataType::Fp32, vec![4, 3, 4, 4]);
        request.insert("data".to_string(), Tensor::zeros(&grown));

        let err = inst.infer(&request, None).await.unwrap_err();
        assert!(matches!(err, Status::InferenceFailed { .. }));
        assert_eq!(f.engine.reshapes(), 0);
    }

    #[tokio::test]
    async fn auto_batch_triggers_self_reshape() {
        let f = fixture("resnet", &[1]);
        let mut config = f.config.clone();
        config.batch_size = BatchSize::Auto;
        let inst = instance(&f, 1);
        inst.load(config).await.unwrap();

        let grown = TensorInfo::new(DataType::Fp32, vec![4, 3, 4, 4]);
        let request = TensorMap::from([("data".to_string(), Tensor::zeros(&grown))]);
        inst.infer(&request, None).await.unwrap();
        assert_eq!(f.engine.reshapes(), 1);
        assert_eq!(inst.inputs()["data"].shape, vec![4, 3, 4, 4]);

        // Same dimensions again: no further reshape.
        inst.infer(&request, None).await.unwrap();
        assert_eq!(f.engine.reshapes(), 1);
    }

    #[tokio::test]
    async fn spec_declared_by_mock_engine_applies() {
        let f = fixture("det", &[1]);
        f.engine.set_spec(
            "det",
            MockNetworkSpec::new(
                &[("image", DataType::U8, &[1, 3, 64, 64])],
                &[("boxes", DataType::Fp32, &[1, 5]), ("scores", DataType::Fp32, &[1, 1])],
            ),
        );
        let inst = instance(&f, 1);
        inst.load(f.config.clone()).await.unwrap();
        assert_eq!(inst.outputs().len(), 2);
    }
}
