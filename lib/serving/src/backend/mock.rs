// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mock inference engine.
//!
//! Backs the `mocker` launch target and the test suites. Networks are pure
//! metadata: inference returns zero-filled tensors shaped like the declared
//! outputs. Failure injection and call counters let tests observe exactly
//! which backend transitions the lifecycle layer performed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::backend::{BackendError, InferRequest, InferenceEngine, LoadedNetwork, NetworkFiles};
use crate::config::{BatchSize, ShapeSpec};
use crate::tensor::{DataType, Tensor, TensorInfo, TensorInfoMap, TensorMap};

/// Declared IO of one mock network.
#[derive(Debug, Clone)]
pub struct MockNetworkSpec {
    pub inputs: TensorInfoMap,
    pub outputs: TensorInfoMap,
}

impl Default for MockNetworkSpec {
    fn default() -> Self {
        MockNetworkSpec {
            inputs: HashMap::from([(
                "data".to_string(),
                TensorInfo::new(DataType::Fp32, vec![1, 3, 4, 4]),
            )]),
            outputs: HashMap::from([(
                "prob".to_string(),
                TensorInfo::new(DataType::Fp32, vec![1, 10]),
            )]),
        }
    }
}

impl MockNetworkSpec {
    pub fn new(inputs: &[(&str, DataType, &[i64])], outputs: &[(&str, DataType, &[i64])]) -> Self {
        let build = |decls: &[(&str, DataType, &[i64])]| {
            decls
                .iter()
                .map(|(name, dt, dims)| {
                    (name.to_string(), TensorInfo::new(*dt, dims.to_vec()))
                })
                .collect::<TensorInfoMap>()
        };
        MockNetworkSpec {
            inputs: build(inputs),
            outputs: build(outputs),
        }
    }
}

#[derive(Default, Debug)]
struct Counters {
    loads: AtomicUsize,
    reshapes: AtomicUsize,
    infers: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

#[derive(Debug)]
struct Inner {
    counters: Counters,
    specs: Mutex<HashMap<String, MockNetworkSpec>>,
    failing: Mutex<HashSet<String>>,
    load_delay: Mutex<Duration>,
    infer_delay: Mutex<Duration>,
    optimal_nireq: AtomicUsize,
}

/// Engine whose networks exist only as metadata.
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<Inner>,
}

impl Default for MockEngine {
    fn default() -> Self {
        MockEngine {
            inner: Arc::new(Inner {
                counters: Counters::default(),
                specs: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                load_delay: Mutex::new(Duration::ZERO),
                infer_delay: Mutex::new(Duration::ZERO),
                optimal_nireq: AtomicUsize::new(1),
            }),
        }
    }
}

impl MockEngine {
    pub fn new() -> MockEngine {
        MockEngine::default()
    }

    /// Declare the IO of networks loaded for `model` (matched against the
    /// name of the directory holding the version directories).
    pub fn set_spec(&self, model: &str, spec: MockNetworkSpec) {
        self.inner.specs.lock().insert(model.to_string(), spec);
    }

    /// While set, every load for `model` fails as if the device rejected it.
    pub fn set_failing(&self, model: &str, failing: bool) {
        let mut set = self.inner.failing.lock();
        if failing {
            set.insert(model.to_string());
        } else {
            set.remove(model);
        }
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.inner.load_delay.lock() = delay;
    }

    pub fn set_infer_delay(&self, delay: Duration) {
        *self.inner.infer_delay.lock() = delay;
    }

    pub fn set_optimal_nireq(&self, nireq: usize) {
        self.inner.optimal_nireq.store(nireq, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.inner.counters.loads.load(Ordering::SeqCst)
    }

    pub fn reshapes(&self) -> usize {
        self.inner.counters.reshapes.load(Ordering::SeqCst)
    }

    pub fn infers(&self) -> usize {
        self.inner.counters.infers.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently executing inferences.
    pub fn max_concurrent_infers(&self) -> usize {
        self.inner.counters.max_inflight.load(Ordering::SeqCst)
    }

    fn model_of(files: &NetworkFiles) -> String {
        files
            .base
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn apply_overrides(
        spec: &mut MockNetworkSpec,
        shape: &ShapeSpec,
        batch_size: &BatchSize,
    ) -> Result<(), BackendError> {
        match shape {
            ShapeSpec::FromNetwork | ShapeSpec::Auto => {}
            ShapeSpec::Fixed(dims) => {
                if spec.inputs.len() != 1 {
                    return Err(BackendError::ReshapeFailed(
                        "anonymous fixed shape requires a single-input network".to_string(),
                    ));
                }
                for info in spec.inputs.values_mut() {
                    info.shape = dims.clone();
                }
            }
            ShapeSpec::Named(shapes) => {
                for (input, dims) in shapes {
                    let info = spec.inputs.get_mut(input).ok_or_else(|| {
                        BackendError::ReshapeFailed(format!("network has no input {input}"))
                    })?;
                    info.shape = dims.clone();
                }
            }
        }
        if let BatchSize::Fixed(n) = batch_size {
            for info in spec.inputs.values_mut() {
                if let Some(first) = info.shape.first_mut() {
                    *first = *n as i64;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn load_network(
        &self,
        files: &NetworkFiles,
        _target_device: &str,
        _plugin_config: &HashMap<String, String>,
        shape: &ShapeSpec,
        batch_size: &BatchSize,
    ) -> Result<Arc<dyn LoadedNetwork>, BackendError> {
        let delay = *self.inner.load_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.counters.loads.fetch_add(1, Ordering::SeqCst);

        let model = Self::model_of(files);
        if self.inner.failing.lock().contains(&model) {
            return Err(BackendError::LoadFailed(format!(
                "device rejected network for {model}"
            )));
        }

        let mut spec = self
            .inner
            .specs
            .lock()
            .get(&model)
            .cloned()
            .unwrap_or_default();
        Self::apply_overrides(&mut spec, shape, batch_size)?;

        Ok(Arc::new(MockLoadedNetwork {
            spec: RwLock::new(spec),
            inner: Arc::clone(&self.inner),
        }))
    }
}

#[derive(Debug)]
struct MockLoadedNetwork {
    spec: RwLock<MockNetworkSpec>,
    inner: Arc<Inner>,
}

#[async_trait]
impl LoadedNetwork for MockLoadedNetwork {
    fn inputs(&self) -> TensorInfoMap {
        self.spec.read().inputs.clone()
    }

    fn outputs(&self) -> TensorInfoMap {
        self.spec.read().outputs.clone()
    }

    fn optimal_request_count(&self) -> usize {
        self.inner.optimal_nireq.load(Ordering::SeqCst)
    }

    async fn reshape(&self, new_shapes: &HashMap<String, Vec<i64>>) -> Result<(), BackendError> {
        self.inner.counters.reshapes.fetch_add(1, Ordering::SeqCst);
        let mut spec = self.spec.write();
        for (input, dims) in new_shapes {
            let info = spec.inputs.get_mut(input).ok_or_else(|| {
                BackendError::ReshapeFailed(format!("network has no input {input}"))
            })?;
            info.shape = dims.clone();
        }
        Ok(())
    }

    fn create_infer_request(&self) -> Box<dyn InferRequest> {
        Box::new(MockInferRequest {
            outputs: self.spec.read().outputs.clone(),
            inner: Arc::clone(&self.inner),
        })
    }
}

struct MockInferRequest {
    outputs: TensorInfoMap,
    inner: Arc<Inner>,
}

#[async_trait]
impl InferRequest for MockInferRequest {
    async fn infer(&mut self, _inputs: &TensorMap) -> Result<TensorMap, BackendError> {
        let counters = &self.inner.counters;
        let current = counters.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_inflight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.inner.infer_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .outputs
            .iter()
            .map(|(name, info)| (name.clone(), Tensor::zeros(info)))
            .collect();

        counters.inflight.fetch_sub(1, Ordering::SeqCst);
        counters.infers.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    }
}
