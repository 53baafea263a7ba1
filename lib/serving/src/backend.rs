// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Abstract inference backend.
//!
//! The serving core treats the backend as an opaque capability set: it loads
//! a serialized network description plus weights into a reloadable
//! [LoadedNetwork] and executes inference requests against it. Concrete
//! engines (hardware toolkits, remote executors) live outside this crate;
//! [mock::MockEngine] ships here for tests and the `mocker` launch target.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BatchSize, ShapeSpec};
use crate::tensor::{TensorInfoMap, TensorMap};

pub mod mock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("network load failed: {0}")]
    LoadFailed(String),

    #[error("reshape failed: {0}")]
    ReshapeFailed(String),

    #[error("inference failed: {0}")]
    InferFailed(String),
}

/// The on-disk artifacts of one model version, as enumerated by the
/// filesystem adapter. The backend decides which entries it understands.
#[derive(Debug, Clone)]
pub struct NetworkFiles {
    /// The version directory.
    pub base: PathBuf,
    /// File names inside `base`.
    pub files: Vec<String>,
}

/// Factory for [LoadedNetwork] handles.
#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    /// Load a network from `files` onto the selected device, applying any
    /// fixed shape and batch overrides from the model configuration.
    async fn load_network(
        &self,
        files: &NetworkFiles,
        target_device: &str,
        plugin_config: &HashMap<String, String>,
        shape: &ShapeSpec,
        batch_size: &BatchSize,
    ) -> Result<Arc<dyn LoadedNetwork>, BackendError>;
}

/// One loaded, executable network. Declared IO may change across
/// [LoadedNetwork::reshape] calls, so accessors return owned maps.
#[async_trait]
pub trait LoadedNetwork: std::fmt::Debug + Send + Sync + 'static {
    fn inputs(&self) -> TensorInfoMap;

    fn outputs(&self) -> TensorInfoMap;

    /// Backend-chosen concurrent request count, used when the model config
    /// leaves `nireq` at 0.
    fn optimal_request_count(&self) -> usize {
        1
    }

    /// Reconfigure the network to new input dimensions.
    async fn reshape(&self, new_shapes: &HashMap<String, Vec<i64>>) -> Result<(), BackendError>;

    fn create_infer_request(&self) -> Box<dyn InferRequest>;
}

/// A single inference slot against one [LoadedNetwork].
#[async_trait]
pub trait InferRequest: Send {
    async fn infer(&mut self, inputs: &TensorMap) -> Result<TensorMap, BackendError>;
}
