// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default maximum number of blocking threads.
const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

/// Runtime configuration
/// Defines the configuration for the tokio runtimes backing the server.
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct RuntimeConfig {
    /// Number of async worker threads.
    /// If set to 1, the runtime will run in single-threaded mode.
    /// Set this at runtime with environment variable SERVAL_RUNTIME_NUM_WORKER_THREADS.
    /// Defaults to number of cores.
    #[validate(range(min = 1))]
    #[builder(default)]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub num_worker_threads: Option<usize>,

    /// Maximum number of blocking threads, must be greater than 0.
    /// Set this at runtime with environment variable SERVAL_RUNTIME_MAX_BLOCKING_THREADS.
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_MAX_BLOCKING_THREADS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub max_blocking_threads: usize,

    /// Grace period, in seconds, given to in-flight work when the process
    /// shuts down. Set with SERVAL_RUNTIME_GRACEFUL_SHUTDOWN_TIMEOUT.
    #[builder(default = "default_graceful_shutdown_timeout()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub graceful_shutdown_timeout: u64,
}

fn default_graceful_shutdown_timeout() -> u64 {
    if cfg!(debug_assertions) {
        1 // Debug build: 1 second
    } else {
        30 // Release build: 30 seconds
    }
}

impl RuntimeConfigBuilder {
    pub fn build(&self) -> Result<RuntimeConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Instantiate from defaults merged with `SERVAL_RUNTIME_*` environment
    /// variables, highest priority last.
    pub fn from_settings() -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Env::prefixed("SERVAL_RUNTIME_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn single_threaded() -> RuntimeConfig {
        RuntimeConfig {
            num_worker_threads: Some(1),
            max_blocking_threads: 1,
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
        }
    }

    /// Create a tokio runtime from this configuration.
    pub fn create_runtime(&self) -> Result<tokio::runtime::Runtime> {
        let workers = self
            .num_worker_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |v| v.get()));
        let mut builder = if workers == 1 {
            tokio::runtime::Builder::new_current_thread()
        } else {
            let mut b = tokio::runtime::Builder::new_multi_thread();
            b.worker_threads(workers);
            b
        };
        builder
            .max_blocking_threads(self.max_blocking_threads)
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            num_worker_threads: None,
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
        }
    }
}
