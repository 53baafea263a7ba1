// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serval runtime
//!
//! Ambient concerns shared by every serval crate: construction of the tokio
//! runtimes, environment-driven configuration and logging setup.

use std::sync::Arc;

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

mod config;
pub use config::RuntimeConfig;

pub mod logging;

pub use tokio_util::sync::CancellationToken;

/// Types of tokio runtimes that can back a serval [Runtime].
#[derive(Clone)]
enum RuntimeType {
    Shared(Arc<tokio::runtime::Runtime>),
    External(tokio::runtime::Handle),
}

impl RuntimeType {
    fn handle(&self) -> tokio::runtime::Handle {
        match self {
            RuntimeType::Shared(rt) => rt.handle().clone(),
            RuntimeType::External(handle) => handle.clone(),
        }
    }
}

/// Process-local [Runtime] which provides access to the executor and the
/// root cancellation token from which all shutdown tokens are derived.
#[derive(Clone)]
pub struct Runtime {
    id: Arc<String>,
    primary: RuntimeType,
    cancellation_token: CancellationToken,
}

impl Runtime {
    fn new(runtime: RuntimeType) -> Runtime {
        Runtime {
            id: Arc::new(uuid::Uuid::new_v4().to_string()),
            primary: runtime,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Build a [Runtime] from environment settings (`SERVAL_RUNTIME_*`).
    pub fn from_settings() -> Result<Runtime> {
        let config = RuntimeConfig::from_settings()?;
        Ok(Runtime::new(RuntimeType::Shared(Arc::new(
            config.create_runtime()?,
        ))))
    }

    /// Build a [Runtime] on a single-threaded executor. Used by tests and
    /// small command-line tools.
    pub fn single_threaded() -> Result<Runtime> {
        let config = RuntimeConfig::single_threaded();
        Ok(Runtime::new(RuntimeType::Shared(Arc::new(
            config.create_runtime()?,
        ))))
    }

    /// Adopt the tokio runtime the caller is already executing on.
    pub fn from_current() -> Result<Runtime> {
        Ok(Runtime::new(RuntimeType::External(
            tokio::runtime::Handle::current(),
        )))
    }

    pub fn id(&self) -> String {
        self.id.as_ref().clone()
    }

    /// Handle on which background tasks are spawned.
    pub fn primary(&self) -> tokio::runtime::Handle {
        self.primary.handle()
    }

    /// Drive a future to completion on the primary runtime. Callable only
    /// from synchronous code, e.g. a binary's `main`.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match &self.primary {
            RuntimeType::Shared(rt) => rt.block_on(future),
            RuntimeType::External(handle) => handle.block_on(future),
        }
    }

    /// The root [CancellationToken] for this runtime.
    pub fn primary_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Create a child [CancellationToken] tied to the runtime's lifetime.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    /// Cancel the root token. All children observe the cancellation.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}
