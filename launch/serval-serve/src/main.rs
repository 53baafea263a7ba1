// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! serval-serve: reconciliation daemon for a versioned model repository.
//!
//! Loads a configuration document, brings the configured models and
//! pipelines up against the repository on disk, then keeps reconciling on an
//! interval until interrupted. Inference transports attach through the
//! library's lookup surface; this binary hosts the lifecycle only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use serval_runtime::{Runtime, RuntimeConfig};
use serval_serving::ModelManager;
use serval_serving::backend::InferenceEngine;
use serval_serving::backend::mock::MockEngine;
use serval_serving::filesystem::LocalFileSystem;

#[derive(Parser, Debug)]
#[command(name = "serval-serve", version, about)]
struct Flags {
    /// Path to the configuration document.
    #[arg(long, env = "SERVAL_CONFIG_PATH")]
    config_path: PathBuf,

    /// Repository poll interval in seconds; 0 disables the watcher.
    #[arg(long, default_value_t = 1)]
    watch_interval: u64,

    /// Inference engine to bind. Only the metadata-only mocker ships in
    /// this build; hardware engines link in their own launcher.
    #[arg(long, default_value = "mocker")]
    engine: String,
}

fn engine_for(name: &str) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    match name {
        "mocker" => Ok(Arc::new(MockEngine::new())),
        other => anyhow::bail!("unknown engine '{other}', expected one of: mocker"),
    }
}

async fn run(flags: Flags) -> anyhow::Result<()> {
    let engine = engine_for(&flags.engine)?;
    let manager = Arc::new(ModelManager::new(engine, Arc::new(LocalFileSystem)));

    manager
        .load_config_file(&flags.config_path)
        .await
        .with_context(|| format!("loading {}", flags.config_path.display()))?;
    manager.start_watcher(flags.watch_interval);
    tracing::info!(
        config_path = %flags.config_path.display(),
        models = ?manager.model_names(),
        pipelines = ?manager.pipeline_factory().definition_names(),
        "serval-serve is up"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, draining");
    let grace = Duration::from_secs(RuntimeConfig::from_settings()?.graceful_shutdown_timeout);
    if tokio::time::timeout(grace, manager.stop()).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "Drain did not finish within the grace period");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    serval_runtime::logging::init();
    let flags = Flags::parse();
    let runtime = Runtime::from_settings()?;
    let outcome = runtime.block_on(run(flags));
    runtime.shutdown();
    outcome
}
