// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Registry of validated pipeline definitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::PipelineConfig;
use crate::manager::ModelManager;
use crate::pipeline::{Pipeline, PipelineDefinition};
use crate::status::Status;
use crate::tensor::TensorMap;

#[derive(Default)]
pub struct PipelineFactory {
    definitions: RwLock<HashMap<String, Arc<PipelineDefinition>>>,
}

impl PipelineFactory {
    pub fn new() -> PipelineFactory {
        PipelineFactory::default()
    }

    pub fn definition_exists(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<Arc<PipelineDefinition>> {
        self.definitions.read().get(name).cloned()
    }

    pub fn definition_names(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    /// Validate and publish a new definition. Duplicate names are rejected;
    /// reconciliation replaces changed definitions through
    /// [PipelineFactory::reconcile] instead.
    pub fn create_definition(
        &self,
        definition: PipelineDefinition,
        manager: &ModelManager,
    ) -> Result<(), Status> {
        if self.definition_exists(definition.name()) {
            return Err(Status::PipelineDefinitionAlreadyExists {
                pipeline: definition.name().to_string(),
            });
        }
        definition.validate(manager)?;
        self.definitions
            .write()
            .insert(definition.name().to_string(), Arc::new(definition));
        Ok(())
    }

    pub fn retire_definition(&self, name: &str) -> Result<(), Status> {
        self.definitions
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Status::PipelineDefinitionNameMissing {
                pipeline: name.to_string(),
            })
    }

    pub fn retire_all(&self) {
        self.definitions.write().clear();
    }

    /// Materialize a per-request pipeline by definition name.
    pub fn create(
        &self,
        name: &str,
        request: TensorMap,
        manager: &ModelManager,
    ) -> Result<Pipeline, Status> {
        let definition = self
            .definition(name)
            .ok_or_else(|| Status::PipelineDefinitionNameMissing {
                pipeline: name.to_string(),
            })?;
        definition.create(request, manager)
    }

    /// Bring the published set into agreement with the configured list.
    ///
    /// Unchanged definitions are left untouched, changed ones are
    /// re-validated and replaced (the previous definition stays published
    /// when the replacement fails validation), and definitions no longer
    /// configured are retired. Failures are reported but do not stop the
    /// rest of the list from reconciling.
    pub fn reconcile(
        &self,
        configs: &[PipelineConfig],
        manager: &ModelManager,
    ) -> Result<(), Status> {
        let mut first_error = None;
        let mut configured: HashSet<String> = HashSet::with_capacity(configs.len());

        for config in configs {
            configured.insert(config.name.clone());
            let definition = match PipelineDefinition::from_config(config) {
                Ok(definition) => definition,
                Err(status) => {
                    tracing::error!(pipeline = %config.name, %status, "Rejecting pipeline configuration");
                    first_error.get_or_insert(status);
                    continue;
                }
            };

            if let Some(existing) = self.definition(definition.name())
                && *existing == definition
            {
                continue;
            }

            match definition.validate(manager) {
                Ok(()) => {
                    self.definitions
                        .write()
                        .insert(definition.name().to_string(), Arc::new(definition));
                }
                Err(status) => {
                    tracing::error!(pipeline = %config.name, %status, "Pipeline definition failed validation");
                    first_error.get_or_insert(status);
                }
            }
        }

        let stale: Vec<String> = self
            .definitions
            .read()
            .keys()
            .filter(|name| !configured.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            tracing::info!(pipeline = %name, "Retiring pipeline removed from configuration");
            let _ = self.retire_definition(&name);
        }

        match first_error {
            None => Ok(()),
            Some(status) => Err(status),
        }
    }
}
