// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the serving core.
//!
//! Every distinguishing failure the registry, the loader and the pipeline
//! validator can report is a [Status] variant carrying the offending
//! identifier. Transport layers map these onto their wire status codes.

use crate::model::ModelVersion;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Status {
    // --- filesystem / loading ---
    #[error("model repository path is invalid: {path}")]
    PathInvalid { path: String },

    #[error("backend could not load network for model {name} version {version}: {reason}")]
    NetworkNotLoaded {
        name: String,
        version: ModelVersion,
        reason: String,
    },

    #[error("requested shape is incompatible for model {name} version {version}: {reason}")]
    ReshapeFailed {
        name: String,
        version: ModelVersion,
        reason: String,
    },

    // --- registry lookup ---
    #[error("model with requested name is not found: {name}")]
    ModelNameMissing { name: String },

    #[error("model {name} has no version matching the request (requested: {requested})")]
    ModelVersionMissing { name: String, requested: String },

    #[error("model {name} version {version} is not loaded yet")]
    ModelVersionNotLoadedYet { name: String, version: ModelVersion },

    #[error("model {name} version {version} is not loaded anymore")]
    ModelVersionNotLoadedAnymore { name: String, version: ModelVersion },

    // --- inference ---
    #[error("no free inference slot for model {name} version {version} within the deadline")]
    InferSlotDeadlineExceeded { name: String, version: ModelVersion },

    #[error("inference failed on model {name} version {version}: {reason}")]
    InferenceFailed {
        name: String,
        version: ModelVersion,
        reason: String,
    },

    // --- pipeline definition ---
    #[error("pipeline {pipeline} declares node name {node} more than once")]
    PipelineNodeNameDuplicate { pipeline: String, node: String },

    #[error("pipeline {pipeline} is missing an entry or exit node")]
    PipelineMissingEntryOrExit { pipeline: String },

    #[error("pipeline {pipeline} declares multiple entry nodes")]
    PipelineMultipleEntryNodes { pipeline: String },

    #[error("pipeline {pipeline} declares multiple exit nodes")]
    PipelineMultipleExitNodes { pipeline: String },

    #[error("pipeline {pipeline} node {node} depends on undeclared node {dependency}")]
    PipelineMissingDependency {
        pipeline: String,
        node: String,
        dependency: String,
    },

    #[error("pipeline {pipeline} edge into node {node} carries no tensor bindings")]
    PipelineDefinitionMissingDependencyMapping { pipeline: String, node: String },

    #[error("pipeline {pipeline} node {node} references missing output {output}")]
    InvalidMissingOutput {
        pipeline: String,
        node: String,
        output: String,
    },

    #[error("pipeline {pipeline} node {node} references missing input {input}")]
    InvalidMissingInput {
        pipeline: String,
        node: String,
        input: String,
    },

    #[error(
        "pipeline {pipeline} node {node} uses model {model} with a dynamic batch size or shape, which pipelines forbid"
    )]
    ForbiddenModelDynamicParameter {
        pipeline: String,
        node: String,
        model: String,
    },

    #[error("cycle found in pipeline {pipeline} involving nodes: {}", nodes.join(", "))]
    PipelineCycleFound {
        pipeline: String,
        nodes: Vec<String>,
    },

    #[error("pipeline {pipeline} contains nodes not connected to the entry-exit path")]
    PipelineContainsUnconnectedNodes { pipeline: String },

    #[error("pipeline definition already exists: {pipeline}")]
    PipelineDefinitionAlreadyExists { pipeline: String },

    #[error("pipeline definition with requested name is not found: {pipeline}")]
    PipelineDefinitionNameMissing { pipeline: String },

    // --- configuration ---
    #[error("configuration is invalid: {reason}")]
    ConfigInvalid { reason: String },

    #[error("invalid shape specification: {value}")]
    ShapeInvalid { value: String },

    #[error("invalid batch size specification: {value}")]
    BatchSizeInvalid { value: String },

    #[error("invalid model version policy: {reason}")]
    VersionPolicyInvalid { reason: String },

    #[error("filesystem error on {path}: {reason}")]
    Filesystem { path: String, reason: String },
}

impl Status {
    /// True for the lookup outcomes a caller may meaningfully retry after a
    /// reconciliation cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Status::ModelVersionNotLoadedYet { .. } | Status::InferSlotDeadlineExceeded { .. }
        )
    }
}
