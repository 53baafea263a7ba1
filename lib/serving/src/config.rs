// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration document model.
//!
//! The server is driven by a JSON document listing per-model configurations
//! and optional pipeline definitions. [ModelConfig] is the immutable snapshot
//! of everything needed to load one version; reconciliation compares
//! snapshots for equality to decide whether a reload is required.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, de};

use crate::model::version_policy::ModelVersionPolicy;
use crate::status::Status;

fn default_target_device() -> String {
    "CPU".to_string()
}

/// Batching mode requested for a model. `FromNetwork` keeps whatever batch
/// dimension the serialized network declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BatchSize {
    #[default]
    FromNetwork,
    /// Reconfigure the network on demand to the incoming batch.
    Auto,
    Fixed(u64),
}

impl<'de> Deserialize<'de> for BatchSize {
    fn deserialize<D>(deserializer: D) -> Result<BatchSize, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(u64),
            Mode(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Count(n) if n > 0 => Ok(BatchSize::Fixed(n)),
            Repr::Count(n) => Err(de::Error::custom(format!(
                "batch_size must be a positive integer, got {n}"
            ))),
            Repr::Mode(mode) if mode == "auto" => Ok(BatchSize::Auto),
            Repr::Mode(mode) => Err(de::Error::custom(format!(
                "batch_size must be a positive integer or \"auto\", got \"{mode}\""
            ))),
        }
    }
}

/// Shape mode requested for a model's inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShapeSpec {
    /// Keep the dimensions the serialized network declares.
    #[default]
    FromNetwork,
    /// Reconfigure the network on demand to the incoming dimensions.
    Auto,
    /// One fixed shape, applied to the model's single input.
    Fixed(Vec<i64>),
    /// Fixed shapes per input name.
    Named(HashMap<String, Vec<i64>>),
}

impl ShapeSpec {
    pub fn is_auto(&self) -> bool {
        matches!(self, ShapeSpec::Auto)
    }
}

/// Parse a shape literal of the form `(1,3,224,224)`.
pub fn parse_shape_literal(value: &str) -> Result<Vec<i64>, Status> {
    let invalid = || Status::ShapeInvalid {
        value: value.to_string(),
    };
    let inner = value
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let dims = inner
        .split(',')
        .map(|d| d.trim().parse::<i64>().map_err(|_| invalid()))
        .collect::<Result<Vec<i64>, Status>>()?;
    if dims.is_empty() || dims.iter().any(|d| *d <= 0) {
        return Err(invalid());
    }
    Ok(dims)
}

impl<'de> Deserialize<'de> for ShapeSpec {
    fn deserialize<D>(deserializer: D) -> Result<ShapeSpec, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Literal(String),
            PerInput(HashMap<String, String>),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Literal(value) if value == "auto" => Ok(ShapeSpec::Auto),
            Repr::Literal(value) => parse_shape_literal(&value)
                .map(ShapeSpec::Fixed)
                .map_err(|e| de::Error::custom(e.to_string())),
            Repr::PerInput(map) => {
                let mut shapes = HashMap::with_capacity(map.len());
                for (input, value) in map {
                    let dims =
                        parse_shape_literal(&value).map_err(|e| de::Error::custom(e.to_string()))?;
                    shapes.insert(input, dims);
                }
                Ok(ShapeSpec::Named(shapes))
            }
        }
    }
}

/// Immutable snapshot of the parameters needed to load one model version.
/// Two configs are equivalent iff every field is equal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub base_path: String,

    #[serde(default)]
    pub batch_size: BatchSize,

    #[serde(default)]
    pub shape: ShapeSpec,

    #[serde(default)]
    pub model_version_policy: ModelVersionPolicy,

    #[serde(default = "default_target_device")]
    pub target_device: String,

    /// Concurrent inference slots. 0 means "choose automatically from
    /// available backend resources".
    #[serde(default)]
    pub nireq: u32,

    #[serde(default)]
    pub plugin_config: HashMap<String, String>,
}

impl ModelConfig {
    /// True when this model may trigger a self-reshape mid-request. Such
    /// models are forbidden inside pipelines.
    pub fn is_dynamic(&self) -> bool {
        self.batch_size == BatchSize::Auto || self.shape.is_auto()
    }

    pub fn version_path(&self, version: u64) -> PathBuf {
        Path::new(&self.base_path).join(version.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfigEntry {
    pub config: ModelConfig,
}

/// Node kinds accepted in the pipeline section of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NodeKindConfig {
    #[serde(rename = "request")]
    Entry,
    #[serde(rename = "dl")]
    Dl,
    #[serde(rename = "response")]
    Exit,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    pub node_name: String,
    pub kind: NodeKindConfig,

    #[serde(default)]
    pub model_name: Option<String>,

    #[serde(default)]
    pub model_version: Option<u64>,

    /// Output alias map: alias -> real output tensor name.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BindingConfig {
    /// Output alias on the source node.
    pub source: String,
    /// Input name on the destination node.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
    pub bindings: Vec<BindingConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub nodes: Vec<NodeConfig>,
    pub connections: Vec<ConnectionConfig>,
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub model_config_list: Vec<ModelConfigEntry>,

    #[serde(default)]
    pub pipeline_config_list: Vec<PipelineConfig>,
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<ServerConfig, Status> {
        let config: ServerConfig =
            serde_json::from_str(text).map_err(|e| Status::ConfigInvalid {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the registry: name uniqueness.
    pub fn validate(&self) -> Result<(), Status> {
        let mut model_names = HashSet::new();
        for entry in &self.model_config_list {
            if !model_names.insert(entry.config.name.as_str()) {
                return Err(Status::ConfigInvalid {
                    reason: format!("duplicate model name: {}", entry.config.name),
                });
            }
        }
        let mut pipeline_names = HashSet::new();
        for pipeline in &self.pipeline_config_list {
            if !pipeline_names.insert(pipeline.name.as_str()) {
                return Err(Status::ConfigInvalid {
                    reason: format!("duplicate pipeline name: {}", pipeline.name),
                });
            }
        }
        Ok(())
    }

    pub fn model_config(&self, name: &str) -> Option<&ModelConfig> {
        self.model_config_list
            .iter()
            .map(|entry| &entry.config)
            .find(|config| config.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn minimal(name: &str) -> String {
        format!(r#"{{"name": "{name}", "base_path": "/models/{name}"}}"#)
    }

    #[test]
    fn minimal_model_config_defaults() {
        let config: ModelConfig = serde_json::from_str(&minimal("resnet")).unwrap();
        assert_eq!(config.batch_size, BatchSize::FromNetwork);
        assert_eq!(config.shape, ShapeSpec::FromNetwork);
        assert_eq!(
            config.model_version_policy,
            ModelVersionPolicy::Latest { num_versions: 1 }
        );
        assert_eq!(config.target_device, "CPU");
        assert_eq!(config.nireq, 0);
        assert!(!config.is_dynamic());
    }

    #[rstest]
    #[case(r#""auto""#, BatchSize::Auto)]
    #[case("4", BatchSize::Fixed(4))]
    fn batch_size_forms(#[case] json: &str, #[case] expected: BatchSize) {
        let parsed: BatchSize = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("0")]
    #[case(r#""automatic""#)]
    fn batch_size_rejects(#[case] json: &str) {
        assert!(serde_json::from_str::<BatchSize>(json).is_err());
    }

    #[test]
    fn shape_forms() {
        let fixed: ShapeSpec = serde_json::from_str(r#""(1,3,224,224)""#).unwrap();
        assert_eq!(fixed, ShapeSpec::Fixed(vec![1, 3, 224, 224]));

        let auto: ShapeSpec = serde_json::from_str(r#""auto""#).unwrap();
        assert!(auto.is_auto());

        let named: ShapeSpec =
            serde_json::from_str(r#"{"data": "(1,10)", "mask": "(1,1)"}"#).unwrap();
        let ShapeSpec::Named(map) = named else {
            panic!("expected named shapes");
        };
        assert_eq!(map["data"], vec![1, 10]);
        assert_eq!(map["mask"], vec![1, 1]);
    }

    #[rstest]
    #[case("(1,3,0,224)")]
    #[case("1,3,224")]
    #[case("()")]
    fn shape_literal_rejects(#[case] value: &str) {
        assert!(parse_shape_literal(value).is_err());
    }

    #[test]
    fn full_document_parses() {
        let doc = r#"{
            "model_config_list": [
                {"config": {"name": "det", "base_path": "/models/det", "nireq": 2,
                            "model_version_policy": {"latest": {"num_versions": 2}}}},
                {"config": {"name": "rec", "base_path": "/models/rec", "batch_size": "auto"}}
            ],
            "pipeline_config_list": [
                {"name": "faces",
                 "nodes": [
                    {"node_name": "request", "kind": "request"},
                    {"node_name": "detect", "kind": "dl", "model_name": "det",
                     "outputs": {"faces": "detection_out"}},
                    {"node_name": "response", "kind": "response"}
                 ],
                 "connections": [
                    {"from": "request", "to": "detect",
                     "bindings": [{"source": "image", "target": "data"}]},
                    {"from": "detect", "to": "response",
                     "bindings": [{"source": "faces", "target": "faces"}]}
                 ]}
            ]
        }"#;
        let config = ServerConfig::from_json(doc).unwrap();
        assert_eq!(config.model_config_list.len(), 2);
        assert!(config.model_config("rec").unwrap().is_dynamic());
        assert_eq!(config.pipeline_config_list[0].nodes.len(), 3);
    }

    #[test]
    fn duplicate_model_names_rejected() {
        let doc = r#"{"model_config_list": [
            {"config": {"name": "a", "base_path": "/m/a"}},
            {"config": {"name": "a", "base_path": "/m/b"}}
        ]}"#;
        let err = ServerConfig::from_json(doc).unwrap_err();
        assert!(matches!(err, Status::ConfigInvalid { .. }));
    }
}
