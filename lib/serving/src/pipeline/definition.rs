// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Declarative pipeline definitions and their validation.
//!
//! A [PipelineDefinition] is immutable after validation: a set of
//! [NodeInfo]s (exactly one entry and one exit) plus the adjacency between
//! them. Validation resolves every DL node against the live model registry,
//! checks tensor bindings on every edge, and proves the graph is an acyclic
//! chain of entry-to-exit paths.

use std::collections::{HashMap, HashSet};

use crate::config::{NodeKindConfig, PipelineConfig};
use crate::manager::ModelManager;
use crate::model::ModelVersion;
use crate::pipeline::{Adjacency, Node, Pipeline};
use crate::status::Status;
use crate::tensor::TensorMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Entry,
    Dl,
    Exit,
}

impl From<NodeKindConfig> for NodeKind {
    fn from(kind: NodeKindConfig) -> NodeKind {
        match kind {
            NodeKindConfig::Entry => NodeKind::Entry,
            NodeKindConfig::Dl => NodeKind::Dl,
            NodeKindConfig::Exit => NodeKind::Exit,
        }
    }
}

/// Declarative DAG node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub kind: NodeKind,
    pub model_name: Option<String>,
    pub model_version: Option<ModelVersion>,
    /// alias -> real output tensor name.
    pub output_aliases: HashMap<String, String>,
}

/// One tensor carried by an edge: source output alias to destination input.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBinding {
    pub source_output: String,
    pub target_input: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    name: String,
    nodes: Vec<NodeInfo>,
    /// destination -> [(source, bindings)]
    upstream: Adjacency,
}

impl PipelineDefinition {
    pub fn new(name: &str, nodes: Vec<NodeInfo>, upstream: Adjacency) -> PipelineDefinition {
        PipelineDefinition {
            name: name.to_string(),
            nodes,
            upstream,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<PipelineDefinition, Status> {
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            let kind = NodeKind::from(node.kind);
            if kind == NodeKind::Dl && node.model_name.is_none() {
                return Err(Status::ConfigInvalid {
                    reason: format!(
                        "pipeline {} node {} is a dl node without a model_name",
                        config.name, node.node_name
                    ),
                });
            }
            nodes.push(NodeInfo {
                name: node.node_name.clone(),
                kind,
                model_name: node.model_name.clone(),
                model_version: node.model_version,
                output_aliases: node.outputs.clone(),
            });
        }

        let mut upstream: Adjacency = HashMap::new();
        for connection in &config.connections {
            let bindings = connection
                .bindings
                .iter()
                .map(|b| TensorBinding {
                    source_output: b.source.clone(),
                    target_input: b.target.clone(),
                })
                .collect();
            upstream
                .entry(connection.to.clone())
                .or_default()
                .push((connection.from.clone(), bindings));
        }

        Ok(PipelineDefinition::new(&config.name, nodes, upstream))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|info| info.name == name)
    }

    fn single_node_of_kind(&self, kind: NodeKind) -> Result<&NodeInfo, Status> {
        let mut found = self.nodes.iter().filter(|info| info.kind == kind);
        let first = found.next().ok_or_else(|| Status::PipelineMissingEntryOrExit {
            pipeline: self.name.clone(),
        })?;
        if found.next().is_some() {
            return Err(match kind {
                NodeKind::Entry => Status::PipelineMultipleEntryNodes {
                    pipeline: self.name.clone(),
                },
                _ => Status::PipelineMultipleExitNodes {
                    pipeline: self.name.clone(),
                },
            });
        }
        Ok(first)
    }

    /// Validate the definition against the live registry. Performed once
    /// before the definition is published to the factory.
    ///
    /// The checks run in phases over the whole graph: name uniqueness,
    /// entry/exit uniqueness, model resolution for every node, binding
    /// validation for every edge, then acyclicity. A later phase is only
    /// reached once every node passed the earlier ones.
    pub fn validate(&self, manager: &ModelManager) -> Result<(), Status> {
        tracing::debug!(pipeline = %self.name, "Validating pipeline definition");
        self.validate_node_names()?;
        self.single_node_of_kind(NodeKind::Entry)?;
        let exit_name = self.single_node_of_kind(NodeKind::Exit)?.name.clone();
        for info in &self.nodes {
            self.validate_node_model(manager, info)?;
        }
        for info in &self.nodes {
            self.validate_node_edges(manager, info)?;
        }
        self.validate_graph(&exit_name)
    }

    fn validate_node_names(&self) -> Result<(), Status> {
        let mut seen = HashSet::new();
        for info in &self.nodes {
            if !seen.insert(info.name.as_str()) {
                return Err(Status::PipelineNodeNameDuplicate {
                    pipeline: self.name.clone(),
                    node: info.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve a DL node's model, failing the way the validation surface
    /// reports it: any lookup failure is a missing model.
    fn resolve_dl(
        &self,
        manager: &ModelManager,
        info: &NodeInfo,
    ) -> Result<std::sync::Arc<crate::model::ModelInstance>, Status> {
        let model_name = info.model_name.as_deref().unwrap_or_default();
        manager
            .find_model_instance(model_name, info.model_version)
            .map(|(instance, _guard)| instance)
            .map_err(|_| Status::ModelNameMissing {
                name: model_name.to_string(),
            })
    }

    /// Phase three: every DL node must resolve to a live instance that does
    /// not use dynamic batching or shape.
    fn validate_node_model(&self, manager: &ModelManager, info: &NodeInfo) -> Result<(), Status> {
        if info.kind != NodeKind::Dl {
            return Ok(());
        }
        let instance = self.resolve_dl(manager, info)?;
        if instance.config().is_dynamic() {
            return Err(Status::ForbiddenModelDynamicParameter {
                pipeline: self.name.clone(),
                node: info.name.clone(),
                model: instance.name().to_string(),
            });
        }
        Ok(())
    }

    /// Phase four: every edge into this node carries bindings that resolve
    /// against the source's outputs and this node's inputs.
    fn validate_node_edges(&self, manager: &ModelManager, info: &NodeInfo) -> Result<(), Status> {
        let node_inputs = if info.kind == NodeKind::Dl {
            Some(self.resolve_dl(manager, info)?.inputs())
        } else {
            None
        };

        for (source_name, bindings) in self.upstream.get(&info.name).into_iter().flatten() {
            let source = self.node(source_name).ok_or_else(|| {
                Status::PipelineMissingDependency {
                    pipeline: self.name.clone(),
                    node: info.name.clone(),
                    dependency: source_name.clone(),
                }
            })?;

            if bindings.is_empty() {
                return Err(Status::PipelineDefinitionMissingDependencyMapping {
                    pipeline: self.name.clone(),
                    node: info.name.clone(),
                });
            }

            let source_outputs = if source.kind == NodeKind::Dl {
                Some(self.resolve_dl(manager, source)?.outputs())
            } else {
                None
            };

            for binding in bindings {
                if let Some(outputs) = &source_outputs {
                    // Alias map wins when the alias key is present, identity
                    // fallback otherwise.
                    let real = source
                        .output_aliases
                        .get(&binding.source_output)
                        .unwrap_or(&binding.source_output);
                    if !outputs.contains_key(real) {
                        return Err(Status::InvalidMissingOutput {
                            pipeline: self.name.clone(),
                            node: source.name.clone(),
                            output: real.clone(),
                        });
                    }
                }
                if let Some(inputs) = &node_inputs
                    && !inputs.contains_key(&binding.target_input)
                {
                    return Err(Status::InvalidMissingInput {
                        pipeline: self.name.clone(),
                        node: info.name.clone(),
                        input: binding.target_input.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Walk predecessors of the exit node with an iterative DFS: a revisit
    /// of a node on the active path is a cycle, and any node the walk never
    /// reaches lies on no entry-exit path.
    fn validate_graph(&self, exit_name: &str) -> Result<(), Status> {
        enum Frame {
            Enter(String),
            Leave,
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = Vec::new();
        let mut stack = vec![Frame::Enter(exit_name.to_string())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(name) => {
                    if visited.contains(&name) {
                        continue;
                    }
                    visited.insert(name.clone());
                    path.push(name.clone());
                    stack.push(Frame::Leave);
                    for (source, _) in self.upstream.get(&name).into_iter().flatten() {
                        if let Some(start) = path.iter().position(|n| n == source) {
                            return Err(Status::PipelineCycleFound {
                                pipeline: self.name.clone(),
                                nodes: path[start..].to_vec(),
                            });
                        }
                        if !visited.contains(source) {
                            stack.push(Frame::Enter(source.clone()));
                        }
                    }
                }
                Frame::Leave => {
                    path.pop();
                }
            }
        }

        if visited.len() != self.nodes.len() {
            return Err(Status::PipelineContainsUnconnectedNodes {
                pipeline: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Materialize a per-request [Pipeline]: one live node per [NodeInfo],
    /// edges installed verbatim from the definition, and a liveness guard
    /// acquired for every DL node. A version that was retired between
    /// validation and now fails the whole construction; guards acquired so
    /// far are released on the error path.
    pub fn create(&self, request: TensorMap, manager: &ModelManager) -> Result<Pipeline, Status> {
        let mut request = Some(request);
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        let mut exit_name = String::new();

        for info in &self.nodes {
            let node = match info.kind {
                NodeKind::Entry => Node::Entry {
                    name: info.name.clone(),
                    request: request.take().unwrap_or_default(),
                },
                NodeKind::Exit => {
                    exit_name = info.name.clone();
                    Node::Exit {
                        name: info.name.clone(),
                    }
                }
                NodeKind::Dl => {
                    let model_name = info.model_name.clone().unwrap_or_default();
                    let (instance, guard) = manager
                        .find_model_instance(&model_name, info.model_version)
                        .map_err(|status| match status {
                            // The definition validated once; a lookup miss
                            // now means the version has since gone away.
                            Status::ModelVersionMissing { .. }
                            | Status::ModelVersionNotLoadedAnymore { .. } => {
                                Status::ModelVersionNotLoadedAnymore {
                                    name: model_name.clone(),
                                    version: info.model_version.unwrap_or_default(),
                                }
                            }
                            other => other,
                        })?;
                    Node::Dl {
                        name: info.name.clone(),
                        model_name,
                        model_version: info.model_version,
                        output_aliases: info.output_aliases.clone(),
                        instance,
                        guard,
                    }
                }
            };
            nodes.insert(info.name.clone(), node);
        }

        tracing::debug!(pipeline = %self.name, "Created pipeline instance");
        Ok(Pipeline::new(
            self.name.clone(),
            nodes,
            self.upstream.clone(),
            exit_name,
        ))
    }
}
