// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-request pipeline instances.
//!
//! A [Pipeline] is materialized from a validated [PipelineDefinition] for
//! exactly one request. It owns one [Node] per definition node and holds a
//! liveness guard for every model instance its DL nodes reference, so the
//! instances stay loaded for the duration of execution. Its lifetime is
//! strictly nested inside the call that constructed it; dropping it releases
//! every guard.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::model::{LivenessGuard, ModelInstance, ModelVersion};
use crate::status::Status;
use crate::tensor::TensorMap;

pub mod definition;
pub mod factory;

pub use definition::{NodeInfo, NodeKind, PipelineDefinition, TensorBinding};
pub use factory::PipelineFactory;

/// Adjacency: node -> [(peer, tensor bindings)]. Used in both orientations;
/// the validation walk uses the upstream form, execution the downstream one.
pub type Adjacency = HashMap<String, Vec<(String, Vec<TensorBinding>)>>;

/// A live pipeline node. Entry wraps the inbound request, Exit collects the
/// outbound response, DL executes one guarded model instance.
pub enum Node {
    Entry {
        name: String,
        request: TensorMap,
    },
    Dl {
        name: String,
        model_name: String,
        model_version: Option<ModelVersion>,
        output_aliases: HashMap<String, String>,
        instance: Arc<ModelInstance>,
        guard: LivenessGuard,
    },
    Exit {
        name: String,
    },
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Entry { name, .. } | Node::Dl { name, .. } | Node::Exit { name } => name,
        }
    }

    fn output_aliases(&self) -> Option<&HashMap<String, String>> {
        match self {
            Node::Dl { output_aliases, .. } => Some(output_aliases),
            _ => None,
        }
    }
}

pub struct Pipeline {
    name: String,
    nodes: HashMap<String, Node>,
    /// destination -> sources, copied verbatim from the definition.
    upstream: Adjacency,
    /// source -> destinations, the mirrored form.
    downstream: Adjacency,
    exit_name: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("exit_name", &self.exit_name)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub(crate) fn new(
        name: String,
        nodes: HashMap<String, Node>,
        upstream: Adjacency,
        exit_name: String,
    ) -> Pipeline {
        let mut downstream: Adjacency = HashMap::new();
        for (dest, sources) in &upstream {
            for (source, bindings) in sources {
                downstream
                    .entry(source.clone())
                    .or_default()
                    .push((dest.clone(), bindings.clone()));
            }
        }
        Pipeline {
            name,
            nodes,
            upstream,
            downstream,
            exit_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tensors flowing into `dest`: every upstream binding resolved against
    /// the producing node's outputs, with the source node's alias map
    /// expanded (alias wins when the key is present, identity otherwise).
    fn gather_inputs(
        &self,
        produced: &HashMap<String, TensorMap>,
        dest: &str,
    ) -> Result<TensorMap, Status> {
        let mut inputs = TensorMap::new();
        let Some(sources) = self.upstream.get(dest) else {
            return Ok(inputs);
        };
        for (source, bindings) in sources {
            let outputs = produced.get(source).ok_or_else(|| Status::InvalidMissingInput {
                pipeline: self.name.clone(),
                node: dest.to_string(),
                input: source.clone(),
            })?;
            let aliases = self.nodes.get(source.as_str()).and_then(Node::output_aliases);
            for binding in bindings {
                let real = aliases
                    .and_then(|map| map.get(&binding.source_output))
                    .unwrap_or(&binding.source_output);
                let tensor = outputs.get(real).ok_or_else(|| Status::InvalidMissingInput {
                    pipeline: self.name.clone(),
                    node: dest.to_string(),
                    input: real.clone(),
                })?;
                inputs.insert(binding.target_input.clone(), tensor.clone());
            }
        }
        Ok(inputs)
    }

    /// Run the DAG: a forward traversal from Entry executes each node once
    /// all of its dependencies have delivered their tensors, and returns the
    /// tensors collected at Exit.
    pub async fn execute(mut self) -> Result<TensorMap, Status> {
        let mut indegree: HashMap<String, usize> = self
            .nodes
            .keys()
            .map(|name| {
                let sources = self.upstream.get(name).map_or(0, |s| s.len());
                (name.clone(), sources)
            })
            .collect();

        let mut queue: VecDeque<String> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| name.clone())
            .collect();

        let mut produced: HashMap<String, TensorMap> = HashMap::new();
        let mut response = None;

        while let Some(name) = queue.pop_front() {
            let inputs = self.gather_inputs(&produced, &name)?;
            let node = self
                .nodes
                .get_mut(&name)
                .ok_or_else(|| Status::ConfigInvalid {
                    reason: format!("pipeline {} references unknown node {name}", self.name),
                })?;
            match node {
                Node::Entry { request, .. } => {
                    produced.insert(name.clone(), std::mem::take(request));
                }
                Node::Dl { instance, .. } => {
                    tracing::debug!(pipeline = %self.name, node = %name, "Executing pipeline node");
                    let outputs = instance.infer(&inputs, None).await?;
                    produced.insert(name.clone(), outputs);
                }
                Node::Exit { .. } => {
                    response = Some(inputs);
                }
            }
            if let Some(destinations) = self.downstream.get(&name) {
                for (dest, _) in destinations {
                    if let Some(degree) = indegree.get_mut(dest) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dest.clone());
                        }
                    }
                }
            }
        }

        debug_assert!(response.is_some(), "validated pipeline must reach its exit");
        response.ok_or_else(|| Status::ConfigInvalid {
            reason: format!(
                "pipeline {} execution did not reach exit node {}",
                self.name, self.exit_name
            ),
        })
    }
}
