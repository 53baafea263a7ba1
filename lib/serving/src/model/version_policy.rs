// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::model::ModelVersion;

/// Rule mapping the set of on-disk versions to the set the server should
/// keep loaded.
///
/// Configuration forms: `{"all": {}}`, `{"latest": {"num_versions": N}}`,
/// `{"specific": {"versions": [v, ...]}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVersionPolicy {
    All {},
    Latest { num_versions: usize },
    Specific { versions: Vec<ModelVersion> },
}

impl Default for ModelVersionPolicy {
    fn default() -> Self {
        ModelVersionPolicy::Latest { num_versions: 1 }
    }
}

impl ModelVersionPolicy {
    /// Apply the policy to the versions found on disk, yielding the target
    /// set of versions to keep loaded.
    pub fn filter(&self, available: &BTreeSet<ModelVersion>) -> BTreeSet<ModelVersion> {
        match self {
            ModelVersionPolicy::All {} => available.clone(),
            ModelVersionPolicy::Latest { num_versions } => available
                .iter()
                .rev()
                .take(*num_versions)
                .copied()
                .collect(),
            ModelVersionPolicy::Specific { versions } => available
                .iter()
                .filter(|v| versions.contains(v))
                .copied()
                .collect(),
        }
    }
}
