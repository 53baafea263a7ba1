// SPDX-FileCopyrightText: Copyright (c) 2024-2025 The serval Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tensor metadata and payload containers exchanged between the transport
//! layer, the pipeline executor and the inference backend. The core never
//! performs arithmetic on tensor contents; payloads are opaque byte buffers.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Fp32,
    Fp16,
    I64,
    I32,
    I16,
    I8,
    U8,
}

impl DataType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Fp32 | DataType::I32 => 4,
            DataType::Fp16 | DataType::I16 => 2,
            DataType::I64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }
}

/// Declared metadata of one named tensor: element type and dimensions.
/// The first dimension is the batch dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub datatype: DataType,
    pub shape: Vec<i64>,
}

impl TensorInfo {
    pub fn new(datatype: DataType, shape: Vec<i64>) -> TensorInfo {
        TensorInfo { datatype, shape }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().map(|d| (*d).max(0) as usize).product()
    }

    pub fn batch_size(&self) -> Option<i64> {
        self.shape.first().copied()
    }
}

/// One tensor payload in flight through a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub datatype: DataType,
    pub shape: Vec<i64>,
    pub data: Bytes,
}

impl Tensor {
    pub fn new(datatype: DataType, shape: Vec<i64>, data: Bytes) -> Tensor {
        Tensor {
            datatype,
            shape,
            data,
        }
    }

    /// A zero-filled tensor matching `info`. Used by mock backends and tests.
    pub fn zeros(info: &TensorInfo) -> Tensor {
        let len = info.element_count() * info.datatype.size_bytes();
        Tensor {
            datatype: info.datatype,
            shape: info.shape.clone(),
            data: Bytes::from(vec![0u8; len]),
        }
    }

    pub fn info(&self) -> TensorInfo {
        TensorInfo {
            datatype: self.datatype,
            shape: self.shape.clone(),
        }
    }

    /// True when this payload is shaped exactly as declared.
    pub fn matches(&self, info: &TensorInfo) -> bool {
        self.datatype == info.datatype && self.shape == info.shape
    }
}

/// Declared IO of a loaded network: name -> (datatype, shape).
pub type TensorInfoMap = HashMap<String, TensorInfo>;

/// Tensor payloads keyed by name.
pub type TensorMap = HashMap<String, Tensor>;
