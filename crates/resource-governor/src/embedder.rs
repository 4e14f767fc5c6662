// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Embedder collaborators.
//!
//! The governor never runs a model itself. It decides where a batch runs
//! and hands the texts to an injected [`DenseEmbedder`] together with the
//! [`ComputeTarget`] it chose.

use async_trait::async_trait;
use std::fmt;

/// Where a batch is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ComputeTarget {
    Gpu { device_id: usize },
    Cpu,
}

impl ComputeTarget {
    pub fn is_gpu(self) -> bool {
        matches!(self, ComputeTarget::Gpu { .. })
    }
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeTarget::Gpu { device_id } => write!(f, "gpu:{device_id}"),
            ComputeTarget::Cpu => f.write_str("cpu"),
        }
    }
}

/// Failure reported by an embedder.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EmbedderError {
    message: String,
}

impl EmbedderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A sparse embedding as parallel index/value arrays.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Produces one dense vector per input text.
///
/// Implementations must return exactly `texts.len()` vectors, in order.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        target: ComputeTarget,
    ) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Short name used in log lines.
    fn name(&self) -> &str {
        "dense"
    }
}

/// Produces one sparse vector per input text.
#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbedderError>;

    fn name(&self) -> &str {
        "sparse"
    }
}
