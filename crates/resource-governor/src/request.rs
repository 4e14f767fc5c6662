// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Request and result types for embedding batches.

use crate::{ComputeTarget, GovernorMetrics};

/// Scheduling priority of a batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Per-call options for [`ResourceGovernor::generate_embeddings`](crate::ResourceGovernor::generate_embeddings).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    pub priority: Priority,
    /// Ask for GPU dispatch of a batch that would otherwise run on CPU.
    pub prefer_gpu: bool,
    /// Caller-chosen id; generated when absent. Must be unique among
    /// in-flight batches.
    pub batch_id: Option<String>,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            prefer_gpu: true,
            batch_id: None,
        }
    }
}

impl EmbeddingOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_prefer_gpu(mut self, prefer_gpu: bool) -> Self {
        self.prefer_gpu = prefer_gpu;
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

/// Kind of device that produced an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// One embedding with its provenance.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub device: DeviceKind,
    /// Set for GPU results.
    pub device_id: Option<usize>,
    /// Wall time of the whole batch this embedding belonged to.
    pub processing_time_ms: f64,
    pub batch_id: String,
}

impl EmbeddingResult {
    pub(crate) fn batch(
        vectors: Vec<Vec<f32>>,
        target: ComputeTarget,
        processing_time_ms: f64,
        batch_id: &str,
    ) -> Vec<Self> {
        let (device, device_id) = match target {
            ComputeTarget::Gpu { device_id } => (DeviceKind::Gpu, Some(device_id)),
            ComputeTarget::Cpu => (DeviceKind::Cpu, None),
        };
        vectors
            .into_iter()
            .map(|embedding| Self {
                embedding,
                device,
                device_id,
                processing_time_ms,
                batch_id: batch_id.to_string(),
            })
            .collect()
    }
}

/// Output of [`ResourceGovernor::health_check`](crate::ResourceGovernor::health_check).
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    /// Initialized, accepting work, and device accounting is consistent.
    pub healthy: bool,
    pub gpu_available: bool,
    pub device_count: usize,
    pub metrics: GovernorMetrics,
    pub outstanding_reservations: usize,
}

/// What `stop` found while shutting down.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ShutdownReport {
    /// `false` when the governor was not running.
    pub stopped: bool,
    /// Batches still running when the grace period ended.
    pub abandoned_batches: usize,
    /// Reservations released by force.
    pub leaked_reservations: usize,
    /// Queued texts answered with a shutdown error.
    pub rejected_queued: usize,
}
