// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the resource governor.

use crate::ComputeTarget;

/// Longest embedder message kept in an error, in characters.
const MAX_DETAIL_CHARS: usize = 160;

/// Errors that can occur while governing an embedding batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernorError {
    /// The reservation would exceed the device's free memory.
    #[error("resource exhausted on device {device_id}: required {required_bytes} bytes, {free_bytes} free")]
    ResourceExhausted {
        device_id: usize,
        required_bytes: u64,
        free_bytes: u64,
    },

    /// No GPU device meets the dispatch criteria.
    #[error("no GPU device available: {0}")]
    DeviceUnavailable(String),

    /// The embedder did not answer before the deadline.
    #[error("embedder on {target} timed out after {timeout_ms} ms")]
    OperationTimeout { target: ComputeTarget, timeout_ms: u64 },

    /// The embedder failed. The detail is reduced to one truncated line.
    #[error("embedder failed on {target}: {detail}")]
    Embedder { target: ComputeTarget, detail: String },

    /// A required component has not been provided.
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    /// `initialize` was called on a running governor.
    #[error("governor already initialized")]
    AlreadyInitialized,

    /// A reservation with this batch id is already active.
    #[error("batch '{0}' already holds a reservation")]
    DuplicateReservation(String),

    /// The device id does not exist in the pool.
    #[error("unknown device {0}")]
    UnknownDevice(usize),

    /// Device accounting no longer adds up.
    #[error("device pool integrity error: {0}")]
    PoolCorruption(String),

    /// The thermal gate reported the shutdown zone.
    #[error("thermal shutdown at {temperature_c:.1}°C, batch refused")]
    ThermalShutdown { temperature_c: f64 },

    /// The governor is stopping and accepts no new work.
    #[error("governor is shutting down")]
    ShuttingDown,

    /// A queued batch failed; every submitter receives the same message.
    #[error("queued batch failed: {0}")]
    BatchFailed(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GovernorError {
    /// Returns `true` if a failed GPU dispatch may be retried on CPU.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            GovernorError::ResourceExhausted { .. }
                | GovernorError::DeviceUnavailable(_)
                | GovernorError::OperationTimeout { .. }
                | GovernorError::Embedder { .. }
        )
    }

    /// Builds an [`GovernorError::Embedder`] keeping only the first line of
    /// `message`, truncated.
    pub(crate) fn embedder(target: ComputeTarget, message: &str) -> Self {
        let line = message.lines().next().unwrap_or_default().trim();
        let mut detail: String = line.chars().take(MAX_DETAIL_CHARS).collect();
        if line.chars().count() > MAX_DETAIL_CHARS {
            detail.push('…');
        }
        GovernorError::Embedder { target, detail }
    }
}
