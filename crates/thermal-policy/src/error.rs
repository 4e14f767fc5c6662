// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the thermal policy.

/// Errors raised when a policy table is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// A row allows more work than the less severe row before it.
    #[error("policy row '{row}' is not monotone: {detail}")]
    NotMonotone { row: String, detail: String },

    /// The shutdown row must halt all work.
    #[error("shutdown row must have zero limits and emergency throttling, got {detail}")]
    ShutdownNotHalting { detail: String },

    /// The memory-pressure ceiling is outside `(0, 1]`.
    #[error("memory pressure ceiling must be in (0, 1], got {0}")]
    InvalidMemoryCeiling(f64),
}
