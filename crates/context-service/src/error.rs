// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the context service.
//!
//! Thermal rejections are not errors: they come back as a
//! [`RejectionReason`](crate::RejectionReason) on the result.

/// Errors raised while building the service or by its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A slice or pack delegate failed.
    #[error("{operation} delegate failed: {detail}")]
    Delegate {
        operation: &'static str,
        detail: String,
    },

    /// The resource governor returned an error.
    #[error("governor error: {0}")]
    Governor(#[from] resource_governor::GovernorError),

    /// The policy table is invalid.
    #[error("policy error: {0}")]
    Policy(#[from] thermal_policy::PolicyError),

    /// An embedding request arrived but no governor is attached.
    #[error("no resource governor attached")]
    NoGovernor,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ContextError {
    /// Shorthand for a slice delegate failure.
    pub fn slice(detail: impl Into<String>) -> Self {
        Self::Delegate {
            operation: "slice",
            detail: detail.into(),
        }
    }

    /// Shorthand for a pack delegate failure.
    pub fn pack(detail: impl Into<String>) -> Self {
        Self::Delegate {
            operation: "pack",
            detail: detail.into(),
        }
    }
}
