// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # context-service
//!
//! Thermal-aware admission for context-graph operations and embedding
//! batches.
//!
//! The service takes:
//! - A [`ThermalMonitor`](thermal_monitor::ThermalMonitor) for readings.
//! - A [`ThermalPolicy`](thermal_policy::ThermalPolicy) mapping readings to limits.
//! - Pluggable [`ContextSliceService`] and [`ContextPackService`] delegates.
//! - Optionally a [`ResourceGovernor`](resource_governor::ResourceGovernor)
//!   for embeddings.
//!
//! Each guarded call samples the temperature, rejects or clamps the
//! request, runs the delegate while sampling, and returns the delegate's
//! output annotated with a [`ThermalStatus`] and [`ThermalAnalytics`].
//! Thermal refusals are results with an [`OperationOutcome::Rejected`],
//! never errors.
//!
//! # Configuration
//! [`ServiceConfig`] gathers the monitor, policy, governor and service
//! sections into one TOML file; see [`ThermalAwareContextService::from_config`].

mod config;
mod context;
mod error;
mod outcome;
mod service;

pub use config::{ContextConfig, ServiceConfig, DEFAULT_EFFICIENCY_SCALE_C, DEFAULT_RAPID_INCREASE_C};
pub use context::{
    ContextEdge, ContextNode, ContextPackService, ContextSliceService, PackOptions, PackedContext,
    SliceRecipe, SliceResult, Subgraph, ThermalConstraints,
};
pub use error::ContextError;
pub use outcome::{
    OperationOutcome, RejectionReason, ThermalAnalytics, ThermalEmbedResult, ThermalPackResult,
    ThermalSliceResult, ThermalStatus,
};
pub use service::{GuardedRequest, GuardedResponse, ThermalAwareContextService};
