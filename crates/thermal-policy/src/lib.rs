// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # thermal-policy
//!
//! Translates a [`thermal_monitor::ThermalState`] into operational limits
//! for one request.
//!
//! # Default Table
//!
//! | Zone | Depth | Nodes | Ops | Level |
//! |---|---|---|---|---|
//! | optimal | requested | requested | 10 | none |
//! | normal, stable or decreasing | 5 | 50 | 5 | none |
//! | normal, rising | 4 | 30 | 4 | proactive |
//! | elevated | 2 | 15 | 2 | moderate |
//! | critical | 1 | 5 | 1 | aggressive |
//! | shutdown | 0 | 0 | 0 | emergency |
//!
//! Depth and node limits never exceed the request. Memory pressure at or
//! above the configured ceiling halves the node budget.
//!
//! # Example
//! ```
//! use thermal_monitor::{ThermalState, ThermalTrend};
//! use thermal_policy::{ThermalPolicy, ThrottlingLevel, Workload};
//!
//! let policy = ThermalPolicy::default();
//! let state = ThermalState::new(85.0, ThermalTrend::Stable);
//! let limits = policy.recommended_limits(&state, Workload::new(5, 50));
//! assert_eq!((limits.max_depth, limits.max_nodes), (2, 15));
//! assert_eq!(limits.throttling_level, ThrottlingLevel::Moderate);
//! ```

mod config;
mod error;
mod limits;
mod policy;

pub use config::{PolicyConfig, ZoneLimits};
pub use error::PolicyError;
pub use limits::{ThermalLimits, ThrottlingLevel, Workload};
pub use policy::ThermalPolicy;
