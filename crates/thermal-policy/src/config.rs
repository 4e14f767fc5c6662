// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The zone table.
//!
//! ```toml
//! memory_pressure_ceiling = 0.9
//!
//! [optimal]
//! max_concurrent_ops = 10
//! level = "none"
//!
//! [elevated]
//! max_depth = 2
//! max_nodes = 15
//! max_concurrent_ops = 2
//! level = "moderate"
//! ```
//!
//! A row without `max_depth` or `max_nodes` passes the requested value
//! through unchanged.

use crate::{PolicyError, ThrottlingLevel};

/// Base limits for one row of the zone table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ZoneLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<u32>,
    pub max_concurrent_ops: u32,
    pub level: ThrottlingLevel,
}

impl ZoneLimits {
    pub const fn bounded(max_depth: u32, max_nodes: u32, ops: u32, level: ThrottlingLevel) -> Self {
        Self {
            max_depth: Some(max_depth),
            max_nodes: Some(max_nodes),
            max_concurrent_ops: ops,
            level,
        }
    }
}

impl std::fmt::Display for ZoneLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<u32>| v.map_or_else(|| "requested".to_string(), |n| n.to_string());
        write!(
            f,
            "depth={} nodes={} ops={} level={}",
            show(self.max_depth),
            show(self.max_nodes),
            self.max_concurrent_ops,
            self.level,
        )
    }
}

/// Configuration for a [`ThermalPolicy`](crate::ThermalPolicy).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Memory pressure at or above which the node budget is halved.
    pub memory_pressure_ceiling: f64,
    pub optimal: ZoneLimits,
    /// Normal zone with a stable or decreasing trend.
    pub normal_stable: ZoneLimits,
    /// Normal zone with a rising trend.
    pub normal_rising: ZoneLimits,
    pub elevated: ZoneLimits,
    pub critical: ZoneLimits,
    pub shutdown: ZoneLimits,
}

impl PolicyConfig {
    /// Rows in ascending severity, with their names.
    pub fn rows(&self) -> [(&'static str, &ZoneLimits); 6] {
        [
            ("optimal", &self.optimal),
            ("normal_stable", &self.normal_stable),
            ("normal_rising", &self.normal_rising),
            ("elevated", &self.elevated),
            ("critical", &self.critical),
            ("shutdown", &self.shutdown),
        ]
    }

    /// Checks that every row allows no more than the row before it.
    ///
    /// A missing depth or node limit counts as unbounded, so it may only
    /// appear before the first bounded row.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(self.memory_pressure_ceiling > 0.0 && self.memory_pressure_ceiling <= 1.0) {
            return Err(PolicyError::InvalidMemoryCeiling(
                self.memory_pressure_ceiling,
            ));
        }

        let rows = self.rows();
        for pair in rows.windows(2) {
            let (_, prev) = pair[0];
            let (name, row) = pair[1];
            let not_monotone = |detail: String| PolicyError::NotMonotone {
                row: name.to_string(),
                detail,
            };

            if exceeds(row.max_depth, prev.max_depth) {
                return Err(not_monotone(format!(
                    "max_depth {:?} exceeds previous {:?}",
                    row.max_depth, prev.max_depth
                )));
            }
            if exceeds(row.max_nodes, prev.max_nodes) {
                return Err(not_monotone(format!(
                    "max_nodes {:?} exceeds previous {:?}",
                    row.max_nodes, prev.max_nodes
                )));
            }
            if row.max_concurrent_ops > prev.max_concurrent_ops {
                return Err(not_monotone(format!(
                    "max_concurrent_ops {} exceeds previous {}",
                    row.max_concurrent_ops, prev.max_concurrent_ops
                )));
            }
            if row.level < prev.level {
                return Err(not_monotone(format!(
                    "level {} is below previous {}",
                    row.level, prev.level
                )));
            }
        }

        let s = &self.shutdown;
        if s.max_depth != Some(0)
            || s.max_nodes != Some(0)
            || s.max_concurrent_ops != 0
            || s.level != ThrottlingLevel::Emergency
        {
            return Err(PolicyError::ShutdownNotHalting {
                detail: s.to_string(),
            });
        }
        Ok(())
    }
}

/// `None` is unbounded.
fn exceeds(row: Option<u32>, prev: Option<u32>) -> bool {
    match (row, prev) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(r), Some(p)) => r > p,
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            memory_pressure_ceiling: 0.9,
            optimal: ZoneLimits {
                max_depth: None,
                max_nodes: None,
                max_concurrent_ops: 10,
                level: ThrottlingLevel::None,
            },
            normal_stable: ZoneLimits::bounded(5, 50, 5, ThrottlingLevel::None),
            normal_rising: ZoneLimits::bounded(4, 30, 4, ThrottlingLevel::Proactive),
            elevated: ZoneLimits::bounded(2, 15, 2, ThrottlingLevel::Moderate),
            critical: ZoneLimits::bounded(1, 5, 1, ThrottlingLevel::Aggressive),
            shutdown: ZoneLimits::bounded(0, 0, 0, ThrottlingLevel::Emergency),
        }
    }
}
