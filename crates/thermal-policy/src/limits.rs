// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Limits produced by the policy: the contract between the policy and the
//! components that shrink or reject work.

use thermal_monitor::ThermalZone;

/// How hard the caller should back off, ordered by severity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlingLevel {
    #[default]
    None,
    Proactive,
    Moderate,
    Aggressive,
    Emergency,
}

impl ThrottlingLevel {
    /// All levels in ascending severity.
    pub const ALL: [ThrottlingLevel; 5] = [
        ThrottlingLevel::None,
        ThrottlingLevel::Proactive,
        ThrottlingLevel::Moderate,
        ThrottlingLevel::Aggressive,
        ThrottlingLevel::Emergency,
    ];

    /// Returns `true` for any level above `None`.
    pub fn is_active(self) -> bool {
        self > ThrottlingLevel::None
    }
}

impl std::fmt::Display for ThrottlingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThrottlingLevel::None => "none",
            ThrottlingLevel::Proactive => "proactive",
            ThrottlingLevel::Moderate => "moderate",
            ThrottlingLevel::Aggressive => "aggressive",
            ThrottlingLevel::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// The amount of work a caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Workload {
    /// Requested traversal depth.
    pub max_depth: u32,
    /// Requested node budget.
    pub max_nodes: u32,
}

impl Workload {
    pub fn new(max_depth: u32, max_nodes: u32) -> Self {
        Self {
            max_depth,
            max_nodes,
        }
    }
}

/// Operational limits for one request under one thermal state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ThermalLimits {
    /// Zone the limits were derived from.
    pub zone: ThermalZone,
    pub max_depth: u32,
    pub max_nodes: u32,
    /// Concurrent operations the caller may keep in flight.
    pub max_concurrent_ops: u32,
    pub throttling_active: bool,
    pub throttling_level: ThrottlingLevel,
    /// Why the limits are below the request, if they are.
    pub reason: Option<String>,
    /// Human-readable advice for the operator.
    pub recommendations: Vec<String>,
}

impl ThermalLimits {
    /// Returns `true` if any limit is zero, meaning no work may run.
    pub fn is_zero(&self) -> bool {
        self.max_depth == 0 || self.max_nodes == 0 || self.max_concurrent_ops == 0
    }

    /// Returns `true` if the limits shrink `workload` in either dimension.
    pub fn reduces(&self, workload: Workload) -> bool {
        self.max_depth < workload.max_depth || self.max_nodes < workload.max_nodes
    }

    /// One-line description of the limits.
    pub fn summary(&self) -> String {
        format!(
            "zone={} depth={} nodes={} ops={} throttling={}",
            self.zone, self.max_depth, self.max_nodes, self.max_concurrent_ops, self.throttling_level,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        for pair in ThrottlingLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(!ThrottlingLevel::None.is_active());
        assert!(ThrottlingLevel::Proactive.is_active());
    }

    #[test]
    fn test_level_serde_snake_case() {
        let json = serde_json::to_string(&ThrottlingLevel::Aggressive).unwrap();
        assert_eq!(json, "\"aggressive\"");
        let back: ThrottlingLevel = serde_json::from_str("\"emergency\"").unwrap();
        assert_eq!(back, ThrottlingLevel::Emergency);
    }

    #[test]
    fn test_zero_and_reduction() {
        let limits = ThermalLimits {
            zone: ThermalZone::Elevated,
            max_depth: 2,
            max_nodes: 15,
            max_concurrent_ops: 2,
            throttling_active: true,
            throttling_level: ThrottlingLevel::Moderate,
            reason: None,
            recommendations: Vec::new(),
        };
        assert!(!limits.is_zero());
        assert!(limits.reduces(Workload::new(5, 50)));
        assert!(!limits.reduces(Workload::new(2, 10)));
        assert!(limits.summary().contains("throttling=moderate"));

        let halted = ThermalLimits {
            max_concurrent_ops: 0,
            ..limits
        };
        assert!(halted.is_zero());
    }
}
