// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! State → limits mapping.

use crate::{PolicyConfig, PolicyError, ThermalLimits, ThrottlingLevel, Workload, ZoneLimits};
use thermal_monitor::{ThermalState, ThermalTrend, ThermalZone};

/// Maps a [`ThermalState`] and a requested [`Workload`] to [`ThermalLimits`].
///
/// Pure and total: no I/O, every input produces limits. Cheap to clone and
/// share.
#[derive(Debug, Clone, Default)]
pub struct ThermalPolicy {
    config: PolicyConfig,
}

impl ThermalPolicy {
    /// Creates a policy from a validated table.
    pub fn new(config: PolicyConfig) -> Result<Self, PolicyError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the zone table.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Returns the table row that applies to `zone` under `trend`.
    pub fn row(&self, zone: ThermalZone, trend: ThermalTrend) -> &ZoneLimits {
        match zone {
            ThermalZone::Optimal => &self.config.optimal,
            ThermalZone::Normal if trend.is_rising() => &self.config.normal_rising,
            ThermalZone::Normal => &self.config.normal_stable,
            ThermalZone::Elevated => &self.config.elevated,
            ThermalZone::Critical => &self.config.critical,
            ThermalZone::Shutdown => &self.config.shutdown,
        }
    }

    /// Computes the limits for `workload` under `state`.
    ///
    /// Every limit is capped by the requested workload, so for a fixed
    /// workload the result shrinks monotonically with zone severity.
    pub fn recommended_limits(&self, state: &ThermalState, workload: Workload) -> ThermalLimits {
        let row = self.row(state.zone, state.trend);
        let cap = |limit: Option<u32>, requested: u32| limit.map_or(requested, |l| l.min(requested));

        let max_depth = cap(row.max_depth, workload.max_depth);
        let mut max_nodes = cap(row.max_nodes, workload.max_nodes);
        let max_concurrent_ops = row.max_concurrent_ops;
        let mut level = row.level;
        let mut recommendations = Vec::new();

        let memory_bound = state
            .memory_pressure
            .is_some_and(|p| p >= self.config.memory_pressure_ceiling);
        if memory_bound {
            if max_nodes > 0 {
                max_nodes = (max_nodes / 2).max(1);
            }
            level = level.max(ThrottlingLevel::Proactive);
            recommendations.push(format!(
                "memory pressure at {:.0}%: node budget halved",
                state.memory_pressure.unwrap_or_default() * 100.0
            ));
        }

        let predicted = state.predicted_zone();
        if predicted > state.zone {
            recommendations.push(format!(
                "temperature predicted to reach {:.1}°C ({predicted})",
                state.predicted_temp
            ));
        }
        if state.zone == ThermalZone::Shutdown {
            recommendations.push("halt all work until the device cools".to_string());
        } else if state.cooldown_required {
            recommendations.push(format!(
                "allow a {}s cooldown before heavy work",
                state.cooldown_duration_ms / 1000
            ));
        }
        if state.recovery_mode {
            recommendations.push("recovering: keep limits reduced until the zone drops".to_string());
        }

        let limits = ThermalLimits {
            zone: state.zone,
            max_depth,
            max_nodes,
            max_concurrent_ops,
            throttling_active: level.is_active(),
            throttling_level: level,
            reason: None,
            recommendations,
        };
        let reason = (limits.throttling_active || limits.reduces(workload)).then(|| {
            let mut reason = format!(
                "{} zone at {:.1}°C ({})",
                state.zone, state.current_temp, state.trend
            );
            if memory_bound {
                reason.push_str(", memory pressure high");
            }
            reason
        });

        tracing::debug!(
            zone = %state.zone,
            trend = %state.trend,
            "limits: depth {} nodes {} ops {} level {}",
            limits.max_depth,
            limits.max_nodes,
            limits.max_concurrent_ops,
            limits.throttling_level,
        );
        ThermalLimits { reason, ..limits }
    }

    /// Returns `true` if work should be throttled.
    pub fn should_throttle(&self, state: &ThermalState, workload: Workload) -> bool {
        self.recommended_limits(state, workload).throttling_active
    }

    /// Returns the throttling level for `workload` under `state`.
    pub fn throttling_level(&self, state: &ThermalState, workload: Workload) -> ThrottlingLevel {
        self.recommended_limits(state, workload).throttling_level
    }

    /// Returns `true` when no new work should start.
    pub fn is_emergency_mode(&self, state: &ThermalState) -> bool {
        state.zone.is_critical() || state.emergency_mode
    }
}
