// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Thermal annotations and the results of guarded operations.
//!
//! ```text
//! START ──► REJECTED                    (shutdown, zero limits, emergency, ceiling)
//!   │
//!   └──► LIMITS COMPUTED ──► RUNNING ──► COMPLETED
//!                                    ├─► ABORTED  (rapid increase / emergency after the call)
//!                                    └─► ERRORED  (delegate or governor failure)
//! ```

use crate::{PackedContext, SliceResult};
use resource_governor::EmbeddingResult;
use thermal_monitor::{ThermalState, ThermalTrend, ThermalZone};
use thermal_policy::{ThermalLimits, ThrottlingLevel, Workload};

/// Why a guarded call was refused before its delegate ran.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The device is at shutdown temperature.
    ThermalShutdown { temperature_c: f64 },
    /// The policy allows no work at all in this zone.
    ZeroLimits { zone: ThermalZone },
    /// The zone is critical or the state is flagged as an emergency.
    EmergencyMode { zone: ThermalZone, temperature_c: f64 },
    /// The caller's own temperature ceiling is exceeded.
    TemperatureCeiling { temperature_c: f64, ceiling_c: f64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThermalShutdown { temperature_c } => {
                write!(f, "thermal shutdown at {temperature_c:.1}°C")
            }
            Self::ZeroLimits { zone } => write!(f, "no work allowed in the {zone} zone"),
            Self::EmergencyMode {
                zone,
                temperature_c,
            } => write!(f, "emergency mode ({zone}, {temperature_c:.1}°C)"),
            Self::TemperatureCeiling {
                temperature_c,
                ceiling_c,
            } => write!(
                f,
                "temperature {temperature_c:.1}°C above the requested ceiling {ceiling_c:.1}°C"
            ),
        }
    }
}

/// Terminal state of a guarded call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Completed,
    /// Completed, but the temperature rose too fast or an emergency began
    /// during the call. The output is still attached; acting on the flag is
    /// up to the caller.
    Aborted,
    Rejected { reason: RejectionReason },
    Errored { detail: String },
}

impl OperationOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// The delegate ran and returned output.
    pub fn has_output(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Errored { detail } => write!(f, "errored: {detail}"),
        }
    }
}

/// Thermal snapshot attached to a result.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThermalStatus {
    pub zone: ThermalZone,
    pub temperature_c: f64,
    pub trend: ThermalTrend,
    pub predicted_temp: f64,
    pub throttling_level: ThrottlingLevel,
    pub emergency_mode: bool,
    pub cooldown_required: bool,
    pub memory_pressure: Option<f64>,
}

impl ThermalStatus {
    pub fn new(state: &ThermalState, throttling_level: ThrottlingLevel, emergency_mode: bool) -> Self {
        Self {
            zone: state.zone,
            temperature_c: state.current_temp,
            trend: state.trend,
            predicted_temp: state.predicted_temp,
            throttling_level,
            emergency_mode,
            cooldown_required: state.cooldown_required,
            memory_pressure: state.memory_pressure,
        }
    }
}

/// Temperature behaviour over one call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThermalAnalytics {
    pub temp_start: f64,
    pub temp_end: f64,
    /// `temp_end - temp_start`.
    pub delta: f64,
    /// `max(0, 1 - |delta| / scale)`.
    pub efficiency: f64,
    /// Hottest reading observed during the call.
    pub peak_temp: f64,
    /// Readings observed, including the ones before and after the call.
    pub samples: usize,
}

impl ThermalAnalytics {
    /// Summarizes chronologically ordered readings. `None` if there are none.
    pub fn from_readings(readings: &[f64], scale_c: f64) -> Option<Self> {
        let (&temp_start, &temp_end) = (readings.first()?, readings.last()?);
        let delta = temp_end - temp_start;
        let peak_temp = readings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            temp_start,
            temp_end,
            delta,
            efficiency: (1.0 - delta.abs() / scale_c).max(0.0),
            peak_temp,
            samples: readings.len(),
        })
    }
}

/// Result of [`thermal_aware_slice`](crate::ThermalAwareContextService::thermal_aware_slice).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThermalSliceResult {
    pub outcome: OperationOutcome,
    /// Empty unless the delegate ran.
    pub result: SliceResult,
    pub requested: Workload,
    /// Bounds the delegate was called with.
    pub effective: Workload,
    pub depth_reduced: bool,
    pub nodes_reduced: bool,
    pub rapid_increase: bool,
    pub operation_aborted: bool,
    pub emergency_triggered: bool,
    pub limits: ThermalLimits,
    /// Status after the call, or at the point of rejection or failure.
    pub thermal: ThermalStatus,
    /// `None` for rejected calls.
    pub analytics: Option<ThermalAnalytics>,
}

impl ThermalSliceResult {
    pub fn is_rejected(&self) -> bool {
        self.outcome.is_rejected()
    }

    pub fn rejection(&self) -> Option<&RejectionReason> {
        match &self.outcome {
            OperationOutcome::Rejected { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Result of [`thermal_aware_pack`](crate::ThermalAwareContextService::thermal_aware_pack).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThermalPackResult {
    pub outcome: OperationOutcome,
    /// Empty unless the delegate ran.
    pub packed: PackedContext,
    pub rapid_increase: bool,
    pub emergency_triggered: bool,
    pub thermal: ThermalStatus,
    pub analytics: Option<ThermalAnalytics>,
}

impl ThermalPackResult {
    pub fn is_rejected(&self) -> bool {
        self.outcome.is_rejected()
    }
}

/// Result of [`thermal_aware_embed`](crate::ThermalAwareContextService::thermal_aware_embed).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThermalEmbedResult {
    pub outcome: OperationOutcome,
    pub embeddings: Vec<EmbeddingResult>,
    /// The caller asked for GPU but throttling turned the preference off.
    pub gpu_preference_overridden: bool,
    pub emergency_triggered: bool,
    pub thermal: ThermalStatus,
    pub analytics: Option<ThermalAnalytics>,
}

impl ThermalEmbedResult {
    pub fn is_rejected(&self) -> bool {
        self.outcome.is_rejected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_from_readings() {
        let a = ThermalAnalytics::from_readings(&[60.0, 72.0, 70.0], 50.0).unwrap();
        assert_eq!(a.temp_start, 60.0);
        assert_eq!(a.temp_end, 70.0);
        assert_eq!(a.delta, 10.0);
        assert!((a.efficiency - 0.8).abs() < 1e-9);
        assert_eq!(a.peak_temp, 72.0);
        assert_eq!(a.samples, 3);
    }

    #[test]
    fn test_efficiency_uses_absolute_delta_and_floors_at_zero() {
        let cooling = ThermalAnalytics::from_readings(&[80.0, 70.0], 50.0).unwrap();
        assert_eq!(cooling.delta, -10.0);
        assert!((cooling.efficiency - 0.8).abs() < 1e-9);

        let spike = ThermalAnalytics::from_readings(&[40.0, 99.0], 50.0).unwrap();
        assert_eq!(spike.efficiency, 0.0);
    }

    #[test]
    fn test_analytics_single_and_empty() {
        let one = ThermalAnalytics::from_readings(&[65.0], 50.0).unwrap();
        assert_eq!((one.delta, one.efficiency), (0.0, 1.0));
        assert!(ThermalAnalytics::from_readings(&[], 50.0).is_none());
    }

    #[test]
    fn test_outcome_flags() {
        assert!(OperationOutcome::Completed.has_output());
        assert!(OperationOutcome::Aborted.has_output());
        let rejected = OperationOutcome::Rejected {
            reason: RejectionReason::ZeroLimits {
                zone: ThermalZone::Shutdown,
            },
        };
        assert!(rejected.is_rejected());
        assert!(!rejected.has_output());
        assert_eq!(rejected.to_string(), "rejected: no work allowed in the shutdown zone");
    }

    #[test]
    fn test_outcome_serde_tags() {
        let o = OperationOutcome::Rejected {
            reason: RejectionReason::ThermalShutdown {
                temperature_c: 101.0,
            },
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"]["kind"], "thermal_shutdown");
        let back: OperationOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, o);
    }

    #[test]
    fn test_status_from_state() {
        let state = ThermalState::in_zone(ThermalZone::Elevated);
        let s = ThermalStatus::new(&state, ThrottlingLevel::Moderate, false);
        assert_eq!(s.zone, ThermalZone::Elevated);
        assert_eq!(s.temperature_c, 85.0);
        assert!(s.cooldown_required);
        assert!(!s.emergency_mode);
    }
}
