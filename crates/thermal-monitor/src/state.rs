// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Thermal state snapshot and its pure classifiers.
//!
//! A [`ThermalState`] is an immutable reading enriched with a zone, a
//! trend, and a short-horizon prediction. All derived fields are computed
//! in [`ThermalState::new`], so a state can never disagree with its own
//! temperature.
//!
//! # Zones
//! ```text
//!   optimal  <70 °C
//!   normal   70..80
//!   elevated 80..90
//!   critical 90..100
//!   shutdown ≥100
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lower bound (inclusive) of the normal zone.
pub const NORMAL_THRESHOLD_C: f64 = 70.0;
/// Lower bound (inclusive) of the elevated zone.
pub const ELEVATED_THRESHOLD_C: f64 = 80.0;
/// Lower bound (inclusive) of the critical zone.
pub const CRITICAL_THRESHOLD_C: f64 = 90.0;
/// Lower bound (inclusive) of the shutdown zone.
pub const SHUTDOWN_THRESHOLD_C: f64 = 100.0;

/// Upper clamp for predicted temperatures.
pub const MAX_PREDICTED_C: f64 = 120.0;

/// Discretised severity bucket for the current temperature.
///
/// Variants are declared in severity order, so the derived `Ord` compares
/// severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThermalZone {
    Optimal,
    Normal,
    Elevated,
    Critical,
    Shutdown,
}

impl ThermalZone {
    /// All zones, least severe first.
    pub const ALL: [ThermalZone; 5] = [
        Self::Optimal,
        Self::Normal,
        Self::Elevated,
        Self::Critical,
        Self::Shutdown,
    ];

    /// Classifies a temperature. Monotonic in `celsius`.
    pub fn from_temperature(celsius: f64) -> Self {
        if celsius >= SHUTDOWN_THRESHOLD_C {
            Self::Shutdown
        } else if celsius >= CRITICAL_THRESHOLD_C {
            Self::Critical
        } else if celsius >= ELEVATED_THRESHOLD_C {
            Self::Elevated
        } else if celsius >= NORMAL_THRESHOLD_C {
            Self::Normal
        } else {
            Self::Optimal
        }
    }

    /// A temperature that classifies into this zone (mid-band, or the
    /// threshold itself for shutdown).
    pub fn representative_temperature(self) -> f64 {
        match self {
            Self::Optimal => 55.0,
            Self::Normal => 75.0,
            Self::Elevated => 85.0,
            Self::Critical => 95.0,
            Self::Shutdown => SHUTDOWN_THRESHOLD_C,
        }
    }

    /// Whether this zone counts as critical (critical or shutdown).
    pub fn is_critical(self) -> bool {
        self >= Self::Critical
    }

    /// Cooldown period recommended after entering this zone.
    pub fn cooldown_duration_ms(self) -> u64 {
        match self {
            Self::Optimal | Self::Normal => 0,
            Self::Elevated => 30_000,
            Self::Critical => 60_000,
            Self::Shutdown => 120_000,
        }
    }
}

impl fmt::Display for ThermalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Optimal => "optimal",
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Direction of recent temperature movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalTrend {
    Stable,
    Rising,
    RapidlyRising,
    Decreasing,
}

impl ThermalTrend {
    /// Classifies a window of temperatures, oldest first.
    ///
    /// The trend is the average delta between consecutive samples:
    /// `> 3.0` rapidly rising, `> 0.5` rising, `< -0.5` decreasing,
    /// otherwise stable. Fewer than two samples is always stable.
    pub fn from_window(window: &[f64]) -> Self {
        if window.len() < 2 {
            return Self::Stable;
        }
        let deltas: f64 = window.windows(2).map(|w| w[1] - w[0]).sum();
        let average = deltas / (window.len() - 1) as f64;

        if average > 3.0 {
            Self::RapidlyRising
        } else if average > 0.5 {
            Self::Rising
        } else if average < -0.5 {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }

    /// Fixed per-sample extrapolation used by [`predict_temperature`].
    pub fn projected_delta(self) -> f64 {
        match self {
            Self::RapidlyRising => 10.0,
            Self::Rising => 5.0,
            Self::Stable => 0.0,
            Self::Decreasing => -3.0,
        }
    }

    /// Whether the temperature is climbing at all.
    pub fn is_rising(self) -> bool {
        matches!(self, Self::Rising | Self::RapidlyRising)
    }
}

impl fmt::Display for ThermalTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stable => "stable",
            Self::Rising => "rising",
            Self::RapidlyRising => "rapidly_rising",
            Self::Decreasing => "decreasing",
        };
        f.write_str(s)
    }
}

/// Extrapolates the next temperature from the current one and the trend,
/// clamped to `[0, 120]`.
pub fn predict_temperature(current: f64, trend: ThermalTrend) -> f64 {
    (current + trend.projected_delta()).clamp(0.0, MAX_PREDICTED_C)
}

/// An immutable, fully-derived thermal snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThermalState {
    /// Current temperature in degrees Celsius.
    pub current_temp: f64,
    pub trend: ThermalTrend,
    pub zone: ThermalZone,
    /// `zone` is critical or shutdown.
    pub critical: bool,
    pub predicted_temp: f64,
    /// `zone` is elevated or worse.
    pub cooldown_required: bool,
    pub cooldown_duration_ms: u64,
    /// Hot but already cooling down.
    pub recovery_mode: bool,
    /// Same as `critical`; kept separately because callers key on it.
    pub emergency_mode: bool,
    /// Fraction of physical memory in use, if known.
    pub memory_pressure: Option<f64>,
    /// Unix timestamp in milliseconds when the reading was taken.
    pub timestamp_ms: u64,
}

impl ThermalState {
    /// Builds a state from a temperature and an already-classified trend.
    pub fn new(current_temp: f64, trend: ThermalTrend) -> Self {
        let zone = ThermalZone::from_temperature(current_temp);
        let critical = zone.is_critical();
        let cooldown_required = zone >= ThermalZone::Elevated;

        Self {
            current_temp,
            trend,
            zone,
            critical,
            predicted_temp: predict_temperature(current_temp, trend),
            cooldown_required,
            cooldown_duration_ms: zone.cooldown_duration_ms(),
            recovery_mode: cooldown_required && trend == ThermalTrend::Decreasing,
            emergency_mode: critical,
            memory_pressure: None,
            timestamp_ms: now_ms(),
        }
    }

    /// A stable state in the middle of `zone`.
    pub fn in_zone(zone: ThermalZone) -> Self {
        Self::new(zone.representative_temperature(), ThermalTrend::Stable)
    }

    /// Attaches a memory-pressure reading.
    pub fn with_memory_pressure(mut self, pressure: Option<f64>) -> Self {
        self.memory_pressure = pressure.map(|p| p.clamp(0.0, 1.0));
        self
    }

    /// Zone the prediction falls into.
    pub fn predicted_zone(&self) -> ThermalZone {
        ThermalZone::from_temperature(self.predicted_temp)
    }

    /// One-line description for logs and CLI output.
    ///
    /// ```text
    /// Thermal: 84.0°C elevated (rising, predicted 89.0°C), cooldown 30s
    /// ```
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Thermal: {:.1}°C {} ({}, predicted {:.1}°C)",
            self.current_temp, self.zone, self.trend, self.predicted_temp,
        );
        if self.cooldown_required {
            s.push_str(&format!(", cooldown {}s", self.cooldown_duration_ms / 1000));
        }
        if let Some(p) = self.memory_pressure {
            s.push_str(&format!(", mem {:.0}%", p * 100.0));
        }
        s
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
