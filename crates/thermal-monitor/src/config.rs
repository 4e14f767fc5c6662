// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Monitor configuration.
//!
//! ```toml
//! sample_interval_ms = 1000
//! history_capacity = 100
//! trend_window = 5
//! channel_capacity = 32
//! fallback_temperature_c = 75.0
//! ```

use std::time::Duration;

/// Smallest trend window that can produce a delta.
const MIN_TREND_WINDOW: usize = 2;
/// Largest trend window; older samples are ignored.
const MAX_TREND_WINDOW: usize = 5;

/// Configuration for a [`ThermalMonitor`](crate::ThermalMonitor).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between periodic samples.
    pub sample_interval_ms: u64,
    /// Maximum readings kept in history; the oldest is dropped first.
    pub history_capacity: usize,
    /// Number of most recent readings the trend is computed over (2–5).
    pub trend_window: usize,
    /// Buffer size of each subscription channel.
    pub channel_capacity: usize,
    /// Temperature reported when the probe is unavailable.
    pub fallback_temperature_c: f64,
}

impl MonitorConfig {
    /// Sampling period, never shorter than one millisecond.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    /// Trend window clamped to the supported range.
    pub fn effective_trend_window(&self) -> usize {
        self.trend_window.clamp(MIN_TREND_WINDOW, MAX_TREND_WINDOW)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            history_capacity: 100,
            trend_window: 5,
            channel_capacity: 32,
            fallback_temperature_c: 75.0,
        }
    }
}
