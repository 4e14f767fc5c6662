// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware probes.
//!
//! A [`ThermalProbe`] returns one coarse temperature reading plus an
//! optional memory-pressure reading. Probes are best-effort: the monitor
//! treats any error as "sensor unavailable" and falls back to a
//! conservative default.
//!
//! On Linux, thermal zone 0 (`/sys/class/thermal/thermal_zone0/temp`)
//! reports the SoC/package temperature in millidegrees Celsius.

use crate::memory::{MemoryPressure, MEMINFO_PATH};
use crate::MonitorError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default sysfs path for the CPU thermal zone.
const THERMAL_ZONE_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// One raw reading from a probe.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProbeReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Fraction of physical memory in use, if the probe can read it.
    pub memory_pressure: Option<f64>,
}

/// A source of thermal and memory readings.
#[async_trait]
pub trait ThermalProbe: Send + Sync {
    /// Takes one reading.
    async fn read(&self) -> Result<ProbeReading, MonitorError>;

    /// Short name used in log lines.
    fn name(&self) -> &str;
}

/// Probe backed by Linux sysfs/procfs.
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    thermal_path: PathBuf,
    meminfo_path: PathBuf,
}

impl SysfsProbe {
    /// Creates a probe reading the default thermal zone and `/proc/meminfo`.
    pub fn new() -> Self {
        Self::with_paths(THERMAL_ZONE_PATH, MEMINFO_PATH)
    }

    /// Creates a probe reading from explicit paths.
    pub fn with_paths(thermal_path: impl Into<PathBuf>, meminfo_path: impl Into<PathBuf>) -> Self {
        Self {
            thermal_path: thermal_path.into(),
            meminfo_path: meminfo_path.into(),
        }
    }

    /// Reads the temperature file.
    ///
    /// The kernel reports millidegrees Celsius (e.g. `54321` is 54.321 °C).
    async fn read_temperature(&self) -> Result<f64, MonitorError> {
        let content = read_sysfs_file(&self.thermal_path).await?;
        let millidegrees: i64 = content.parse().map_err(|_| MonitorError::ParseError {
            path: self.thermal_path.display().to_string(),
            detail: format!("expected integer millidegrees, got '{content}'"),
        })?;
        Ok(millidegrees as f64 / 1000.0)
    }
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThermalProbe for SysfsProbe {
    async fn read(&self) -> Result<ProbeReading, MonitorError> {
        let temperature_c = self.read_temperature().await?;

        // Memory is optional: a missing meminfo never hides a good temperature.
        let memory_pressure = match MemoryPressure::read_from(&self.meminfo_path).await {
            Ok(m) => Some(m.pressure()),
            Err(e) => {
                tracing::debug!("memory pressure unavailable: {e}");
                None
            }
        };

        Ok(ProbeReading {
            temperature_c,
            memory_pressure,
        })
    }

    fn name(&self) -> &str {
        "sysfs"
    }
}

/// Probe that replays a fixed sequence of temperatures.
///
/// Each read pops the next temperature; once one value remains it is
/// repeated forever. [`ScriptedProbe::unavailable`] builds a probe that
/// always fails, which exercises the monitor's fallback path.
#[derive(Debug)]
pub struct ScriptedProbe {
    temperatures: Mutex<VecDeque<f64>>,
    memory_pressure: Option<f64>,
    available: bool,
}

impl ScriptedProbe {
    /// Creates a probe replaying `temperatures` in order.
    pub fn new(temperatures: impl IntoIterator<Item = f64>) -> Self {
        Self {
            temperatures: Mutex::new(temperatures.into_iter().collect()),
            memory_pressure: None,
            available: true,
        }
    }

    /// Creates a probe that always reports the same temperature.
    pub fn constant(temperature_c: f64) -> Self {
        Self::new([temperature_c])
    }

    /// Creates a probe whose sensor is never available.
    pub fn unavailable() -> Self {
        Self {
            temperatures: Mutex::new(VecDeque::new()),
            memory_pressure: None,
            available: false,
        }
    }

    /// Reports a fixed memory pressure alongside every temperature.
    pub fn with_memory_pressure(mut self, pressure: f64) -> Self {
        self.memory_pressure = Some(pressure.clamp(0.0, 1.0));
        self
    }

    /// Appends temperatures to the end of the script.
    pub fn push(&self, temperatures: impl IntoIterator<Item = f64>) {
        if let Ok(mut queue) = self.temperatures.lock() {
            queue.extend(temperatures);
        }
    }

    fn next_temperature(&self) -> Option<f64> {
        let mut queue = self.temperatures.lock().ok()?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        }
    }
}

#[async_trait]
impl ThermalProbe for ScriptedProbe {
    async fn read(&self) -> Result<ProbeReading, MonitorError> {
        if !self.available {
            return Err(MonitorError::NotAvailable {
                path: "scripted".to_string(),
            });
        }
        let temperature_c = self.next_temperature().ok_or(MonitorError::EmptyScript)?;
        Ok(ProbeReading {
            temperature_c,
            memory_pressure: self.memory_pressure,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Reads a sysfs/procfs file and returns its trimmed content.
pub(crate) async fn read_sysfs_file(path: &Path) -> Result<String, MonitorError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MonitorError::NotAvailable {
            path: path.display().to_string(),
        }),
        Err(e) => Err(MonitorError::ReadError {
            path: path.display().to_string(),
            source: e,
        }),
    }
}
