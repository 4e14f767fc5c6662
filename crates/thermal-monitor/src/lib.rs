// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # thermal-monitor
//!
//! Samples host temperature and memory pressure and turns each reading
//! into a [`ThermalState`]: zone, trend, prediction, and cooldown advice.
//!
//! # Components
//! - [`ThermalProbe`]: async source of raw readings. [`SysfsProbe`] reads
//!   `/sys/class/thermal` and `/proc/meminfo`; [`ScriptedProbe`] replays a
//!   fixed sequence for tests and previews.
//! - [`ThermalMonitor`]: owns a probe and a bounded history, and hands out
//!   [`ThermalSubscription`]s backed by periodic sampler tasks.
//! - [`ThermalZone`] and [`ThermalTrend`]: pure classifiers.
//!
//! # Graceful Degradation
//! Thermal unavailability never blocks work. When the probe fails the
//! monitor reports a conservative mid-range state (zone `normal`, not
//! critical) and logs a warning.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use thermal_monitor::{MonitorConfig, ScriptedProbe, ThermalMonitor, ThermalZone};
//!
//! # tokio_test_block(async {
//! let monitor = ThermalMonitor::new(
//!     Arc::new(ScriptedProbe::constant(85.0)),
//!     MonitorConfig::default(),
//! );
//! let state = monitor.sample().await;
//! assert_eq!(state.zone, ThermalZone::Elevated);
//! assert!(state.cooldown_required);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod config;
mod error;
mod memory;
mod monitor;
mod state;
mod thermal;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use memory::MemoryPressure;
pub use monitor::{ThermalMonitor, ThermalReading, ThermalSubscription};
pub use state::{
    predict_temperature, ThermalState, ThermalTrend, ThermalZone, CRITICAL_THRESHOLD_C,
    ELEVATED_THRESHOLD_C, NORMAL_THRESHOLD_C, SHUTDOWN_THRESHOLD_C,
};
pub use thermal::{ProbeReading, ScriptedProbe, SysfsProbe, ThermalProbe};
