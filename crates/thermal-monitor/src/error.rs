// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for thermal probing.

/// Errors that can occur when probing the hardware sensors.
///
/// None of these reach callers of [`ThermalMonitor::sample`](crate::ThermalMonitor::sample):
/// the monitor degrades to a conservative default state instead.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Failed to read a sysfs or procfs file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a numeric value from a sensor file.
    #[error("failed to parse value from {path}: {detail}")]
    ParseError { path: String, detail: String },

    /// The sensor path does not exist on this host.
    #[error("sensor not available: {path}")]
    NotAvailable { path: String },

    /// A scripted probe was constructed without any readings.
    #[error("probe has no readings configured")]
    EmptyScript,
}
