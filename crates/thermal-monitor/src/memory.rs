// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host memory pressure via `/proc/meminfo`.
//!
//! Only `MemTotal` and `MemAvailable` are consulted. Pressure is the
//! fraction of physical memory that is not available to new allocations,
//! which is the figure the policy layer compares against its ceiling.

use crate::MonitorError;
use std::path::Path;

/// Default path to the kernel memory info file.
pub(crate) const MEMINFO_PATH: &str = "/proc/meminfo";

/// A single memory reading.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemoryPressure {
    /// Total physical memory in bytes.
    pub total_bytes: u64,
    /// Memory the kernel reports as available (free + reclaimable) in bytes.
    pub available_bytes: u64,
}

impl MemoryPressure {
    /// Reads memory information from a `/proc/meminfo`-formatted file.
    pub async fn read_from(path: &Path) -> Result<Self, MonitorError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MonitorError::ReadError {
                path: path.display().to_string(),
                source: e,
            })?;
        Self::parse(&content, path)
    }

    /// Parses the content of a `/proc/meminfo`-formatted string.
    pub(crate) fn parse(content: &str, source_path: &Path) -> Result<Self, MonitorError> {
        let mut total_kb = None;
        let mut available_kb = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "MemTotal:" => total_kb = Some(parse_kb(value, source_path)?),
                "MemAvailable:" => available_kb = Some(parse_kb(value, source_path)?),
                _ => {}
            }
            if total_kb.is_some() && available_kb.is_some() {
                break;
            }
        }

        let missing = |field: &str| MonitorError::ParseError {
            path: source_path.display().to_string(),
            detail: format!("{field} not found"),
        };
        let total_kb = total_kb.ok_or_else(|| missing("MemTotal"))?;
        let available_kb = available_kb.ok_or_else(|| missing("MemAvailable"))?;

        Ok(Self {
            total_bytes: total_kb * 1024,
            available_bytes: available_kb.min(total_kb) * 1024,
        })
    }

    /// Fraction of memory in use, in `[0.0, 1.0]`.
    pub fn pressure(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        (used as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

fn parse_kb(s: &str, source_path: &Path) -> Result<u64, MonitorError> {
    s.parse::<u64>().map_err(|_| MonitorError::ParseError {
        path: source_path.display().to_string(),
        detail: format!("expected integer kB value, got '{s}'"),
    })
}
