// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Governor configuration.
//!
//! ```toml
//! bytes_per_text = "6K"
//! embedder_timeout_ms = 30000
//!
//! [cuda]
//! enabled = true
//! batch_size = 32
//! max_concurrency = 2
//! memory_threshold = "256M"
//!
//! [[devices]]
//! name = "rtx-4090"
//! memory_total = "24G"
//! compute_capability = "8.9"
//! ```

use crate::{ByteSize, GovernorError};
use std::time::Duration;

/// GPU dispatch settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CudaConfig {
    pub enabled: bool,
    /// Largest batch sent to one device; half of it is the "large batch"
    /// routing threshold.
    pub batch_size: usize,
    /// Concurrent GPU dispatches across all devices.
    pub max_concurrency: usize,
    /// Free memory a device must exceed to take a small batch.
    pub memory_threshold: ByteSize,
    /// Devices at or above this utilization (percent) are skipped.
    pub utilization_ceiling: f64,
    /// Route small batches to a roomy GPU even without `prefer_gpu`.
    pub prefer_batching: bool,
    /// Utilization (percent) added to a device per dispatch.
    pub utilization_per_batch: f64,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 32,
            max_concurrency: 2,
            memory_threshold: ByteSize::from_mb(256),
            utilization_ceiling: 90.0,
            prefer_batching: false,
            utilization_per_batch: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Texts per sequential CPU chunk.
    pub batch_size: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self { batch_size: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Retry a failed GPU batch on CPU.
    pub to_cpu: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { to_cpu: true }
    }
}

/// Auto-batching queue settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Interval between queue drains.
    pub batch_timeout_ms: u64,
    /// Texts the queue holds before submitters wait.
    pub queue_capacity: usize,
}

impl BatchingConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms.max(1))
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_timeout_ms: 50,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub metrics_interval_ms: u64,
    /// Average batch latency above which a warning is logged.
    pub latency_warn_threshold_ms: u64,
    /// Factor applied to device utilization on every metrics tick.
    pub utilization_decay: f64,
}

impl MonitoringConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: 5000,
            latency_warn_threshold_ms: 1000,
            utilization_decay: 0.9,
        }
    }
}

/// A GPU declared in configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    pub memory_total: ByteSize,
    #[serde(default = "default_compute_capability")]
    pub compute_capability: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>, memory_total: ByteSize) -> Self {
        Self {
            name: name.into(),
            memory_total,
            compute_capability: default_compute_capability(),
            available: true,
        }
    }
}

fn default_compute_capability() -> String {
    "unknown".to_string()
}

fn default_available() -> bool {
    true
}

/// Configuration for a [`ResourceGovernor`](crate::ResourceGovernor).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Estimated device memory per text, before the safety margin.
    pub bytes_per_text: ByteSize,
    /// Deadline for a single embedder call.
    pub embedder_timeout_ms: u64,
    /// How long `stop` waits for in-flight batches.
    pub shutdown_grace_ms: u64,
    pub cuda: CudaConfig,
    pub cpu: CpuConfig,
    pub fallback: FallbackConfig,
    pub batching: BatchingConfig,
    pub monitoring: MonitoringConfig,
    pub devices: Vec<DeviceSpec>,
}

impl GovernorConfig {
    pub fn embedder_timeout(&self) -> Duration {
        Duration::from_millis(self.embedder_timeout_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Rejects settings the governor cannot run with.
    pub fn validate(&self) -> Result<(), GovernorError> {
        let fail = |msg: &str| Err(GovernorError::Config(msg.to_string()));
        if self.cuda.batch_size == 0 {
            return fail("cuda.batch_size must be at least 1");
        }
        if self.cuda.max_concurrency == 0 {
            return fail("cuda.max_concurrency must be at least 1");
        }
        if self.cpu.batch_size == 0 {
            return fail("cpu.batch_size must be at least 1");
        }
        if self.batching.queue_capacity == 0 {
            return fail("batching.queue_capacity must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.cuda.utilization_ceiling) {
            return fail("cuda.utilization_ceiling must be within 0..=100");
        }
        if !(0.0..=1.0).contains(&self.monitoring.utilization_decay) {
            return fail("monitoring.utilization_decay must be within 0..=1");
        }
        Ok(())
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            bytes_per_text: ByteSize::from_kb(6),
            embedder_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
            cuda: CudaConfig::default(),
            cpu: CpuConfig::default(),
            fallback: FallbackConfig::default(),
            batching: BatchingConfig::default(),
            monitoring: MonitoringConfig::default(),
            devices: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = GovernorConfig::default();
        assert_eq!(c.cuda.batch_size, 32);
        assert_eq!(c.cuda.memory_threshold, ByteSize::from_mb(256));
        assert_eq!(c.cpu.batch_size, 8);
        assert!(c.fallback.to_cpu);
        assert_eq!(c.batching.batch_timeout(), Duration::from_millis(50));
        assert_eq!(c.embedder_timeout(), Duration::from_secs(30));
        c.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut c = GovernorConfig::default();
        c.cpu.batch_size = 0;
        assert!(matches!(c.validate(), Err(GovernorError::Config(_))));

        let mut c = GovernorConfig::default();
        c.monitoring.utilization_decay = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_toml_with_devices() {
        let text = r#"
            bytes_per_text = "8K"

            [cuda]
            batch_size = 16
            memory_threshold = "1G"

            [[devices]]
            name = "gpu0"
            memory_total = "24G"
            compute_capability = "8.9"

            [[devices]]
            name = "gpu1"
            memory_total = 1073741824
        "#;
        let c: GovernorConfig = toml::from_str(text).unwrap();
        assert_eq!(c.bytes_per_text, ByteSize::from_kb(8));
        assert_eq!(c.cuda.batch_size, 16);
        assert_eq!(c.cuda.max_concurrency, 2);
        assert_eq!(c.devices.len(), 2);
        assert_eq!(c.devices[0].memory_total, ByteSize::from_gb(24));
        assert_eq!(c.devices[1].compute_capability, "unknown");
        assert!(c.devices[1].available);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut c = GovernorConfig::default();
        c.devices.push(DeviceSpec::new("gpu0", ByteSize::from_gb(8)));
        let text = toml::to_string(&c).unwrap();
        let back: GovernorConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, c);
    }
}
