// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Service configuration loaded from TOML files or constructed programmatically.
//!
//! One file configures the whole stack; every section is optional.
//!
//! # TOML Format
//! ```toml
//! [monitor]
//! sample_interval_ms = 250
//!
//! [policy.elevated]
//! max_depth = 3
//! max_nodes = 20
//! max_concurrent_ops = 2
//! level = "moderate"
//!
//! [governor]
//! bytes_per_text = "6K"
//!
//! [[governor.devices]]
//! name = "gpu0"
//! memory_total = "8G"
//!
//! [context]
//! rapid_increase_threshold_c = 12.0
//! ```

use crate::ContextError;
use resource_governor::GovernorConfig;
use std::path::Path;
use thermal_monitor::MonitorConfig;
use thermal_policy::PolicyConfig;

/// Temperature rise within one call that counts as a rapid increase.
pub const DEFAULT_RAPID_INCREASE_C: f64 = 12.0;
/// Absolute delta at which thermal efficiency reaches zero.
pub const DEFAULT_EFFICIENCY_SCALE_C: f64 = 50.0;

/// Settings of the context service itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Rise between the first and last in-call reading that flags the
    /// call as aborted. A recipe may override it.
    pub rapid_increase_threshold_c: f64,
    /// Denominator of the efficiency score `1 - |delta| / scale`.
    pub efficiency_scale_c: f64,
    /// Sample temperature in the background while a delegate runs.
    pub sample_during_calls: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            rapid_increase_threshold_c: DEFAULT_RAPID_INCREASE_C,
            efficiency_scale_c: DEFAULT_EFFICIENCY_SCALE_C,
            sample_during_calls: true,
        }
    }
}

/// Configuration of the full stack: monitor, policy, governor and service.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub monitor: MonitorConfig,
    pub policy: PolicyConfig,
    pub governor: GovernorConfig,
    pub context: ContextConfig,
}

impl ServiceConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ContextError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ContextError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml(toml_str: &str) -> Result<Self, ContextError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ContextError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ContextError> {
        toml::to_string_pretty(self)
            .map_err(|e| ContextError::Config(format!("TOML serialise error: {e}")))
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ContextError> {
        self.policy.validate()?;
        self.governor.validate()?;
        let c = &self.context;
        if !(c.rapid_increase_threshold_c > 0.0) {
            return Err(ContextError::Config(format!(
                "rapid_increase_threshold_c must be positive, got {}",
                c.rapid_increase_threshold_c
            )));
        }
        if !(c.efficiency_scale_c > 0.0) {
            return Err(ContextError::Config(format!(
                "efficiency_scale_c must be positive, got {}",
                c.efficiency_scale_c
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resource_governor::ByteSize;
    use thermal_policy::ThrottlingLevel;

    #[test]
    fn test_default() {
        let c = ServiceConfig::default();
        assert_eq!(c.context.rapid_increase_threshold_c, 12.0);
        assert_eq!(c.context.efficiency_scale_c, 50.0);
        assert!(c.context.sample_during_calls);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[monitor]
sample_interval_ms = 250

[policy.elevated]
max_depth = 3
max_nodes = 20
max_concurrent_ops = 2
level = "moderate"

[governor]
bytes_per_text = "6K"

[[governor.devices]]
name = "gpu0"
memory_total = "8G"

[context]
rapid_increase_threshold_c = 8.0
"#;
        let c = ServiceConfig::from_toml(toml).unwrap();
        assert_eq!(c.monitor.sample_interval_ms, 250);
        assert_eq!(c.monitor.history_capacity, 100);
        assert_eq!(c.policy.elevated.max_depth, Some(3));
        assert_eq!(c.policy.elevated.level, ThrottlingLevel::Moderate);
        assert_eq!(c.governor.devices.len(), 1);
        assert_eq!(c.governor.devices[0].memory_total, ByteSize::from_gb(8));
        assert_eq!(c.context.rapid_increase_threshold_c, 8.0);
        assert!(c.context.sample_during_calls);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(ServiceConfig::from_toml("").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let mut c = ServiceConfig::default();
        c.governor
            .devices
            .push(resource_governor::DeviceSpec::new("gpu0", ByteSize::from_gb(4)));
        let toml = c.to_toml().unwrap();
        let back = ServiceConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_rejects_invalid_sections() {
        let err = ServiceConfig::from_toml("[context]\nrapid_increase_threshold_c = 0.0\n");
        assert!(matches!(err, Err(ContextError::Config(_))));

        let err = ServiceConfig::from_toml(
            "[policy.shutdown]\nmax_depth = 1\nmax_nodes = 0\nmax_concurrent_ops = 0\nlevel = \"emergency\"\n",
        );
        assert!(matches!(err, Err(ContextError::Policy(_))));

        let err = ServiceConfig::from_toml("[governor.cuda]\nbatch_size = 0\n");
        assert!(matches!(err, Err(ContextError::Governor(_))));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            ServiceConfig::from_toml("monitor = 3"),
            Err(ContextError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let err = ServiceConfig::from_file(Path::new("/nonexistent/thermal.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
