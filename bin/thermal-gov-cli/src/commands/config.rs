// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `thermal-gov config` command: print or write the effective configuration.

use context_service::ServiceConfig;
use std::path::PathBuf;

pub fn execute(config: &ServiceConfig, output: Option<PathBuf>) -> anyhow::Result<()> {
    config.validate()?;
    let toml = config.to_toml()?;
    match output {
        Some(path) => {
            std::fs::write(&path, toml).map_err(|e| {
                anyhow::anyhow!("cannot write config to '{}': {e}", path.display())
            })?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{toml}"),
    }
    Ok(())
}
