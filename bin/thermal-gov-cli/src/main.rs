// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # thermal-gov
//!
//! Operator CLI for the thermal-aware resource governor. Inspection only:
//! it reads the sensors and the configuration, it never runs workloads.
//!
//! ## Usage
//! ```bash
//! # Current thermal state and the limits it implies
//! thermal-gov status --depth 5 --nodes 50
//!
//! # Policy table for every zone, from a config file
//! thermal-gov --config governor.toml policy
//!
//! # Write the default configuration
//! thermal-gov config --output governor.toml
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "thermal-gov",
    about = "Thermal-aware resource governor for embedding and context workloads",
    version,
    author
)]
struct Cli {
    /// Path to a TOML service configuration.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the sensors and show the limits for a workload.
    Status {
        /// Requested traversal depth.
        #[arg(long, default_value_t = 5)]
        depth: u32,

        /// Requested node budget.
        #[arg(long, default_value_t = 50)]
        nodes: u32,

        /// Use a fixed temperature instead of the hardware sensor.
        #[arg(long)]
        temperature: Option<f64>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the policy table for every zone and trend.
    Policy {
        #[arg(long, default_value_t = 5)]
        depth: u32,

        #[arg(long, default_value_t = 50)]
        nodes: u32,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Status {
            depth,
            nodes,
            temperature,
            json,
        } => commands::status::execute(&config, depth, nodes, temperature, json).await,
        Commands::Policy { depth, nodes, json } => {
            commands::policy::execute(&config, depth, nodes, json)
        }
        Commands::Config { output } => commands::config::execute(&config, output),
    }
}
