// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `thermal-gov policy` command: the limits every zone grants a workload.

use context_service::ServiceConfig;
use thermal_monitor::{ThermalState, ThermalTrend, ThermalZone};
use thermal_policy::{ThermalPolicy, Workload};

pub fn execute(config: &ServiceConfig, depth: u32, nodes: u32, json: bool) -> anyhow::Result<()> {
    let policy = ThermalPolicy::new(config.policy.clone())?;
    let workload = Workload::new(depth, nodes);

    let mut rows = Vec::new();
    for zone in ThermalZone::ALL {
        let trends: &[ThermalTrend] = if zone == ThermalZone::Normal {
            &[ThermalTrend::Stable, ThermalTrend::Rising]
        } else {
            &[ThermalTrend::Stable]
        };
        for &trend in trends {
            let state = ThermalState::new(zone.representative_temperature(), trend);
            let limits = policy.recommended_limits(&state, workload);
            rows.push((state, limits));
        }
    }

    if json {
        let rows: Vec<_> = rows
            .iter()
            .map(|(state, limits)| {
                serde_json::json!({
                    "zone": state.zone,
                    "trend": state.trend,
                    "temperature_c": state.current_temp,
                    "limits": limits,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("  Policy for depth {depth} / nodes {nodes}\n");
    println!(
        "  {:<10} {:<15} {:>6} {:>6} {:>6} {:>5}  {:<10}",
        "Zone", "Trend", "Temp", "Depth", "Nodes", "Ops", "Throttling",
    );
    println!("  {}", "-".repeat(64));
    for (state, limits) in &rows {
        println!(
            "  {:<10} {:<15} {:>5.0}C {:>6} {:>6} {:>5}  {:<10}",
            state.zone.to_string(),
            state.trend.to_string(),
            state.current_temp,
            limits.max_depth,
            limits.max_nodes,
            limits.max_concurrent_ops,
            limits.throttling_level.to_string(),
        );
    }
    println!(
        "\n  Memory pressure at or above {:.0}% halves the node budget.",
        config.policy.memory_pressure_ceiling * 100.0
    );
    Ok(())
}
