// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `thermal-gov status` command: one reading and what it implies.
//!
//! Reads the temperature from sysfs and memory pressure from procfs. On
//! machines without a thermal zone the monitor reports its fallback
//! temperature and logs a warning; the command still works.

use context_service::ServiceConfig;
use resource_governor::DevicePool;
use std::sync::Arc;
use thermal_monitor::{ScriptedProbe, SysfsProbe, ThermalMonitor, ThermalProbe};
use thermal_policy::{ThermalPolicy, Workload};

pub async fn execute(
    config: &ServiceConfig,
    depth: u32,
    nodes: u32,
    temperature: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let probe: Arc<dyn ThermalProbe> = match temperature {
        Some(t) => Arc::new(ScriptedProbe::constant(t)),
        None => Arc::new(SysfsProbe::new()),
    };
    let monitor = ThermalMonitor::new(probe, config.monitor.clone());
    let policy = ThermalPolicy::new(config.policy.clone())?;

    let state = monitor.sample().await;
    let workload = Workload::new(depth, nodes);
    let limits = policy.recommended_limits(&state, workload);
    let emergency = policy.is_emergency_mode(&state);

    if json {
        let report = serde_json::json!({
            "state": state,
            "workload": workload,
            "limits": limits,
            "emergency_mode": emergency,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            thermal-gov · Thermal Status             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Thermal ────────────────────────────────────────────────
    println!("  Thermal");
    println!(
        "   Temperature:  {:.1} C  {}",
        state.current_temp,
        temp_bar(state.current_temp)
    );
    println!("   Zone:         {} ({})", state.zone, state.trend);
    println!("   Predicted:    {:.1} C ({})", state.predicted_temp, state.predicted_zone());
    if state.cooldown_required {
        println!("   Cooldown:     {} s", state.cooldown_duration_ms / 1000);
    }
    if let Some(p) = state.memory_pressure {
        println!("   Memory:       {:.1}% in use", p * 100.0);
    }
    if emergency {
        println!("   WARNING: EMERGENCY MODE, new work is refused");
    }
    println!();

    // ── Limits ─────────────────────────────────────────────────
    println!("  Limits for depth {depth} / nodes {nodes}");
    println!("   Depth:        {}", limits.max_depth);
    println!("   Nodes:        {}", limits.max_nodes);
    println!("   Concurrency:  {}", limits.max_concurrent_ops);
    println!("   Throttling:   {}", limits.throttling_level);
    if let Some(reason) = &limits.reason {
        println!("   Reason:       {reason}");
    }
    for r in &limits.recommendations {
        println!("   - {r}");
    }
    println!();

    // ── Devices ────────────────────────────────────────────────
    println!("  Devices");
    let devices = DevicePool::new(&config.governor.devices).snapshot();
    if devices.is_empty() {
        println!("   none configured, embeddings run on CPU");
    }
    for d in devices {
        println!(
            "   [{}] {:<12} {:>8.0} MB  cc {}  {}",
            d.id,
            d.name,
            d.memory_total as f64 / (1024.0 * 1024.0),
            d.compute_capability,
            if d.is_available { "available" } else { "offline" },
        );
    }
    println!();
    println!("{}", state.summary());

    Ok(())
}

/// Creates a visual temperature bar (0-100 C scale).
fn temp_bar(celsius: f64) -> String {
    let filled = ((celsius / 100.0) * 20.0).round().max(0.0) as usize;
    let filled = filled.min(20);
    let empty = 20 - filled;
    let symbol = if celsius >= 90.0 {
        "#"
    } else if celsius >= 70.0 {
        "="
    } else {
        "-"
    };
    format!("[{}{}]", symbol.repeat(filled), ".".repeat(empty))
}
