// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the per-request policy path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use thermal_monitor::{ThermalState, ThermalTrend, ThermalZone};
use thermal_policy::{ThermalPolicy, Workload};

fn bench_recommended_limits(c: &mut Criterion) {
    let policy = ThermalPolicy::default();
    let workload = Workload::new(5, 50);
    let states: Vec<ThermalState> = ThermalZone::ALL
        .iter()
        .map(|z| ThermalState::new(z.representative_temperature(), ThermalTrend::Rising))
        .collect();

    c.bench_function("recommended_limits/all_zones", |b| {
        b.iter(|| {
            for state in &states {
                black_box(policy.recommended_limits(black_box(state), workload));
            }
        })
    });
}

fn bench_state_classification(c: &mut Criterion) {
    let window = [71.0, 72.5, 74.0, 78.0, 81.0];
    c.bench_function("thermal_state/classify", |b| {
        b.iter(|| {
            let trend = ThermalTrend::from_window(black_box(&window));
            black_box(ThermalState::new(black_box(81.0), trend))
        })
    });
}

criterion_group!(benches, bench_recommended_limits, bench_state_classification);
criterion_main!(benches);
