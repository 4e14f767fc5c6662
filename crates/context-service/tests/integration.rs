// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: monitor → policy → service → delegates / governor.
//!
//! Temperatures are scripted, so every test pins the zone it runs in.

use async_trait::async_trait;
use context_service::*;
use resource_governor::{
    ByteSize, ComputeTarget, DenseEmbedder, DeviceKind, DeviceSpec, EmbedderError,
    EmbeddingOptions, GovernorConfig, ResourceGovernor,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thermal_monitor::{MonitorConfig, ScriptedProbe, ThermalMonitor, ThermalZone};
use thermal_policy::{PolicyConfig, ThermalPolicy, ThrottlingLevel, Workload};

// ── Helpers ────────────────────────────────────────────────────

/// Builds a chain subgraph honouring the recipe's bounds.
#[derive(Default)]
struct ChainSlicer {
    calls: AtomicUsize,
    last_recipe: Mutex<Option<SliceRecipe>>,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl ContextSliceService for ChainSlicer {
    async fn slice(&self, recipe: SliceRecipe) -> Result<SliceResult, ContextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_recipe.lock().unwrap() = Some(recipe.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ContextError::slice("graph store unreachable"));
        }
        let count = recipe.max_depth.min(recipe.max_nodes);
        let nodes = (0..count)
            .map(|d| ContextNode {
                id: format!("n{d}"),
                depth: d,
                content: format!("node at depth {d}"),
            })
            .collect();
        Ok(SliceResult {
            subgraph: Subgraph {
                nodes,
                edges: Vec::new(),
            },
            truncated: true,
        })
    }
}

#[derive(Default)]
struct JoinPacker {
    calls: AtomicUsize,
}

#[async_trait]
impl ContextPackService for JoinPacker {
    async fn pack(
        &self,
        subgraph: Subgraph,
        options: PackOptions,
    ) -> Result<PackedContext, ContextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content: Vec<&str> = subgraph.nodes.iter().map(|n| n.content.as_str()).collect();
        let content = content.join("\n");
        let token_count = content.split_whitespace().count().min(options.token_budget);
        Ok(PackedContext {
            content,
            token_count,
            node_count: subgraph.node_count(),
        })
    }
}

struct LengthEmbedder;

#[async_trait]
impl DenseEmbedder for LengthEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _target: ComputeTarget,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
    }
}

struct Harness {
    service: ThermalAwareContextService,
    slicer: Arc<ChainSlicer>,
    packer: Arc<JoinPacker>,
}

fn harness_with(probe: ScriptedProbe, policy: ThermalPolicy, slicer: ChainSlicer) -> Harness {
    let monitor = Arc::new(ThermalMonitor::new(
        Arc::new(probe),
        MonitorConfig {
            sample_interval_ms: 5,
            ..Default::default()
        },
    ));
    let slicer = Arc::new(slicer);
    let packer = Arc::new(JoinPacker::default());
    let service = ThermalAwareContextService::new(
        monitor,
        policy,
        Arc::clone(&slicer) as Arc<dyn ContextSliceService>,
        Arc::clone(&packer) as Arc<dyn ContextPackService>,
    );
    Harness {
        service,
        slicer,
        packer,
    }
}

fn harness(probe: ScriptedProbe) -> Harness {
    harness_with(probe, ThermalPolicy::default(), ChainSlicer::default())
}

fn chain(n: u32) -> Subgraph {
    Subgraph {
        nodes: (0..n)
            .map(|d| ContextNode {
                id: format!("n{d}"),
                depth: d,
                content: format!("node {d}"),
            })
            .collect(),
        edges: Vec::new(),
    }
}

async fn embedding_governor() -> Arc<ResourceGovernor> {
    let mut config = GovernorConfig::default();
    config
        .devices
        .push(DeviceSpec::new("gpu0", ByteSize::from_gb(8)));
    let governor = ResourceGovernor::new(config).unwrap();
    governor.initialize(Arc::new(LengthEmbedder), None).unwrap();
    Arc::new(governor)
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("passage {i}")).collect()
}

// ── Slice ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_rejects_with_empty_subgraph() {
    let h = harness(ScriptedProbe::constant(101.0));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;

    assert!(r.is_rejected());
    assert!(matches!(
        r.rejection(),
        Some(RejectionReason::ThermalShutdown { temperature_c }) if *temperature_c == 101.0
    ));
    assert!(r.result.subgraph.is_empty());
    assert_eq!(r.effective, Workload::new(0, 0));
    assert!(r.analytics.is_none());
    assert_eq!(r.thermal.zone, ThermalZone::Shutdown);
    assert_eq!(r.limits.throttling_level, ThrottlingLevel::Emergency);
    assert_eq!(h.slicer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_elevated_clamps_both_limits() {
    let h = harness(ScriptedProbe::constant(85.0));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;

    assert_eq!(r.outcome, OperationOutcome::Completed);
    assert_eq!(r.requested, Workload::new(5, 50));
    assert_eq!(r.effective, Workload::new(2, 15));
    assert!(r.depth_reduced);
    assert!(r.nodes_reduced);
    assert_eq!(r.limits.max_concurrent_ops, 2);
    assert_eq!(r.limits.throttling_level, ThrottlingLevel::Moderate);

    let seen = h.slicer.last_recipe.lock().unwrap().clone().unwrap();
    assert_eq!((seen.max_depth, seen.max_nodes), (2, 15));
    assert_eq!(r.result.subgraph.node_count(), 2);

    let a = r.analytics.unwrap();
    assert_eq!(a.delta, 0.0);
    assert_eq!(a.efficiency, 1.0);
    assert!(!r.rapid_increase);
    assert!(!r.operation_aborted);
}

#[tokio::test]
async fn test_small_request_is_not_reduced() {
    let h = harness(ScriptedProbe::constant(60.0));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(2, 10)).await;
    assert_eq!(r.effective, Workload::new(2, 10));
    assert!(!r.depth_reduced && !r.nodes_reduced);
    assert_eq!(r.outcome, OperationOutcome::Completed);
}

#[tokio::test]
async fn test_zero_limit_never_calls_delegate() {
    let mut config = PolicyConfig::default();
    config.critical.max_depth = Some(0);
    let policy = ThermalPolicy::new(config).unwrap();
    let h = harness_with(ScriptedProbe::constant(95.0), policy, ChainSlicer::default());

    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;
    assert_eq!(
        r.rejection(),
        Some(&RejectionReason::ZeroLimits {
            zone: ThermalZone::Critical
        })
    );
    assert!(r.result.subgraph.is_empty());
    assert_eq!(h.slicer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_temperature_ceiling_rejects() {
    let h = harness(ScriptedProbe::constant(76.0));
    let recipe = SliceRecipe::new(5, 50).with_constraints(ThermalConstraints {
        max_temperature: Some(72.0),
        ..Default::default()
    });
    let r = h.service.thermal_aware_slice(recipe).await;
    assert!(matches!(
        r.rejection(),
        Some(RejectionReason::TemperatureCeiling { ceiling_c, .. }) if *ceiling_c == 72.0
    ));
    assert_eq!(h.slicer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rapid_increase_flags_result() {
    let h = harness(ScriptedProbe::new([60.0, 85.0]));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;

    assert_eq!(r.outcome, OperationOutcome::Aborted);
    assert!(r.rapid_increase);
    assert!(r.operation_aborted);
    assert!(!r.emergency_triggered);
    // Output is kept; the flag is advisory.
    assert!(!r.result.subgraph.is_empty());

    let a = r.analytics.unwrap();
    assert_eq!(a.temp_start, 60.0);
    assert_eq!(a.temp_end, 85.0);
    assert_eq!(a.delta, 25.0);
    assert!((a.efficiency - 0.5).abs() < 1e-9);
    assert_eq!(r.thermal.zone, ThermalZone::Elevated);
}

#[tokio::test]
async fn test_rise_below_threshold_completes() {
    let h = harness(ScriptedProbe::new([60.0, 71.0]));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;
    assert!(!r.rapid_increase);
    assert_eq!(r.outcome, OperationOutcome::Completed);
}

#[tokio::test]
async fn test_recipe_overrides_rapid_threshold() {
    let h = harness(ScriptedProbe::new([60.0, 64.0]));
    let recipe = SliceRecipe::new(5, 50).with_constraints(ThermalConstraints {
        rapid_increase_threshold: Some(3.0),
        ..Default::default()
    });
    let r = h.service.thermal_aware_slice(recipe).await;
    assert!(r.rapid_increase);
    assert_eq!(r.outcome, OperationOutcome::Aborted);
}

#[tokio::test]
async fn test_emergency_after_call_is_flagged() {
    let h = harness(ScriptedProbe::new([88.0, 92.0]));
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;
    assert!(!r.rapid_increase);
    assert!(r.emergency_triggered);
    assert!(r.operation_aborted);
    assert_eq!(r.outcome, OperationOutcome::Aborted);
    assert!(r.thermal.emergency_mode);
}

#[tokio::test]
async fn test_delegate_error_is_annotated() {
    let slicer = ChainSlicer {
        fail: true,
        ..Default::default()
    };
    let h = harness_with(ScriptedProbe::constant(75.0), ThermalPolicy::default(), slicer);
    let r = h.service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;

    let OperationOutcome::Errored { detail } = &r.outcome else {
        panic!("expected an errored outcome, got {}", r.outcome);
    };
    assert!(detail.contains("graph store unreachable"));
    assert!(r.result.subgraph.is_empty());
    assert_eq!(r.thermal.temperature_c, 75.0);
    assert!(r.analytics.is_some());
    assert_eq!(h.slicer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_samples_while_delegate_runs() {
    let slicer = ChainSlicer {
        delay: Duration::from_millis(60),
        ..Default::default()
    };
    let h = harness_with(
        ScriptedProbe::new([60.0, 70.0, 78.0, 64.0]),
        ThermalPolicy::default(),
        slicer,
    );
    let r = h.service.thermal_aware_slice(SliceRecipe::new(3, 10)).await;

    let a = r.analytics.unwrap();
    assert_eq!(a.temp_start, 60.0);
    assert_eq!(a.temp_end, 64.0);
    assert_eq!(a.peak_temp, 78.0);
    assert!(a.samples >= 4, "only {} samples", a.samples);
    assert_eq!(r.outcome, OperationOutcome::Completed);
}

#[tokio::test]
async fn test_sampling_can_be_disabled() {
    let h = harness(ScriptedProbe::new([60.0, 99.0, 62.0]));
    let service = h.service.with_config(ContextConfig {
        sample_during_calls: false,
        ..Default::default()
    });
    let r = service.thermal_aware_slice(SliceRecipe::new(3, 10)).await;
    let a = r.analytics.unwrap();
    assert_eq!(a.samples, 2);
    assert_eq!((a.temp_start, a.temp_end), (60.0, 99.0));
}

// ── Pack ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_pack_rejected_in_emergency() {
    let h = harness(ScriptedProbe::constant(93.0));
    let r = h.service.thermal_aware_pack(chain(3), PackOptions::default()).await;

    assert!(r.is_rejected());
    assert!(matches!(
        r.outcome,
        OperationOutcome::Rejected {
            reason: RejectionReason::EmergencyMode {
                zone: ThermalZone::Critical,
                ..
            }
        }
    ));
    assert!(r.packed.is_empty());
    assert!(r.analytics.is_none());
    assert_eq!(h.packer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pack_runs_and_annotates() {
    let h = harness(ScriptedProbe::constant(82.0));
    let r = h.service.thermal_aware_pack(chain(4), PackOptions::default()).await;

    assert_eq!(r.outcome, OperationOutcome::Completed);
    assert_eq!(r.packed.node_count, 4);
    assert!(r.packed.content.contains("node 3"));
    assert_eq!(r.thermal.zone, ThermalZone::Elevated);
    assert_eq!(r.analytics.unwrap().temp_end, 82.0);
    assert_eq!(h.packer.calls.load(Ordering::SeqCst), 1);
}

// ── Embed ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_embed_without_governor_errors() {
    let h = harness(ScriptedProbe::constant(60.0));
    let r = h
        .service
        .thermal_aware_embed(&texts(2), EmbeddingOptions::default())
        .await;
    assert!(matches!(
        &r.outcome,
        OperationOutcome::Errored { detail } if detail.contains("no resource governor")
    ));
}

#[tokio::test]
async fn test_embed_runs_through_governor() {
    let governor = embedding_governor().await;
    let h = harness(ScriptedProbe::constant(65.0));
    let service = h.service.with_governor(Arc::clone(&governor));

    let r = service
        .thermal_aware_embed(&texts(3), EmbeddingOptions::default())
        .await;
    assert_eq!(r.outcome, OperationOutcome::Completed);
    assert_eq!(r.embeddings.len(), 3);
    assert!(!r.gpu_preference_overridden);
    // Small batch, GPU preferred, roomy device.
    assert!(r.embeddings.iter().all(|e| e.device == DeviceKind::Gpu));
    governor.stop().await;
}

#[tokio::test]
async fn test_throttling_turns_off_gpu_preference() {
    let governor = embedding_governor().await;
    let h = harness(ScriptedProbe::constant(84.0));
    let service = h.service.with_governor(Arc::clone(&governor));

    let r = service
        .thermal_aware_embed(&texts(3), EmbeddingOptions::default())
        .await;
    assert!(r.gpu_preference_overridden);
    assert_eq!(r.thermal.throttling_level, ThrottlingLevel::Moderate);
    assert!(r.embeddings.iter().all(|e| e.device == DeviceKind::Cpu));
    governor.stop().await;
}

#[tokio::test]
async fn test_embed_rejected_in_emergency() {
    let governor = embedding_governor().await;
    let h = harness(ScriptedProbe::constant(96.0));
    let service = h.service.with_governor(Arc::clone(&governor));

    let r = service
        .thermal_aware_embed(&texts(3), EmbeddingOptions::default())
        .await;
    assert!(r.is_rejected());
    assert!(r.embeddings.is_empty());
    assert_eq!(governor.get_metrics().total_requests, 0);
    governor.stop().await;
}

// ── Guarded dispatch and configuration ─────────────────────────

#[tokio::test]
async fn test_guarded_operation_dispatches() {
    let h = harness(ScriptedProbe::constant(75.0));

    let slice = h
        .service
        .guarded_operation(GuardedRequest::Slice(SliceRecipe::new(5, 50)))
        .await;
    let GuardedResponse::Slice(ref s) = slice else {
        panic!("expected a slice response");
    };
    assert_eq!(s.effective, Workload::new(5, 50));
    assert_eq!(slice.thermal().zone, ThermalZone::Normal);

    let json = serde_json::to_value(&slice).unwrap();
    assert_eq!(json["operation"], "slice");
    assert_eq!(json["outcome"]["status"], "completed");

    let pack = h
        .service
        .guarded_operation(GuardedRequest::Pack {
            subgraph: s.result.subgraph.clone(),
            options: PackOptions::default(),
        })
        .await;
    assert!(matches!(pack, GuardedResponse::Pack(_)));
    assert_eq!(*pack.outcome(), OperationOutcome::Completed);
    assert_eq!(h.packer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_from_config_builds_gated_stack() {
    let mut config = ServiceConfig::default();
    config
        .governor
        .devices
        .push(DeviceSpec::new("gpu0", ByteSize::from_gb(8)));
    config.context.rapid_increase_threshold_c = 5.0;

    let service = ThermalAwareContextService::from_config(
        &config,
        Arc::new(ScriptedProbe::constant(62.0)),
        Arc::new(ChainSlicer::default()),
        Arc::new(JoinPacker::default()),
    )
    .unwrap();
    assert_eq!(service.config().rapid_increase_threshold_c, 5.0);

    let governor = Arc::clone(service.governor().unwrap());
    governor.initialize(Arc::new(LengthEmbedder), None).unwrap();

    let response = service
        .guarded_operation(GuardedRequest::Embed {
            texts: texts(16),
            options: EmbeddingOptions::default(),
        })
        .await;
    let GuardedResponse::Embed(r) = response else {
        panic!("expected an embed response");
    };
    assert_eq!(r.outcome, OperationOutcome::Completed);
    assert_eq!(r.embeddings.len(), 16);
    assert!(r.embeddings.iter().all(|e| e.device == DeviceKind::Gpu));
    assert!(governor.stop().await.stopped);
}

#[tokio::test]
async fn test_from_config_rejects_bad_policy() {
    let mut config = ServiceConfig::default();
    config.policy.shutdown.max_nodes = Some(3);
    let err = ThermalAwareContextService::from_config(
        &config,
        Arc::new(ScriptedProbe::constant(62.0)),
        Arc::new(ChainSlicer::default()),
        Arc::new(JoinPacker::default()),
    )
    .unwrap_err();
    assert!(matches!(err, ContextError::Policy(_)));
}
