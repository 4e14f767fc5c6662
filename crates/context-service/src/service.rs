// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The thermal-aware wrapper around slicing, packing and embedding.
//!
//! Every guarded call follows the same sequence:
//! ```text
//! sample ─► limits ─► admit? ──no──► Rejected (delegate never called)
//!                       │
//!                      yes ─► clamp ─► start sampler ─► delegate ─► stop sampler ─► sample
//!                                                                                   │
//!                                          Completed / Aborted / Errored + analytics ◄┘
//! ```
//! The sampler is owned by the call; dropping the call future stops it.

use crate::{
    ContextConfig, ContextError, ContextPackService, ContextSliceService, OperationOutcome,
    PackOptions, PackedContext, RejectionReason, ServiceConfig, SliceRecipe, SliceResult,
    Subgraph, ThermalAnalytics, ThermalConstraints, ThermalEmbedResult, ThermalPackResult,
    ThermalSliceResult, ThermalStatus,
};
use resource_governor::{EmbeddingOptions, ResourceGovernor};
use std::future::Future;
use std::sync::Arc;
use thermal_monitor::{ThermalMonitor, ThermalProbe, ThermalState, ThermalZone};
use thermal_policy::{ThermalLimits, ThermalPolicy, ThrottlingLevel, Workload};

/// One operation routed through [`ThermalAwareContextService::guarded_operation`].
#[derive(Debug, Clone)]
pub enum GuardedRequest {
    Slice(SliceRecipe),
    Pack {
        subgraph: Subgraph,
        options: PackOptions,
    },
    Embed {
        texts: Vec<String>,
        options: EmbeddingOptions,
    },
}

impl GuardedRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Slice(_) => "slice",
            Self::Pack { .. } => "pack",
            Self::Embed { .. } => "embed",
        }
    }
}

/// Result of [`ThermalAwareContextService::guarded_operation`].
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum GuardedResponse {
    Slice(ThermalSliceResult),
    Pack(ThermalPackResult),
    Embed(ThermalEmbedResult),
}

impl GuardedResponse {
    pub fn outcome(&self) -> &OperationOutcome {
        match self {
            Self::Slice(r) => &r.outcome,
            Self::Pack(r) => &r.outcome,
            Self::Embed(r) => &r.outcome,
        }
    }

    pub fn thermal(&self) -> &ThermalStatus {
        match self {
            Self::Slice(r) => &r.thermal,
            Self::Pack(r) => &r.thermal,
            Self::Embed(r) => &r.thermal,
        }
    }
}

/// What happened around one delegate call.
struct Observation<T> {
    output: Result<T, ContextError>,
    end: ThermalState,
    /// Start, in-call and end temperatures, oldest first.
    readings: Vec<f64>,
}

/// Applies thermal limits to context operations and embedding batches.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use context_service::{
///     ContextPackService, ContextSliceService, SliceRecipe, ThermalAwareContextService,
/// };
/// use thermal_monitor::{MonitorConfig, SysfsProbe, ThermalMonitor};
/// use thermal_policy::ThermalPolicy;
///
/// # async fn example(
/// #     slicer: Arc<dyn ContextSliceService>,
/// #     packer: Arc<dyn ContextPackService>,
/// # ) {
/// let monitor = Arc::new(ThermalMonitor::new(
///     Arc::new(SysfsProbe::new()),
///     MonitorConfig::default(),
/// ));
/// let service = ThermalAwareContextService::new(monitor, ThermalPolicy::default(), slicer, packer);
///
/// let result = service.thermal_aware_slice(SliceRecipe::new(5, 50)).await;
/// if let Some(reason) = result.rejection() {
///     eprintln!("slice refused: {reason}");
/// }
/// # }
/// ```
pub struct ThermalAwareContextService {
    monitor: Arc<ThermalMonitor>,
    policy: ThermalPolicy,
    slicer: Arc<dyn ContextSliceService>,
    packer: Arc<dyn ContextPackService>,
    governor: Option<Arc<ResourceGovernor>>,
    config: ContextConfig,
}

impl ThermalAwareContextService {
    pub fn new(
        monitor: Arc<ThermalMonitor>,
        policy: ThermalPolicy,
        slicer: Arc<dyn ContextSliceService>,
        packer: Arc<dyn ContextPackService>,
    ) -> Self {
        Self {
            monitor,
            policy,
            slicer,
            packer,
            governor: None,
            config: ContextConfig::default(),
        }
    }

    /// Builds the whole stack from one configuration.
    ///
    /// The governor shares the service's monitor as its thermal gate. It is
    /// returned uninitialized; call
    /// [`ResourceGovernor::initialize`] on [`governor`](Self::governor)
    /// before embedding.
    pub fn from_config(
        config: &ServiceConfig,
        probe: Arc<dyn ThermalProbe>,
        slicer: Arc<dyn ContextSliceService>,
        packer: Arc<dyn ContextPackService>,
    ) -> Result<Self, ContextError> {
        config.validate()?;
        let monitor = Arc::new(ThermalMonitor::new(probe, config.monitor.clone()));
        let policy = ThermalPolicy::new(config.policy.clone())?;
        let governor = ResourceGovernor::new(config.governor.clone())?
            .with_thermal_gate(Arc::clone(&monitor), policy.clone());

        tracing::info!(
            devices = config.governor.devices.len(),
            sample_interval_ms = config.monitor.sample_interval_ms,
            "thermal-aware context service configured"
        );
        Ok(Self::new(monitor, policy, slicer, packer)
            .with_governor(Arc::new(governor))
            .with_config(config.context.clone()))
    }

    /// Routes [`thermal_aware_embed`](Self::thermal_aware_embed) through `governor`.
    pub fn with_governor(mut self, governor: Arc<ResourceGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn monitor(&self) -> &Arc<ThermalMonitor> {
        &self.monitor
    }

    pub fn policy(&self) -> &ThermalPolicy {
        &self.policy
    }

    pub fn governor(&self) -> Option<&Arc<ResourceGovernor>> {
        self.governor.as_ref()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Runs one request through the matching guarded wrapper.
    pub async fn guarded_operation(&self, request: GuardedRequest) -> GuardedResponse {
        let operation = request.name();
        let response = match request {
            GuardedRequest::Slice(recipe) => {
                GuardedResponse::Slice(self.thermal_aware_slice(recipe).await)
            }
            GuardedRequest::Pack { subgraph, options } => {
                GuardedResponse::Pack(self.thermal_aware_pack(subgraph, options).await)
            }
            GuardedRequest::Embed { texts, options } => {
                GuardedResponse::Embed(self.thermal_aware_embed(&texts, options).await)
            }
        };
        tracing::debug!(operation, outcome = %response.outcome(), "guarded operation finished");
        response
    }

    /// Slices with depth and node limits clamped to the thermal policy.
    ///
    /// Never calls the delegate in the shutdown zone, when a limit is zero,
    /// or when the recipe's own temperature ceiling is exceeded.
    pub async fn thermal_aware_slice(&self, recipe: SliceRecipe) -> ThermalSliceResult {
        let requested = recipe.workload();
        let state = self.monitor.sample().await;
        let limits = self.policy.recommended_limits(&state, requested);
        let constraints = recipe.thermal_constraints.unwrap_or_default();

        if let Some(reason) = admission(&state, &limits, &constraints) {
            tracing::info!("slice rejected: {reason}");
            let emergency = self.policy.is_emergency_mode(&state);
            return ThermalSliceResult {
                outcome: OperationOutcome::Rejected { reason },
                result: SliceResult::empty(),
                requested,
                effective: Workload::new(0, 0),
                depth_reduced: false,
                nodes_reduced: false,
                rapid_increase: false,
                operation_aborted: false,
                emergency_triggered: false,
                thermal: ThermalStatus::new(&state, limits.throttling_level, emergency),
                limits,
                analytics: None,
            };
        }

        let effective = Workload::new(
            requested.max_depth.min(limits.max_depth),
            requested.max_nodes.min(limits.max_nodes),
        );
        let depth_reduced = effective.max_depth < requested.max_depth;
        let nodes_reduced = effective.max_nodes < requested.max_nodes;
        if depth_reduced || nodes_reduced {
            tracing::debug!(
                zone = %state.zone,
                "slice clamped from depth {} / nodes {} to {} / {}",
                requested.max_depth,
                requested.max_nodes,
                effective.max_depth,
                effective.max_nodes,
            );
        }

        let mut clamped = recipe;
        clamped.max_depth = effective.max_depth;
        clamped.max_nodes = effective.max_nodes;

        let observed = self.observe(&state, self.slicer.slice(clamped)).await;
        let threshold = constraints
            .rapid_increase_threshold
            .unwrap_or(self.config.rapid_increase_threshold_c);
        let assessment = self.assess(&observed, effective, threshold);

        let operation_aborted = assessment.rapid_increase || assessment.emergency;
        let (outcome, result) = match observed.output {
            Ok(result) => (finished(operation_aborted, "slice", &assessment), result),
            Err(e) => (errored("slice", e), SliceResult::empty()),
        };

        ThermalSliceResult {
            outcome,
            result,
            requested,
            effective,
            depth_reduced,
            nodes_reduced,
            rapid_increase: assessment.rapid_increase,
            operation_aborted,
            emergency_triggered: assessment.emergency,
            limits,
            thermal: assessment.status,
            analytics: assessment.analytics,
        }
    }

    /// Packs `subgraph` unless the device is in emergency mode.
    ///
    /// The subgraph is not re-clamped; it is already bounded by its slice.
    pub async fn thermal_aware_pack(
        &self,
        subgraph: Subgraph,
        options: PackOptions,
    ) -> ThermalPackResult {
        let workload = Workload::new(
            subgraph.depth(),
            u32::try_from(subgraph.node_count()).unwrap_or(u32::MAX),
        );
        let state = self.monitor.sample().await;

        if self.policy.is_emergency_mode(&state) {
            let reason = emergency_rejection(&state);
            tracing::info!("pack rejected: {reason}");
            let level = self.policy.throttling_level(&state, workload);
            return ThermalPackResult {
                outcome: OperationOutcome::Rejected { reason },
                packed: PackedContext::empty(),
                rapid_increase: false,
                emergency_triggered: false,
                thermal: ThermalStatus::new(&state, level, true),
                analytics: None,
            };
        }

        let observed = self.observe(&state, self.packer.pack(subgraph, options)).await;
        let assessment = self.assess(&observed, workload, self.config.rapid_increase_threshold_c);

        let aborted = assessment.rapid_increase || assessment.emergency;
        let (outcome, packed) = match observed.output {
            Ok(packed) => (finished(aborted, "pack", &assessment), packed),
            Err(e) => (errored("pack", e), PackedContext::empty()),
        };

        ThermalPackResult {
            outcome,
            packed,
            rapid_increase: assessment.rapid_increase,
            emergency_triggered: assessment.emergency,
            thermal: assessment.status,
            analytics: assessment.analytics,
        }
    }

    /// Embeds `texts` through the attached governor.
    ///
    /// Rejected in emergency mode. At moderate throttling or worse the
    /// caller's GPU preference is turned off, leaving only the governor's
    /// own large-batch rule to pick the GPU.
    pub async fn thermal_aware_embed(
        &self,
        texts: &[String],
        mut options: EmbeddingOptions,
    ) -> ThermalEmbedResult {
        let workload = Workload::new(1, u32::try_from(texts.len()).unwrap_or(u32::MAX));
        let state = self.monitor.sample().await;
        let level = self.policy.throttling_level(&state, workload);

        if self.policy.is_emergency_mode(&state) {
            let reason = emergency_rejection(&state);
            tracing::info!("embedding batch of {} rejected: {reason}", texts.len());
            return ThermalEmbedResult {
                outcome: OperationOutcome::Rejected { reason },
                embeddings: Vec::new(),
                gpu_preference_overridden: false,
                emergency_triggered: false,
                thermal: ThermalStatus::new(&state, level, true),
                analytics: None,
            };
        }

        let gpu_preference_overridden = options.prefer_gpu && level >= ThrottlingLevel::Moderate;
        if gpu_preference_overridden {
            tracing::debug!(%level, "GPU preference disabled by throttling");
            options.prefer_gpu = false;
        }

        let call = async {
            let governor = self.governor.as_ref().ok_or(ContextError::NoGovernor)?;
            Ok::<_, ContextError>(governor.generate_embeddings(texts, options).await?)
        };
        let observed = self.observe(&state, call).await;
        let assessment = self.assess(&observed, workload, self.config.rapid_increase_threshold_c);

        let aborted = assessment.rapid_increase || assessment.emergency;
        let (outcome, embeddings) = match observed.output {
            Ok(embeddings) => (finished(aborted, "embed", &assessment), embeddings),
            Err(e) => (errored("embed", e), Vec::new()),
        };

        ThermalEmbedResult {
            outcome,
            embeddings,
            gpu_preference_overridden,
            emergency_triggered: assessment.emergency,
            thermal: assessment.status,
            analytics: assessment.analytics,
        }
    }

    /// Runs `call` between two samples, with the periodic sampler running
    /// while it is in flight.
    async fn observe<T, F>(&self, start: &ThermalState, call: F) -> Observation<T>
    where
        F: Future<Output = Result<T, ContextError>>,
    {
        let sampler = self
            .config
            .sample_during_calls
            .then(|| self.monitor.start_monitoring());

        let output = call.await;

        let in_call = match sampler {
            Some(sampler) => sampler.stop().await,
            None => Vec::new(),
        };
        let end = self.monitor.sample().await;

        let mut readings = Vec::with_capacity(in_call.len() + 2);
        readings.push(start.current_temp);
        readings.extend(in_call.iter().map(|s| s.current_temp));
        readings.push(end.current_temp);

        Observation {
            output,
            end,
            readings,
        }
    }

    fn assess<T>(
        &self,
        observed: &Observation<T>,
        workload: Workload,
        rapid_threshold_c: f64,
    ) -> Assessment {
        let analytics =
            ThermalAnalytics::from_readings(&observed.readings, self.config.efficiency_scale_c);
        let rapid_increase = analytics
            .as_ref()
            .is_some_and(|a| a.delta >= rapid_threshold_c);
        let emergency = self.policy.is_emergency_mode(&observed.end);
        let level = self.policy.throttling_level(&observed.end, workload);
        Assessment {
            status: ThermalStatus::new(&observed.end, level, emergency),
            analytics,
            rapid_increase,
            emergency,
        }
    }
}

impl std::fmt::Debug for ThermalAwareContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThermalAwareContextService")
            .field("monitor", &self.monitor)
            .field("governor", &self.governor)
            .field("config", &self.config)
            .finish()
    }
}

/// Post-call thermal verdict.
struct Assessment {
    status: ThermalStatus,
    analytics: Option<ThermalAnalytics>,
    rapid_increase: bool,
    emergency: bool,
}

/// Pre-call admission check for slices.
fn admission(
    state: &ThermalState,
    limits: &ThermalLimits,
    constraints: &ThermalConstraints,
) -> Option<RejectionReason> {
    if state.zone == ThermalZone::Shutdown {
        return Some(RejectionReason::ThermalShutdown {
            temperature_c: state.current_temp,
        });
    }
    if let Some(ceiling_c) = constraints.max_temperature {
        if state.current_temp > ceiling_c {
            return Some(RejectionReason::TemperatureCeiling {
                temperature_c: state.current_temp,
                ceiling_c,
            });
        }
    }
    if limits.max_depth == 0 || limits.max_nodes == 0 {
        return Some(RejectionReason::ZeroLimits { zone: state.zone });
    }
    None
}

fn emergency_rejection(state: &ThermalState) -> RejectionReason {
    if state.zone == ThermalZone::Shutdown {
        RejectionReason::ThermalShutdown {
            temperature_c: state.current_temp,
        }
    } else {
        RejectionReason::EmergencyMode {
            zone: state.zone,
            temperature_c: state.current_temp,
        }
    }
}

fn finished(aborted: bool, operation: &str, assessment: &Assessment) -> OperationOutcome {
    if !aborted {
        return OperationOutcome::Completed;
    }
    let delta = assessment.analytics.as_ref().map_or(0.0, |a| a.delta);
    tracing::warn!(
        operation,
        zone = %assessment.status.zone,
        rapid_increase = assessment.rapid_increase,
        emergency = assessment.emergency,
        "temperature changed by {delta:+.1}°C during the call, flagging as aborted"
    );
    OperationOutcome::Aborted
}

fn errored(operation: &str, error: ContextError) -> OperationOutcome {
    tracing::warn!(operation, "guarded call failed: {error}");
    OperationOutcome::Errored {
        detail: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_order() {
        let policy = ThermalPolicy::default();
        let hot = ThermalState::in_zone(ThermalZone::Shutdown);
        let limits = policy.recommended_limits(&hot, Workload::new(5, 50));
        assert!(matches!(
            admission(&hot, &limits, &ThermalConstraints::default()),
            Some(RejectionReason::ThermalShutdown { .. })
        ));

        let warm = ThermalState::in_zone(ThermalZone::Normal);
        let limits = policy.recommended_limits(&warm, Workload::new(5, 50));
        assert_eq!(admission(&warm, &limits, &ThermalConstraints::default()), None);

        let ceiling = ThermalConstraints {
            max_temperature: Some(70.0),
            ..Default::default()
        };
        assert!(matches!(
            admission(&warm, &limits, &ceiling),
            Some(RejectionReason::TemperatureCeiling { ceiling_c, .. }) if ceiling_c == 70.0
        ));
    }

    #[test]
    fn test_zero_request_is_rejected() {
        let policy = ThermalPolicy::default();
        let cool = ThermalState::in_zone(ThermalZone::Optimal);
        let limits = policy.recommended_limits(&cool, Workload::new(0, 10));
        assert_eq!(
            admission(&cool, &limits, &ThermalConstraints::default()),
            Some(RejectionReason::ZeroLimits {
                zone: ThermalZone::Optimal
            })
        );
    }

    #[test]
    fn test_emergency_rejection_reason() {
        let critical = ThermalState::in_zone(ThermalZone::Critical);
        assert!(matches!(
            emergency_rejection(&critical),
            RejectionReason::EmergencyMode {
                zone: ThermalZone::Critical,
                ..
            }
        ));
        let shutdown = ThermalState::in_zone(ThermalZone::Shutdown);
        assert!(matches!(
            emergency_rejection(&shutdown),
            RejectionReason::ThermalShutdown { .. }
        ));
    }

    #[test]
    fn test_request_names() {
        assert_eq!(GuardedRequest::Slice(SliceRecipe::new(1, 1)).name(), "slice");
        let embed = GuardedRequest::Embed {
            texts: vec![],
            options: EmbeddingOptions::default(),
        };
        assert_eq!(embed.name(), "embed");
    }
}
