// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The resource governor.
//!
//! # Dispatch
//! ```text
//! generate_embeddings(texts, options)
//!       │
//!       ├─ thermal gate (optional): shutdown → error, aggressive+ → CPU
//!       ├─ should_use_gpu?
//!       │     yes ─► permit (max_concurrency) ─► reserve ─► embed (deadline) ─► release
//!       │               │ failure, fallback eligible, fallback.to_cpu
//!       │               ▼
//!       └─ CPU ─► chunks of cpu.batch_size, sequential
//! ```

use crate::queue::{run_batcher, run_metrics, QueuedText};
use crate::{
    ComputeTarget, DenseEmbedder, DevicePool, EmbeddingOptions, EmbeddingResult, GovernorConfig,
    GovernorError, GovernorMetrics, GpuDevice, HealthReport, Priority, ShutdownReport,
    SparseEmbedder, SparseVector,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Instant;
use thermal_monitor::{ThermalMonitor, ThermalZone};
use thermal_policy::{ThermalPolicy, ThrottlingLevel, Workload};
use tokio::sync::{mpsc, oneshot, watch, Notify, Semaphore};
use tokio::task::JoinHandle;

/// Safety margin applied to the per-batch memory estimate, as a ratio 5/4.
const MARGIN_NUM: u64 = 5;
const MARGIN_DEN: u64 = 4;

struct ThermalGate {
    monitor: Arc<ThermalMonitor>,
    policy: ThermalPolicy,
}

#[derive(Clone)]
struct Embedders {
    dense: Arc<dyn DenseEmbedder>,
    sparse: Option<Arc<dyn SparseEmbedder>>,
}

/// Counts a batch as in flight until dropped.
struct InFlight<'a>(&'a GovernorCore);

impl<'a> InFlight<'a> {
    fn enter(core: &'a GovernorCore) -> Self {
        core.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(core)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// State shared by the governor handle and its background tasks.
pub(crate) struct GovernorCore {
    config: GovernorConfig,
    pool: DevicePool,
    metrics: Mutex<GovernorMetrics>,
    embedders: RwLock<Option<Embedders>>,
    /// FIFO-fair; bounds concurrent GPU dispatches.
    gpu_slots: Semaphore,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    batch_seq: AtomicU64,
    thermal: OnceLock<ThermalGate>,
}

impl GovernorCore {
    pub(crate) fn config(&self) -> &GovernorConfig {
        &self.config
    }

    fn embedders(&self) -> Result<Embedders, GovernorError> {
        self.embedders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(GovernorError::NotInitialized("embedder"))
    }

    fn with_metrics(&self, f: impl FnOnce(&mut GovernorMetrics)) {
        if let Ok(mut m) = self.metrics.lock() {
            f(&mut m);
        }
    }

    fn next_batch_id(&self) -> String {
        format!("auto-{}", self.batch_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// `ceil(count × bytes_per_text × 1.25)`.
    fn required_bytes(&self, count: usize) -> u64 {
        let raw = (count as u64).saturating_mul(self.config.bytes_per_text.as_bytes());
        raw.saturating_mul(MARGIN_NUM).div_ceil(MARGIN_DEN)
    }

    fn should_use_gpu(&self, count: usize, priority: Priority, prefer_gpu: bool) -> bool {
        let cuda = &self.config.cuda;
        if !cuda.enabled || !self.pool.has_available() {
            return false;
        }
        let half = cuda.batch_size / 2;
        if priority == Priority::High && count < half {
            return prefer_gpu;
        }
        if count >= half {
            return true;
        }
        let roomy = self
            .pool
            .select_device(
                cuda.memory_threshold.as_bytes().saturating_add(1),
                cuda.utilization_ceiling,
            )
            .is_some();
        roomy && (prefer_gpu || cuda.prefer_batching)
    }

    /// Returns `true` if the thermal gate sends this batch to CPU.
    async fn thermal_forces_cpu(&self, count: usize) -> Result<bool, GovernorError> {
        let Some(gate) = self.thermal.get() else {
            return Ok(false);
        };
        let state = gate.monitor.sample().await;
        if state.zone == ThermalZone::Shutdown {
            tracing::warn!("thermal shutdown at {:.1}°C, refusing batch", state.current_temp);
            return Err(GovernorError::ThermalShutdown {
                temperature_c: state.current_temp,
            });
        }
        let workload = Workload::new(1, u32::try_from(count).unwrap_or(u32::MAX));
        let level = gate.policy.throttling_level(&state, workload);
        let force = level >= ThrottlingLevel::Aggressive;
        if force {
            tracing::debug!(zone = %state.zone, %level, "thermal gate routes batch to CPU");
        }
        Ok(force)
    }

    pub(crate) async fn generate_embeddings(
        &self,
        texts: &[String],
        options: &EmbeddingOptions,
    ) -> Result<Vec<EmbeddingResult>, GovernorError> {
        // Registered before the accepting check so `stop` either sees this
        // call in flight or this call sees `stop`.
        let _in_flight = InFlight::enter(self);
        let embedders = self.embedders()?;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(GovernorError::ShuttingDown);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_id = options
            .batch_id
            .clone()
            .unwrap_or_else(|| self.next_batch_id());
        let started = Instant::now();
        let dense = embedders.dense.as_ref();
        let force_cpu = self.thermal_forces_cpu(texts.len()).await?;

        if !force_cpu && self.should_use_gpu(texts.len(), options.priority, options.prefer_gpu) {
            match self.embed_on_gpu(dense, texts, &batch_id).await {
                Ok((vectors, target)) => {
                    let ms = elapsed_ms(started);
                    self.with_metrics(|m| m.record_gpu_batch(texts.len(), ms));
                    tracing::debug!(batch_id = %batch_id, %target, texts = texts.len(), "GPU batch done in {ms:.1} ms");
                    return Ok(EmbeddingResult::batch(vectors, target, ms, &batch_id));
                }
                Err(e) => {
                    if matches!(e, GovernorError::OperationTimeout { .. }) {
                        self.with_metrics(GovernorMetrics::record_timeout);
                    }
                    if !(self.config.fallback.to_cpu && e.is_fallback_eligible()) {
                        self.with_metrics(GovernorMetrics::record_error);
                        return Err(e);
                    }
                    tracing::warn!(batch_id = %batch_id, "GPU dispatch failed, falling back to CPU: {e}");
                    self.with_metrics(GovernorMetrics::record_fallback);
                }
            }
        }

        match self.embed_on_cpu(dense, texts).await {
            Ok(vectors) => {
                let ms = elapsed_ms(started);
                self.with_metrics(|m| m.record_cpu_batch(texts.len(), ms));
                tracing::debug!(batch_id = %batch_id, texts = texts.len(), "CPU batch done in {ms:.1} ms");
                Ok(EmbeddingResult::batch(vectors, ComputeTarget::Cpu, ms, &batch_id))
            }
            Err(e) => {
                if matches!(e, GovernorError::OperationTimeout { .. }) {
                    self.with_metrics(GovernorMetrics::record_timeout);
                }
                self.with_metrics(GovernorMetrics::record_error);
                Err(e)
            }
        }
    }

    async fn embed_on_gpu(
        &self,
        dense: &dyn DenseEmbedder,
        texts: &[String],
        batch_id: &str,
    ) -> Result<(Vec<Vec<f32>>, ComputeTarget), GovernorError> {
        let _permit = self
            .gpu_slots
            .acquire()
            .await
            .map_err(|_| GovernorError::ShuttingDown)?;

        let cuda = &self.config.cuda;
        let required = self.required_bytes(texts.len());
        let device_id = self
            .pool
            .select_device(0, cuda.utilization_ceiling)
            .ok_or_else(|| {
                GovernorError::DeviceUnavailable("every device is offline or saturated".to_string())
            })?;

        let reservation = self.pool.reserve(device_id, required, batch_id)?;
        self.pool.mark_dispatch(device_id, cuda.utilization_per_batch);
        let target = ComputeTarget::Gpu { device_id };
        tracing::debug!(batch_id, %target, bytes = required, texts = texts.len(), "dispatching");

        let vectors = self.call_embedder(dense, texts, target).await?;
        reservation.release();
        Ok((vectors, target))
    }

    async fn embed_on_cpu(
        &self,
        dense: &dyn DenseEmbedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, GovernorError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.cpu.batch_size.max(1)) {
            vectors.extend(self.call_embedder(dense, chunk, ComputeTarget::Cpu).await?);
        }
        Ok(vectors)
    }

    /// Runs one embedder call against the deadline.
    async fn call_embedder(
        &self,
        dense: &dyn DenseEmbedder,
        texts: &[String],
        target: ComputeTarget,
    ) -> Result<Vec<Vec<f32>>, GovernorError> {
        let deadline = self.config.embedder_timeout();
        let vectors = match tokio::time::timeout(deadline, dense.embed(texts, target)).await {
            Err(_) => {
                return Err(GovernorError::OperationTimeout {
                    target,
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(GovernorError::embedder(target, e.message())),
            Ok(Ok(v)) => v,
        };
        if vectors.len() != texts.len() {
            return Err(GovernorError::embedder(
                target,
                &format!(
                    "{} returned {} vectors for {} texts",
                    dense.name(),
                    vectors.len(),
                    texts.len()
                ),
            ));
        }
        Ok(vectors)
    }

    pub(crate) fn refresh_metrics(&self) {
        self.pool.decay(self.config.monitoring.utilization_decay);
        let Ok(mut m) = self.metrics.lock() else {
            return;
        };
        m.refresh_rates();
        let threshold = self.config.monitoring.latency_warn_threshold_ms as f64;
        if m.latency_exceeds(threshold) {
            tracing::warn!(
                "recent batch latency {:.0} ms exceeds {threshold:.0} ms",
                m.rolling_latency_ms
            );
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Handles of the running background tasks.
struct Background {
    shutdown: watch::Sender<bool>,
    queue: mpsc::Sender<QueuedText>,
    batcher: JoinHandle<usize>,
    metrics: JoinHandle<()>,
}

/// Governs embedding batches across GPU devices and the CPU.
///
/// Construct with [`new`](Self::new), optionally attach a thermal gate,
/// then [`initialize`](Self::initialize) with the embedders. [`stop`](Self::stop)
/// returns the governor to its constructed state; it can be initialized again.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use resource_governor::{ByteSize, DeviceSpec, EmbeddingOptions, GovernorConfig, ResourceGovernor};
/// # use resource_governor::DenseEmbedder;
/// # async fn example(embedder: Arc<dyn DenseEmbedder>) -> Result<(), resource_governor::GovernorError> {
///
/// let mut config = GovernorConfig::default();
/// config.devices.push(DeviceSpec::new("gpu0", ByteSize::from_gb(8)));
///
/// let governor = ResourceGovernor::new(config)?;
/// governor.initialize(embedder, None)?;
/// let texts = vec!["hello".to_string(), "world".to_string()];
/// let results = governor.generate_embeddings(&texts, EmbeddingOptions::default()).await?;
/// governor.stop().await;
/// # Ok(()) }
/// ```
pub struct ResourceGovernor {
    core: Arc<GovernorCore>,
    background: Mutex<Option<Background>>,
}

impl ResourceGovernor {
    /// Creates a governor with the devices declared in `config`.
    pub fn new(config: GovernorConfig) -> Result<Self, GovernorError> {
        config.validate()?;
        let pool = DevicePool::new(&config.devices);
        let gpu_slots = Semaphore::new(config.cuda.max_concurrency);
        Ok(Self {
            core: Arc::new(GovernorCore {
                config,
                pool,
                metrics: Mutex::new(GovernorMetrics::default()),
                embedders: RwLock::new(None),
                gpu_slots,
                accepting: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                batch_seq: AtomicU64::new(0),
                thermal: OnceLock::new(),
            }),
            background: Mutex::new(None),
        })
    }

    /// Samples `monitor` before every batch and routes by `policy`.
    ///
    /// Only the first gate attached takes effect.
    pub fn with_thermal_gate(self, monitor: Arc<ThermalMonitor>, policy: ThermalPolicy) -> Self {
        if self
            .core
            .thermal
            .set(ThermalGate { monitor, policy })
            .is_err()
        {
            tracing::warn!("thermal gate already attached, ignoring");
        }
        self
    }

    fn background(&self) -> MutexGuard<'_, Option<Background>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the embedders and starts the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(
        &self,
        dense: Arc<dyn DenseEmbedder>,
        sparse: Option<Arc<dyn SparseEmbedder>>,
    ) -> Result<(), GovernorError> {
        let mut background = self.background();
        if background.is_some() {
            return Err(GovernorError::AlreadyInitialized);
        }

        *self
            .core
            .embedders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Embedders { dense, sparse });
        self.core.accepting.store(true, Ordering::Release);

        let config = &self.core.config;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (queue, queue_rx) = mpsc::channel(config.batching.queue_capacity);
        let batcher = tokio::spawn(run_batcher(
            Arc::clone(&self.core),
            queue_rx,
            shutdown_rx.clone(),
        ));
        let metrics = tokio::spawn(run_metrics(Arc::clone(&self.core), shutdown_rx));

        *background = Some(Background {
            shutdown,
            queue,
            batcher,
            metrics,
        });
        tracing::info!(
            devices = self.core.pool.device_count(),
            gpu = config.cuda.enabled,
            max_concurrency = config.cuda.max_concurrency,
            "resource governor initialized"
        );
        Ok(())
    }

    /// Embeds `texts`, on GPU or CPU per the routing rules.
    ///
    /// Results are in input order and all carry the same batch id.
    pub async fn generate_embeddings(
        &self,
        texts: &[String],
        options: EmbeddingOptions,
    ) -> Result<Vec<EmbeddingResult>, GovernorError> {
        self.core.generate_embeddings(texts, &options).await
    }

    /// Embeds `texts` with the sparse embedder.
    pub async fn generate_sparse_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<SparseVector>, GovernorError> {
        let _in_flight = InFlight::enter(&self.core);
        let sparse = self
            .core
            .embedders()?
            .sparse
            .ok_or(GovernorError::NotInitialized("sparse embedder"))?;
        if !self.core.accepting.load(Ordering::SeqCst) {
            return Err(GovernorError::ShuttingDown);
        }
        let deadline = self.core.config.embedder_timeout();
        match tokio::time::timeout(deadline, sparse.embed_sparse(texts)).await {
            Ok(Ok(vectors)) => Ok(vectors),
            Ok(Err(e)) => {
                self.core.with_metrics(GovernorMetrics::record_error);
                Err(GovernorError::embedder(ComputeTarget::Cpu, e.message()))
            }
            Err(_) => {
                self.core.with_metrics(|m| {
                    m.record_timeout();
                    m.record_error();
                });
                Err(GovernorError::OperationTimeout {
                    target: ComputeTarget::Cpu,
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Queues one text for the next auto-batch and waits for its result.
    ///
    /// Waits for room when the queue is full.
    pub async fn enqueue(&self, text: impl Into<String>) -> Result<EmbeddingResult, GovernorError> {
        let queue = self
            .background()
            .as_ref()
            .map(|b| b.queue.clone())
            .ok_or(GovernorError::NotInitialized("governor"))?;
        let (reply, answer) = oneshot::channel();
        queue
            .send(QueuedText {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| GovernorError::ShuttingDown)?;
        answer.await.map_err(|_| GovernorError::ShuttingDown)?
    }

    /// Routing decision for a batch of `count` texts.
    pub fn should_use_gpu(&self, count: usize, priority: Priority, prefer_gpu: bool) -> bool {
        self.core.should_use_gpu(count, priority, prefer_gpu)
    }

    /// Bytes reserved for a GPU batch of `count` texts.
    pub fn required_bytes(&self, count: usize) -> u64 {
        self.core.required_bytes(count)
    }

    /// Snapshot of the metrics with rates refreshed.
    pub fn get_metrics(&self) -> GovernorMetrics {
        let mut metrics = self
            .core
            .metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        metrics.refresh_rates();
        metrics
    }

    pub fn health_check(&self) -> HealthReport {
        let initialized = self.core.embedders().is_ok();
        let accepting = self.core.accepting.load(Ordering::Acquire);
        let consistent = match self.core.pool.check_invariants() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("health check: {e}");
                false
            }
        };
        HealthReport {
            healthy: initialized && accepting && consistent,
            gpu_available: self.core.config.cuda.enabled && self.core.pool.has_available(),
            device_count: self.core.pool.device_count(),
            metrics: self.get_metrics(),
            outstanding_reservations: self.core.pool.outstanding(),
        }
    }

    pub fn devices(&self) -> Vec<GpuDevice> {
        self.core.pool.snapshot()
    }

    pub fn pool(&self) -> &DevicePool {
        &self.core.pool
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.core.config
    }

    pub fn is_running(&self) -> bool {
        self.background().is_some()
    }

    /// Stops the governor. Idempotent.
    ///
    /// Stops accepting work, cancels both timers, waits up to
    /// `shutdown_grace` for in-flight batches, force-releases whatever
    /// reservations remain, resets devices and metrics, and drops the
    /// embedders.
    pub async fn stop(&self) -> ShutdownReport {
        let background = self.background().take();
        let Some(background) = background else {
            tracing::debug!("resource governor not running, stop is a no-op");
            return ShutdownReport::default();
        };

        let core = &self.core;
        core.accepting.store(false, Ordering::SeqCst);
        let _ = background.shutdown.send(true);
        drop(background.queue);

        let deadline = tokio::time::Instant::now() + core.config.shutdown_grace();
        let batcher_abort = background.batcher.abort_handle();
        let rejected_queued = match tokio::time::timeout_at(deadline, background.batcher).await {
            Ok(Ok(rejected)) => rejected,
            Ok(Err(e)) => {
                tracing::warn!("auto-batcher task failed: {e}");
                0
            }
            Err(_) => {
                tracing::warn!("auto-batcher did not stop within the grace period, aborting");
                batcher_abort.abort();
                0
            }
        };
        let metrics_abort = background.metrics.abort_handle();
        if tokio::time::timeout_at(deadline, background.metrics).await.is_err() {
            metrics_abort.abort();
        }

        let abandoned_batches = match tokio::time::timeout_at(deadline, core.wait_idle()).await {
            Ok(()) => 0,
            Err(_) => {
                let n = core.in_flight.load(Ordering::Acquire);
                tracing::warn!("{n} batches still in flight after the grace period");
                n
            }
        };

        let leaked = core.pool.force_release_all();
        for r in &leaked {
            tracing::warn!(
                batch_id = %r.batch_id,
                device = r.device_id,
                bytes = r.bytes,
                "reservation leaked, force-released"
            );
        }
        core.pool.reset();
        *core
            .embedders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if let Ok(mut m) = core.metrics.lock() {
            *m = GovernorMetrics::default();
        }

        tracing::info!(
            leaked = leaked.len(),
            abandoned_batches,
            rejected_queued,
            "resource governor stopped"
        );
        ShutdownReport {
            stopped: true,
            abandoned_batches,
            leaked_reservations: leaked.len(),
            rejected_queued,
        }
    }
}

impl Drop for ResourceGovernor {
    fn drop(&mut self) {
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(background) = background {
            let _ = background.shutdown.send(true);
            background.batcher.abort();
            background.metrics.abort();
        }
    }
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("running", &self.is_running())
            .field("pool", &self.core.pool)
            .field("thermal_gate", &self.core.thermal.get().is_some())
            .finish()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
