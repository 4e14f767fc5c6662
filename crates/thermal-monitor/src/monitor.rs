// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The stateful thermal monitor.
//!
//! [`ThermalMonitor`] owns a probe and a bounded ring buffer of readings.
//! Every [`sample`](ThermalMonitor::sample) reads the probe, appends to the
//! history, and classifies the trend over the most recent window.
//!
//! # Subscriptions
//! ```text
//! monitor.start_monitoring() ──► ThermalSubscription
//!        │                              │ recv() / stop()
//!        │ spawn                        │
//!        ▼                              │
//!   sampler task ── mpsc (bounded) ─────┘
//!        ▲
//!        └── exits on: subscription stop/drop, monitor.stop_monitoring(),
//!            or the receiver going away
//! ```
//!
//! Each subscription owns its own sampler task. Dropping the subscription
//! aborts the task, so no sampler outlives its consumer.

use crate::{MonitorConfig, ThermalProbe, ThermalState, ThermalTrend};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A raw temperature kept in the monitor's history.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ThermalReading {
    pub temperature_c: f64,
    pub timestamp_ms: u64,
}

/// State shared between the monitor handle and its sampler tasks.
struct MonitorInner {
    probe: Arc<dyn ThermalProbe>,
    config: MonitorConfig,
    history: Mutex<VecDeque<ThermalReading>>,
}

impl MonitorInner {
    async fn sample(&self) -> ThermalState {
        match self.probe.read().await {
            Ok(reading) if reading.temperature_c.is_finite() => {
                let window = self.record(reading.temperature_c);
                let trend = ThermalTrend::from_window(&window);
                ThermalState::new(reading.temperature_c, trend)
                    .with_memory_pressure(reading.memory_pressure)
            }
            Ok(reading) => {
                tracing::warn!(
                    probe = self.probe.name(),
                    temperature_c = reading.temperature_c,
                    "thermal probe returned a non-finite reading, using conservative default"
                );
                self.fallback()
            }
            Err(e) => {
                tracing::warn!(
                    probe = self.probe.name(),
                    "thermal probe unavailable, using conservative default: {e}"
                );
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> ThermalState {
        ThermalState::new(self.config.fallback_temperature_c, ThermalTrend::Stable)
    }

    /// Appends a reading and returns the trend window, oldest first.
    fn record(&self, temperature_c: f64) -> Vec<f64> {
        let reading = ThermalReading {
            temperature_c,
            timestamp_ms: crate::state::now_ms(),
        };
        let Ok(mut history) = self.history.lock() else {
            return vec![temperature_c];
        };

        history.push_back(reading);
        while history.len() > self.config.history_capacity.max(1) {
            history.pop_front();
        }

        let window = self.config.effective_trend_window();
        let skip = history.len().saturating_sub(window);
        history.iter().skip(skip).map(|r| r.temperature_c).collect()
    }
}

/// Samples a [`ThermalProbe`] and classifies the result.
///
/// Independent instances never share history.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use thermal_monitor::{MonitorConfig, SysfsProbe, ThermalMonitor};
///
/// # async fn example() {
/// let monitor = ThermalMonitor::new(Arc::new(SysfsProbe::new()), MonitorConfig::default());
/// let state = monitor.sample().await;
/// println!("{}", state.summary());
/// # }
/// ```
pub struct ThermalMonitor {
    inner: Arc<MonitorInner>,
    /// Bumped by `stop_monitoring`; every sampler exits when it changes.
    epoch: watch::Sender<u64>,
}

impl ThermalMonitor {
    /// Creates a monitor over `probe`.
    pub fn new(probe: Arc<dyn ThermalProbe>, config: MonitorConfig) -> Self {
        tracing::debug!(probe = probe.name(), "thermal monitor created");
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                config,
                history: Mutex::new(VecDeque::new()),
            }),
            epoch,
        }
    }

    /// Takes one reading and returns the derived state.
    ///
    /// Never fails: an unavailable probe yields a conservative default
    /// state (zone normal, not critical) and leaves history untouched.
    pub async fn sample(&self) -> ThermalState {
        self.inner.sample().await
    }

    /// Starts a periodic sampler feeding a new subscription.
    ///
    /// The first reading is taken immediately. Readings that do not fit in
    /// the subscription's buffer are dropped rather than stalling the
    /// sampler.
    pub fn start_monitoring(&self) -> ThermalSubscription {
        let config = &self.inner.config;
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut epoch_rx = self.epoch.subscribe();
        let inner = Arc::clone(&self.inner);
        let period = config.sample_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let state = inner.sample().await;
                        match tx.try_send(state) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::trace!("thermal subscriber lagging, reading dropped");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                    _ = epoch_rx.changed() => break,
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!("thermal sampler stopped");
        });

        tracing::debug!("thermal sampler started every {period:?}");
        ThermalSubscription {
            receiver: rx,
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    /// Halts every sampler started by this monitor and clears history.
    pub fn stop_monitoring(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        if let Ok(mut history) = self.inner.history.lock() {
            history.clear();
        }
        tracing::debug!("thermal monitoring stopped, history cleared");
    }

    /// Returns a copy of the history, oldest first.
    pub fn history(&self) -> Vec<ThermalReading> {
        self.inner
            .history
            .lock()
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the most recent reading, if any.
    pub fn latest(&self) -> Option<ThermalReading> {
        self.inner
            .history
            .lock()
            .ok()
            .and_then(|h| h.back().copied())
    }

    /// Trend over the current history window, without taking a new reading.
    pub fn current_trend(&self) -> ThermalTrend {
        let history = self.history();
        let skip = history
            .len()
            .saturating_sub(self.inner.config.effective_trend_window());
        let window: Vec<f64> = history.iter().skip(skip).map(|r| r.temperature_c).collect();
        ThermalTrend::from_window(&window)
    }

    /// Returns the monitor configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ThermalMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThermalMonitor")
            .field("probe", &self.inner.probe.name())
            .field("history_len", &self.history().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Receiving end of a periodic sampler.
///
/// Dropping the subscription stops its sampler.
pub struct ThermalSubscription {
    receiver: mpsc::Receiver<ThermalState>,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ThermalSubscription {
    /// Waits for the next reading; `None` once the sampler has stopped and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<ThermalState> {
        self.receiver.recv().await
    }

    /// Returns a buffered reading without waiting.
    pub fn try_recv(&mut self) -> Option<ThermalState> {
        self.receiver.try_recv().ok()
    }

    /// Stops the sampler, waits for it to exit, and returns every reading
    /// still buffered.
    pub async fn stop(mut self) -> Vec<ThermalState> {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("thermal sampler task failed: {e}");
            }
        }
        let mut remaining = Vec::new();
        while let Ok(state) = self.receiver.try_recv() {
            remaining.push(state);
        }
        remaining
    }
}

impl Drop for ThermalSubscription {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScriptedProbe, ThermalZone};
    use std::time::Duration;

    fn monitor(probe: ScriptedProbe, config: MonitorConfig) -> ThermalMonitor {
        ThermalMonitor::new(Arc::new(probe), config)
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            sample_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sample_appends_history() {
        let m = monitor(ScriptedProbe::new([60.0, 61.0]), MonitorConfig::default());
        let s = m.sample().await;
        assert_eq!(s.current_temp, 60.0);
        assert_eq!(s.trend, ThermalTrend::Stable);
        m.sample().await;
        assert_eq!(m.history().len(), 2);
        assert_eq!(m.latest().unwrap().temperature_c, 61.0);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = MonitorConfig {
            history_capacity: 3,
            ..Default::default()
        };
        let m = monitor(ScriptedProbe::new([1.0, 2.0, 3.0, 4.0, 5.0]), config);
        for _ in 0..5 {
            m.sample().await;
        }
        let temps: Vec<f64> = m.history().iter().map(|r| r.temperature_c).collect();
        assert_eq!(temps, vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_trend_from_history() {
        let m = monitor(
            ScriptedProbe::new([60.0, 62.0, 64.0, 66.0]),
            MonitorConfig::default(),
        );
        let mut last = m.sample().await;
        for _ in 0..3 {
            last = m.sample().await;
        }
        assert_eq!(last.trend, ThermalTrend::Rising);
        assert_eq!(last.predicted_temp, 71.0);
        assert_eq!(m.current_trend(), ThermalTrend::Rising);
    }

    #[tokio::test]
    async fn test_trend_window_ignores_old_samples() {
        let config = MonitorConfig {
            trend_window: 2,
            ..Default::default()
        };
        let m = monitor(ScriptedProbe::new([50.0, 70.0, 70.0]), config);
        m.sample().await;
        assert_eq!(m.sample().await.trend, ThermalTrend::RapidlyRising);
        assert_eq!(m.sample().await.trend, ThermalTrend::Stable);
    }

    #[tokio::test]
    async fn test_unavailable_probe_falls_back() {
        let m = monitor(ScriptedProbe::unavailable(), MonitorConfig::default());
        let s = m.sample().await;
        assert_eq!(s.zone, ThermalZone::Normal);
        assert!(!s.critical);
        assert!(!s.emergency_mode);
        assert!(m.history().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_reading_falls_back() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let m = monitor(ScriptedProbe::constant(bad), MonitorConfig::default());
            let s = m.sample().await;
            assert_eq!(s.zone, ThermalZone::Normal);
            assert_eq!(s.current_temp, 75.0);
            assert!(s.predicted_temp.is_finite());
            assert!(m.history().is_empty());
        }
    }

    #[tokio::test]
    async fn test_subscription_receives_readings() {
        let m = monitor(ScriptedProbe::constant(65.0), fast_config());
        let mut sub = m.start_monitoring();

        let first = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.current_temp, 65.0);

        let _ = sub.stop().await;
        assert!(!m.history().is_empty());
    }

    #[tokio::test]
    async fn test_stop_monitoring_ends_subscriptions_and_clears_history() {
        let m = monitor(ScriptedProbe::constant(65.0), fast_config());
        let mut a = m.start_monitoring();
        let mut b = m.start_monitoring();
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());

        m.stop_monitoring();

        for sub in [&mut a, &mut b] {
            let drained = tokio::time::timeout(Duration::from_secs(1), async {
                while sub.recv().await.is_some() {}
            })
            .await;
            assert!(drained.is_ok(), "sampler did not stop");
        }
        // Late samples from the stopping tasks may land; clear again and check.
        m.stop_monitoring();
        assert!(m.history().is_empty());
    }

    #[tokio::test]
    async fn test_monitoring_restarts_after_stop() {
        let m = monitor(ScriptedProbe::constant(65.0), fast_config());
        m.stop_monitoring();
        let mut sub = m.start_monitoring();
        let got = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
        assert!(matches!(got, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_instances_do_not_share_state() {
        let a = monitor(ScriptedProbe::constant(60.0), MonitorConfig::default());
        let b = monitor(ScriptedProbe::constant(95.0), MonitorConfig::default());
        a.sample().await;
        a.sample().await;
        b.sample().await;
        assert_eq!(a.history().len(), 2);
        assert_eq!(b.history().len(), 1);
        assert_eq!(b.latest().unwrap().temperature_c, 95.0);
    }

    #[test]
    fn test_debug_format() {
        let m = monitor(ScriptedProbe::constant(50.0), MonitorConfig::default());
        let debug = format!("{m:?}");
        assert!(debug.contains("ThermalMonitor"));
        assert!(debug.contains("scripted"));
    }
}
