// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-governor dispatch statistics.

use std::collections::VecDeque;

/// Batches kept for the rolling latency mean.
pub const LATENCY_WINDOW: usize = 32;

/// Cumulative counters for one governor instance. Reset by `stop`.
///
/// Request counters count texts, not calls.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct GovernorMetrics {
    pub total_requests: u64,
    pub gpu_requests: u64,
    pub cpu_requests: u64,
    /// Mean batch wall time since the last reset.
    pub average_latency_ms: f64,
    /// Mean of the last [`LATENCY_WINDOW`] batches.
    pub rolling_latency_ms: f64,
    /// `cpu_requests / total_requests`, refreshed by the metrics timer.
    pub fallback_rate: f64,
    /// `gpu_requests / total_requests`, refreshed by the metrics timer.
    pub batch_efficiency: f64,
    pub error_count: u64,
    /// GPU batches retried on CPU.
    pub fallback_count: u64,
    pub timeout_count: u64,
    pub batches_processed: u64,
    #[serde(skip)]
    recent_latencies: VecDeque<f64>,
}

impl GovernorMetrics {
    pub(crate) fn record_gpu_batch(&mut self, texts: usize, latency_ms: f64) {
        self.gpu_requests += texts as u64;
        self.record_batch(texts, latency_ms);
    }

    pub(crate) fn record_cpu_batch(&mut self, texts: usize, latency_ms: f64) {
        self.cpu_requests += texts as u64;
        self.record_batch(texts, latency_ms);
    }

    fn record_batch(&mut self, texts: usize, latency_ms: f64) {
        self.total_requests += texts as u64;
        self.batches_processed += 1;
        let n = self.batches_processed as f64;
        self.average_latency_ms += (latency_ms - self.average_latency_ms) / n;

        if self.recent_latencies.len() == LATENCY_WINDOW {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency_ms);
        self.rolling_latency_ms =
            self.recent_latencies.iter().sum::<f64>() / self.recent_latencies.len() as f64;
    }

    /// True when the rolling mean is above `threshold_ms`.
    pub(crate) fn latency_exceeds(&self, threshold_ms: f64) -> bool {
        !self.recent_latencies.is_empty() && self.rolling_latency_ms > threshold_ms
    }

    pub(crate) fn record_fallback(&mut self) {
        self.fallback_count += 1;
    }

    pub(crate) fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeout_count += 1;
    }

    /// Recomputes the derived rates from the counters.
    pub(crate) fn refresh_rates(&mut self) {
        if self.total_requests == 0 {
            self.fallback_rate = 0.0;
            self.batch_efficiency = 0.0;
            return;
        }
        let total = self.total_requests as f64;
        self.fallback_rate = self.cpu_requests as f64 / total;
        self.batch_efficiency = self.gpu_requests as f64 / total;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Requests: {} total ({} gpu, {} cpu), {} batches, avg {:.1} ms (recent {:.1} ms), \
             fallback rate {:.0}%, {} fallbacks, {} timeouts, {} errors",
            self.total_requests,
            self.gpu_requests,
            self.cpu_requests,
            self.batches_processed,
            self.average_latency_ms,
            self.rolling_latency_ms,
            self.fallback_rate * 100.0,
            self.fallback_count,
            self.timeout_count,
            self.error_count,
        )
    }
}
