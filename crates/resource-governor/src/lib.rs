// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # resource-governor
//!
//! Routes embedding batches between GPU devices and the CPU, with device
//! memory reserved before every GPU dispatch and released on every exit
//! path.
//!
//! # Key Components
//!
//! - [`ResourceGovernor`]: routing, CPU fallback, auto-batching queue,
//!   metrics timer, and graceful shutdown.
//! - [`DevicePool`]: per-device memory and utilization accounting behind
//!   one lock.
//! - [`ReservationGuard`]: RAII handle on a [`MemoryReservation`]. Drop
//!   releases it; releasing twice is a no-op.
//! - [`DenseEmbedder`] / [`SparseEmbedder`]: injected model backends.
//! - [`GovernorMetrics`]: per-instance counters.
//! - [`ByteSize`]: human-readable sizes (`"256M"`, `"8G"`) for configuration.
//!
//! # Memory Accounting
//!
//! ```text
//! required = ceil(texts × bytes_per_text × 1.25)
//!
//! reserve(device, required, batch_id)
//!       │  required > free → ResourceExhausted (nothing debited)
//!       ▼
//!   ReservationGuard ── embed ── release / drop ──► free += required
//! ```
//!
//! For every device, `memory_used + memory_free == memory_total` before and
//! after every call, including failed ones.
//!
//! # Example
//! ```
//! use resource_governor::{ByteSize, DeviceSpec, GovernorConfig, Priority, ResourceGovernor};
//!
//! let mut config = GovernorConfig::default();
//! config.devices.push(DeviceSpec::new("gpu0", ByteSize::from_gb(8)));
//! let governor = ResourceGovernor::new(config).unwrap();
//!
//! // A 16-text batch is at least half of cuda.batch_size (32): GPU.
//! assert!(governor.should_use_gpu(16, Priority::Normal, false));
//! // A small batch goes to GPU only when asked for.
//! assert!(!governor.should_use_gpu(2, Priority::Normal, false));
//! ```

mod config;
mod device;
mod embedder;
mod error;
mod governor;
mod metrics;
mod queue;
mod request;
mod reservation;
mod size;

pub use config::{
    BatchingConfig, CpuConfig, CudaConfig, DeviceSpec, FallbackConfig, GovernorConfig,
    MonitoringConfig,
};
pub use device::{DevicePool, GpuDevice};
pub use embedder::{ComputeTarget, DenseEmbedder, EmbedderError, SparseEmbedder, SparseVector};
pub use error::GovernorError;
pub use governor::ResourceGovernor;
pub use metrics::{GovernorMetrics, LATENCY_WINDOW};
pub use request::{
    DeviceKind, EmbeddingOptions, EmbeddingResult, HealthReport, Priority, ShutdownReport,
};
pub use reservation::{MemoryReservation, ReservationGuard};
pub use size::ByteSize;
