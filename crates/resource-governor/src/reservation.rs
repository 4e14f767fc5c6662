// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII reservation guard that returns device memory on drop.

use crate::device::PoolInner;
use std::sync::Arc;

/// Device memory held for one in-flight batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MemoryReservation {
    pub device_id: usize,
    pub bytes: u64,
    pub batch_id: String,
    pub timestamp_ms: u64,
}

/// Releases its reservation when dropped.
///
/// Release runs on every exit path, including `?` and panics unwinding
/// through the dispatch. An explicit [`release`](Self::release) followed by
/// the drop releases once.
///
/// ```ignore
/// let guard = pool.reserve(0, bytes, "batch-7")?;
/// embedder.embed(&texts, target).await?;   // early return releases too
/// guard.release();
/// ```
#[must_use = "dropping the guard releases the reservation immediately"]
pub struct ReservationGuard {
    pool: Arc<PoolInner>,
    reservation: MemoryReservation,
    token: u64,
    released: bool,
}

impl ReservationGuard {
    pub(crate) fn new(pool: Arc<PoolInner>, reservation: MemoryReservation, token: u64) -> Self {
        Self {
            pool,
            reservation,
            token,
            released: false,
        }
    }

    pub fn reservation(&self) -> &MemoryReservation {
        &self.reservation
    }

    pub fn bytes(&self) -> u64 {
        self.reservation.bytes
    }

    pub fn device_id(&self) -> usize {
        self.reservation.device_id
    }

    /// Releases now. Returns `false` if the pool had already dropped the
    /// reservation (force-released or reset).
    pub fn release(mut self) -> bool {
        self.release_once()
    }

    fn release_once(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.pool
            .release_reservation(&self.reservation.batch_id, self.token)
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for ReservationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationGuard")
            .field("reservation", &self.reservation)
            .field("released", &self.released)
            .finish()
    }
}
