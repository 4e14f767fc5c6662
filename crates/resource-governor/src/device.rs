// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device pool with memory reservation accounting.
//!
//! The [`DevicePool`] is the only cross-task mutable state in the governor.
//! It tracks every GPU's memory and utilization and the table of active
//! reservations. All mutation happens behind one mutex, so for every device
//! `memory_used + memory_free == memory_total` holds whenever the lock is
//! released.
//!
//! # Reservation Lifecycle
//! ```text
//! DevicePool::reserve(device, bytes, batch_id)
//!       │  debit free, credit used, record (batch_id → token)
//!       ▼
//!   ReservationGuard  ◄─── holds Arc<PoolInner> + token
//!       │
//!       │  release() or drop()
//!       ▼
//!   PoolInner::release_reservation(batch_id, token)
//!       │  token matches? credit free, debit used, remove entry
//!       ▼  otherwise no-op
//! ```
//!
//! The token makes release idempotent: once an entry is gone (released,
//! force-released at shutdown, or reset) a late guard drop changes nothing.

use crate::{DeviceSpec, GovernorError, MemoryReservation, ReservationGuard};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One GPU and its live accounting.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GpuDevice {
    pub id: usize,
    pub name: String,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub compute_capability: String,
    pub is_available: bool,
    /// Percent, `0..=100`.
    pub utilization: f64,
}

impl GpuDevice {
    fn from_spec(id: usize, spec: &DeviceSpec) -> Self {
        let total = spec.memory_total.as_bytes();
        Self {
            id,
            name: spec.name.clone(),
            memory_total: total,
            memory_used: 0,
            memory_free: total,
            compute_capability: spec.compute_capability.clone(),
            is_available: spec.available,
            utilization: 0.0,
        }
    }

    fn credit(&mut self, bytes: u64) {
        self.memory_used = self.memory_used.saturating_sub(bytes);
        self.memory_free = self.memory_total - self.memory_used;
    }
}

struct ActiveReservation {
    reservation: MemoryReservation,
    token: u64,
}

struct PoolState {
    devices: Vec<GpuDevice>,
    reservations: HashMap<String, ActiveReservation>,
    next_token: u64,
}

impl PoolState {
    fn remove(&mut self, batch_id: &str) -> Option<MemoryReservation> {
        let active = self.reservations.remove(batch_id)?;
        let r = active.reservation;
        if let Some(device) = self.devices.get_mut(r.device_id) {
            device.credit(r.bytes);
        }
        Some(r)
    }
}

/// State shared between the pool and its reservation guards.
pub(crate) struct PoolInner {
    state: Mutex<PoolState>,
}

impl PoolInner {
    /// Releases `batch_id` if it is still held by `token`.
    pub(crate) fn release_reservation(&self, batch_id: &str, token: u64) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let owned = state
            .reservations
            .get(batch_id)
            .is_some_and(|active| active.token == token);
        if !owned {
            return false;
        }
        match state.remove(batch_id) {
            Some(r) => {
                tracing::debug!(batch_id, device = r.device_id, bytes = r.bytes, "reservation released");
                true
            }
            None => false,
        }
    }
}

/// GPU devices plus the reservation table.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct DevicePool {
    inner: Arc<PoolInner>,
}

impl DevicePool {
    /// Creates a pool from device declarations; ids follow declaration order.
    pub fn new(specs: &[DeviceSpec]) -> Self {
        let devices = specs
            .iter()
            .enumerate()
            .map(|(id, spec)| GpuDevice::from_spec(id, spec))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    devices,
                    reservations: HashMap::new(),
                    next_token: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>, GovernorError> {
        self.inner
            .state
            .lock()
            .map_err(|_| GovernorError::PoolCorruption("device pool lock poisoned".to_string()))
    }

    /// Reserves `bytes` on `device_id` for `batch_id`.
    ///
    /// Fails fast with [`GovernorError::ResourceExhausted`] when the device
    /// does not have `bytes` free. Nothing is debited on failure.
    pub fn reserve(
        &self,
        device_id: usize,
        bytes: u64,
        batch_id: &str,
    ) -> Result<ReservationGuard, GovernorError> {
        let mut state = self.lock()?;
        if state.reservations.contains_key(batch_id) {
            return Err(GovernorError::DuplicateReservation(batch_id.to_string()));
        }

        let device = state
            .devices
            .get_mut(device_id)
            .ok_or(GovernorError::UnknownDevice(device_id))?;
        if !device.is_available {
            return Err(GovernorError::DeviceUnavailable(format!(
                "device {device_id} ({}) is offline",
                device.name
            )));
        }
        if bytes > device.memory_free {
            return Err(GovernorError::ResourceExhausted {
                device_id,
                required_bytes: bytes,
                free_bytes: device.memory_free,
            });
        }

        device.memory_used += bytes;
        device.memory_free -= bytes;

        let token = state.next_token;
        state.next_token += 1;
        let reservation = MemoryReservation {
            device_id,
            bytes,
            batch_id: batch_id.to_string(),
            timestamp_ms: now_ms(),
        };
        state.reservations.insert(
            batch_id.to_string(),
            ActiveReservation {
                reservation: reservation.clone(),
                token,
            },
        );
        tracing::debug!(batch_id, device = device_id, bytes, "reservation taken");

        Ok(ReservationGuard::new(Arc::clone(&self.inner), reservation, token))
    }

    /// Releases the reservation held by `batch_id`. A second call is a no-op.
    pub fn release(&self, batch_id: &str) -> bool {
        match self.lock() {
            Ok(mut state) => state.remove(batch_id).is_some(),
            Err(_) => false,
        }
    }

    /// Picks the available device with the most free memory among those
    /// below `utilization_ceiling` and with at least `min_free` bytes free.
    pub fn select_device(&self, min_free: u64, utilization_ceiling: f64) -> Option<usize> {
        let state = self.lock().ok()?;
        state
            .devices
            .iter()
            .filter(|d| {
                d.is_available && d.utilization < utilization_ceiling && d.memory_free >= min_free
            })
            .max_by_key(|d| d.memory_free)
            .map(|d| d.id)
    }

    /// Returns `true` if any device is available.
    pub fn has_available(&self) -> bool {
        self.lock()
            .map(|s| s.devices.iter().any(|d| d.is_available))
            .unwrap_or(false)
    }

    /// Adds `percent` utilization to a device, capped at 100.
    pub fn mark_dispatch(&self, device_id: usize, percent: f64) {
        if let Ok(mut state) = self.lock() {
            if let Some(d) = state.devices.get_mut(device_id) {
                d.utilization = (d.utilization + percent).min(100.0);
            }
        }
    }

    /// Multiplies every device's utilization by `factor`.
    pub fn decay(&self, factor: f64) {
        if let Ok(mut state) = self.lock() {
            for d in &mut state.devices {
                d.utilization *= factor;
            }
        }
    }

    /// Marks a device online or offline.
    pub fn set_available(&self, device_id: usize, available: bool) -> Result<(), GovernorError> {
        let mut state = self.lock()?;
        let device = state
            .devices
            .get_mut(device_id)
            .ok_or(GovernorError::UnknownDevice(device_id))?;
        device.is_available = available;
        Ok(())
    }

    /// Releases every outstanding reservation and returns them.
    pub fn force_release_all(&self) -> Vec<MemoryReservation> {
        let Ok(mut state) = self.lock() else {
            return Vec::new();
        };
        let ids: Vec<String> = state.reservations.keys().cloned().collect();
        ids.iter().filter_map(|id| state.remove(id)).collect()
    }

    /// Restores every device to full free memory and zero utilization.
    pub fn reset(&self) {
        if let Ok(mut state) = self.lock() {
            state.reservations.clear();
            for d in &mut state.devices {
                d.memory_used = 0;
                d.memory_free = d.memory_total;
                d.utilization = 0.0;
            }
        }
    }

    /// Returns a copy of every device.
    pub fn snapshot(&self) -> Vec<GpuDevice> {
        self.lock().map(|s| s.devices.clone()).unwrap_or_default()
    }

    pub fn device_count(&self) -> usize {
        self.lock().map(|s| s.devices.len()).unwrap_or(0)
    }

    /// Number of reservations not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock().map(|s| s.reservations.len()).unwrap_or(0)
    }

    /// Checks that every device balances and that reserved bytes match
    /// each device's used memory.
    pub fn check_invariants(&self) -> Result<(), GovernorError> {
        let state = self.lock()?;
        for d in &state.devices {
            if d.memory_used + d.memory_free != d.memory_total {
                return Err(GovernorError::PoolCorruption(format!(
                    "device {}: used {} + free {} != total {}",
                    d.id, d.memory_used, d.memory_free, d.memory_total
                )));
            }
            let reserved: u64 = state
                .reservations
                .values()
                .filter(|a| a.reservation.device_id == d.id)
                .map(|a| a.reservation.bytes)
                .sum();
            if reserved != d.memory_used {
                return Err(GovernorError::PoolCorruption(format!(
                    "device {}: {} bytes reserved but {} used",
                    d.id, reserved, d.memory_used
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DevicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePool")
            .field("devices", &self.device_count())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteSize;

    fn pool(sizes_mb: &[u64]) -> DevicePool {
        let specs: Vec<DeviceSpec> = sizes_mb
            .iter()
            .enumerate()
            .map(|(i, mb)| DeviceSpec::new(format!("gpu{i}"), ByteSize::from_mb(*mb)))
            .collect();
        DevicePool::new(&specs)
    }

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_reserve_debits_and_drop_credits() {
        let p = pool(&[8]);
        let guard = p.reserve(0, 3 * MB, "a").unwrap();
        let d = p.snapshot().remove(0);
        assert_eq!((d.memory_used, d.memory_free), (3 * MB, 5 * MB));
        assert_eq!(guard.bytes(), 3 * MB);
        p.check_invariants().unwrap();

        drop(guard);
        let d = p.snapshot().remove(0);
        assert_eq!((d.memory_used, d.memory_free), (0, 8 * MB));
        assert_eq!(p.outstanding(), 0);
    }

    #[test]
    fn test_exhausted_reserve_changes_nothing() {
        let p = pool(&[1]);
        let err = p.reserve(0, 2 * MB, "big").unwrap_err();
        assert!(matches!(
            err,
            GovernorError::ResourceExhausted { required_bytes, free_bytes, .. }
                if required_bytes == 2 * MB && free_bytes == MB
        ));
        assert_eq!(p.snapshot()[0].memory_free, MB);
        assert_eq!(p.outstanding(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let p = pool(&[4]);
        let guard = p.reserve(0, MB, "x").unwrap();
        let other = p.reserve(0, MB, "y").unwrap();

        assert!(guard.release());
        let after_one = p.snapshot();
        assert!(!p.release("x"));
        assert_eq!(p.snapshot(), after_one);

        assert!(p.release("y"));
        assert!(!p.release("y"));
        drop(other);
        assert_eq!(p.snapshot()[0].memory_free, 4 * MB);
        p.check_invariants().unwrap();
    }

    #[test]
    fn test_stale_guard_does_not_free_new_reservation() {
        let p = pool(&[4]);
        let stale = p.reserve(0, MB, "same").unwrap();
        assert!(p.release("same"));
        let fresh = p.reserve(0, 2 * MB, "same").unwrap();

        drop(stale);
        assert_eq!(p.snapshot()[0].memory_used, 2 * MB);
        drop(fresh);
        assert_eq!(p.snapshot()[0].memory_used, 0);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let p = pool(&[4]);
        let _g = p.reserve(0, MB, "dup").unwrap();
        assert!(matches!(
            p.reserve(0, MB, "dup"),
            Err(GovernorError::DuplicateReservation(_))
        ));
        assert!(matches!(
            p.reserve(7, MB, "other"),
            Err(GovernorError::UnknownDevice(7))
        ));
    }

    #[test]
    fn test_offline_device_refuses() {
        let p = pool(&[4]);
        p.set_available(0, false).unwrap();
        assert!(!p.has_available());
        assert!(matches!(
            p.reserve(0, MB, "a"),
            Err(GovernorError::DeviceUnavailable(_))
        ));
        assert_eq!(p.select_device(0, 90.0), None);
    }

    #[test]
    fn test_select_prefers_most_free_under_ceiling() {
        let p = pool(&[4, 16, 8]);
        assert_eq!(p.select_device(0, 90.0), Some(1));

        p.mark_dispatch(1, 95.0);
        assert_eq!(p.select_device(0, 90.0), Some(2));

        assert_eq!(p.select_device(10 * MB, 90.0), None);

        p.decay(0.5);
        assert!((p.snapshot()[1].utilization - 47.5).abs() < 1e-9);
        assert_eq!(p.select_device(0, 90.0), Some(1));
    }

    #[test]
    fn test_utilization_capped() {
        let p = pool(&[4]);
        for _ in 0..20 {
            p.mark_dispatch(0, 10.0);
        }
        assert_eq!(p.snapshot()[0].utilization, 100.0);
    }

    #[test]
    fn test_force_release_and_reset() {
        let p = pool(&[4, 4]);
        let a = p.reserve(0, MB, "a").unwrap();
        let b = p.reserve(1, 2 * MB, "b").unwrap();
        p.mark_dispatch(0, 30.0);

        let leaked = p.force_release_all();
        assert_eq!(leaked.len(), 2);
        p.check_invariants().unwrap();

        p.reset();
        drop(a);
        drop(b);
        for d in p.snapshot() {
            assert_eq!(d.memory_free, d.memory_total);
            assert_eq!(d.utilization, 0.0);
        }
        assert_eq!(p.outstanding(), 0);
    }

    #[test]
    fn test_concurrent_reservations_conserve_memory() {
        let p = pool(&[64]);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let p = p.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if let Ok(g) = p.reserve(0, MB, &format!("t{t}-{i}")) {
                            drop(g);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        p.check_invariants().unwrap();
        assert_eq!(p.snapshot()[0].memory_free, 64 * MB);
    }
}
