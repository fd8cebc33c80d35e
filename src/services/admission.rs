//! Admission gate for heavy batch jobs.
//!
//! Caps how many expensive jobs (duplicate detection scans, bulk exports) may
//! run at the same time. Callers queue for a slot with a bounded wait; a
//! caller that cannot get a slot in time receives [`Error::QueueBusy`].
//!
//! # Slot ownership
//!
//! A successful [`AdmissionGate::acquire`] returns an [`AdmissionPermit`].
//! The slot returns to the pool when the permit is released or dropped,
//! whichever comes first, so a slot can neither leak on an error path nor be
//! returned twice.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dupscan::services::{AdmissionConfig, AdmissionGate};
//!
//! let gate = AdmissionGate::new(AdmissionConfig::default());
//! let permit = gate.acquire().await?;
//! run_scan();
//! permit.release();
//! ```

use super::CancellationFlag;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum number of jobs admitted at once.
    ///
    /// Default: 2.
    pub max_concurrent: usize,

    /// How long a caller may queue for a slot, in milliseconds (0 = no limit).
    ///
    /// Default: 45000ms.
    pub acquire_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent: 2,
            acquire_timeout_ms: 45_000,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `DUPSCAN_ADMISSION_MAX_CONCURRENT` | Concurrent jobs | 2 |
    /// | `DUPSCAN_ADMISSION_ACQUIRE_TIMEOUT_MS` | Queue timeout | 45000 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DUPSCAN_ADMISSION_MAX_CONCURRENT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_concurrent = parsed.max(1);
        }
        if let Ok(v) = std::env::var("DUPSCAN_ADMISSION_ACQUIRE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.acquire_timeout_ms = parsed;
        }
        self
    }

    /// Sets the maximum concurrent jobs.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the acquire timeout in milliseconds.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    fn timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }
}

/// Bounded-concurrency gate with acquire timeout.
///
/// Cloning is cheap; clones share the same slot pool. A gate built with
/// [`AdmissionGate::disabled`] admits everything.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Option<Arc<Semaphore>>,
    config: AdmissionConfig,
    name: &'static str,
}

impl AdmissionGate {
    /// Creates a gate with `config.max_concurrent` slots (at least one).
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self::named(config, "detection")
    }

    /// Creates a gate whose metrics carry the given `gate` label.
    #[must_use]
    pub fn named(config: AdmissionConfig, name: &'static str) -> Self {
        let config = config.with_max_concurrent(config.max_concurrent.max(1));
        Self {
            semaphore: Some(Arc::new(Semaphore::new(config.max_concurrent))),
            config,
            name,
        }
    }

    /// A permissive gate: every acquire succeeds immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            semaphore: None,
            config: AdmissionConfig::new(),
            name: "disabled",
        }
    }

    /// Returns `true` unless the gate was built with [`disabled`](Self::disabled).
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.semaphore.is_some()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Number of free slots, or `None` for a disabled gate.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.available()
            .map_or(0, |free| self.config.max_concurrent.saturating_sub(free))
    }

    /// Acquires a slot, waiting at most the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueBusy`] if no slot frees in time.
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        self.acquire_cancellable(&CancellationFlag::new()).await
    }

    /// Acquires a slot, giving up early if `cancel` is set.
    ///
    /// Takes the fast path when a slot is free; otherwise queues until a slot
    /// frees, the flag is set, or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the flag is set while queued, and
    /// [`Error::QueueBusy`] if the timeout elapses.
    pub async fn acquire_cancellable(&self, cancel: &CancellationFlag) -> Result<AdmissionPermit> {
        let Some(semaphore) = &self.semaphore else {
            return Ok(AdmissionPermit::unbounded());
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
            return Ok(self.admitted(permit, Duration::ZERO));
        }

        tracing::debug!(
            gate = self.name,
            in_use = self.in_use(),
            max_concurrent = self.config.max_concurrent,
            "Admission gate full, queueing"
        );

        let start = Instant::now();
        let wait = async {
            let acquire = Arc::clone(semaphore).acquire_owned();
            match self.config.timeout() {
                Some(timeout) => tokio::time::timeout(timeout, acquire).await.ok(),
                None => Some(acquire.await),
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.rejected("cancelled");
                Err(Error::Cancelled)
            },
            outcome = wait => match outcome {
                Some(Ok(permit)) => Ok(self.admitted(permit, start.elapsed())),
                Some(Err(closed)) => Err(Error::operation("admission_gate_acquire", closed)),
                None => {
                    self.rejected("timeout");
                    let waited_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(gate = self.name, waited_ms, "Admission gate acquire timed out");
                    Err(Error::QueueBusy { waited_ms })
                },
            },
        }
    }

    fn admitted(&self, permit: OwnedSemaphorePermit, waited: Duration) -> AdmissionPermit {
        metrics::counter!("admission_gate_permits_acquired_total", "gate" => self.name)
            .increment(1);
        metrics::histogram!("admission_gate_wait_ms", "gate" => self.name)
            .record(waited.as_secs_f64() * 1000.0);
        self.record_available();
        AdmissionPermit {
            permit: Some(permit),
            gate: self.name,
        }
    }

    fn rejected(&self, reason: &'static str) {
        metrics::counter!(
            "admission_gate_rejections_total",
            "gate" => self.name,
            "reason" => reason
        )
        .increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_available(&self) {
        if let Some(free) = self.available() {
            metrics::gauge!("admission_gate_available_permits", "gate" => self.name)
                .set(free as f64);
        }
    }
}

/// A held admission slot.
///
/// The slot is returned exactly once: by [`release`](Self::release), or on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    gate: &'static str,
}

impl AdmissionPermit {
    fn unbounded() -> Self {
        Self {
            permit: None,
            gate: "disabled",
        }
    }

    /// Returns `true` when the permit holds a real slot.
    #[must_use]
    pub const fn holds_slot(&self) -> bool {
        self.permit.is_some()
    }

    /// Returns the slot to the pool. Never blocks.
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if self.permit.take().is_some() {
            metrics::counter!("admission_gate_permits_released_total", "gate" => self.gate)
                .increment(1);
            tracing::trace!(gate = self.gate, "Released admission slot");
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(max: usize, timeout_ms: u64) -> AdmissionGate {
        AdmissionGate::new(
            AdmissionConfig::new()
                .with_max_concurrent(max)
                .with_acquire_timeout_ms(timeout_ms),
        )
    }

    #[test]
    fn test_default_config() {
        let config = AdmissionConfig::default();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.acquire_timeout_ms, 45_000);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let gate = gate(0, 10);
        assert_eq!(gate.available(), Some(1));
    }

    #[tokio::test]
    async fn test_fast_path_and_release() {
        let gate = gate(2, 50);
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert!(a.holds_slot());
        assert_eq!(gate.in_use(), 2);
        a.release();
        assert_eq!(gate.in_use(), 1);
        drop(b);
        assert_eq!(gate.available(), Some(2));
    }

    #[tokio::test]
    async fn test_full_gate_times_out_with_queue_busy() {
        let gate = gate(1, 30);
        let _held = gate.acquire().await.unwrap();
        let err = gate.acquire().await.unwrap_err();
        match err {
            Error::QueueBusy { waited_ms } => assert!(waited_ms >= 25),
            other => panic!("expected QueueBusy, got {other:?}"),
        }
        assert_eq!(gate.in_use(), 1);
    }

    #[tokio::test]
    async fn test_queued_caller_admitted_after_release() {
        let gate = gate(1, 2_000);
        let held = gate.acquire().await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|p| p.holds_slot()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        held.release();
        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let gate = gate(1, 5_000);
        let _held = gate.acquire().await.unwrap();
        let cancel = CancellationFlag::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire_cancellable(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(gate.in_use(), 1);
    }

    #[tokio::test]
    async fn test_disabled_gate_admits_everything() {
        let gate = AdmissionGate::disabled();
        assert!(!gate.is_enabled());
        let permits: Vec<_> = futures_collect(&gate, 10).await;
        assert!(permits.iter().all(|p| !p.holds_slot()));
        assert_eq!(gate.in_use(), 0);
        for permit in permits {
            permit.release();
        }
    }

    async fn futures_collect(gate: &AdmissionGate, n: usize) -> Vec<AdmissionPermit> {
        let mut permits = Vec::with_capacity(n);
        for _ in 0..n {
            permits.push(gate.acquire().await.unwrap());
        }
        permits
    }
}
