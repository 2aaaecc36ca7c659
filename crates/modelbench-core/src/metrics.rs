//! Global atomic counters for benchmark runs.
//!
//! Counters are bumped silently by the evaluator. Call [`Metrics::flush`]
//! at the end of a run to emit every value as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free run counters.
pub struct Metrics {
    completions_requested: AtomicU64,
    endpoint_failures: AtomicU64,
    patches_rejected: AtomicU64,
    verification_timeouts: AtomicU64,
    iterations_passed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            completions_requested: AtomicU64::new(0),
            endpoint_failures: AtomicU64::new(0),
            patches_rejected: AtomicU64::new(0),
            verification_timeouts: AtomicU64::new(0),
            iterations_passed: AtomicU64::new(0),
        }
    }

    pub fn inc_completions_requested(&self) {
        self.completions_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_endpoint_failures(&self) {
        self.endpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_patches_rejected(&self) {
        self.patches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verification_timeouts(&self) {
        self.verification_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_iterations_passed(&self) {
        self.iterations_passed.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            completions_requested = self.completions_requested(),
            endpoint_failures = self.endpoint_failures(),
            patches_rejected = self.patches_rejected(),
            verification_timeouts = self.verification_timeouts(),
            iterations_passed = self.iterations_passed(),
        );
    }

    pub fn completions_requested(&self) -> u64 {
        self.completions_requested.load(Ordering::Relaxed)
    }

    pub fn endpoint_failures(&self) -> u64 {
        self.endpoint_failures.load(Ordering::Relaxed)
    }

    pub fn patches_rejected(&self) -> u64 {
        self.patches_rejected.load(Ordering::Relaxed)
    }

    pub fn verification_timeouts(&self) -> u64 {
        self.verification_timeouts.load(Ordering::Relaxed)
    }

    pub fn iterations_passed(&self) -> u64 {
        self.iterations_passed.load(Ordering::Relaxed)
    }
}
