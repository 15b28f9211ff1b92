use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BlobError, DispatchError};

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
}

/// Dispatch outcome counters, safe to update from concurrent invocations.
#[derive(Default)]
pub struct DispatchMetrics {
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub link_not_found: AtomicU64,
    pub contract_mismatch: AtomicU64,
    pub no_live_instance: AtomicU64,
    pub path_escapes: AtomicU64,
    pub http_failures: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics")
            .field("dispatched", &self.dispatched)
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .field("link_not_found", &self.link_not_found)
            .field("contract_mismatch", &self.contract_mismatch)
            .field("no_live_instance", &self.no_live_instance)
            .field("path_escapes", &self.path_escapes)
            .field("http_failures", &self.http_failures)
            .finish()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    pub fn record_dispatched(&self) {
        self.bump(&self.dispatched, "caplink.dispatch.dispatched");
    }

    pub fn record_success(&self) {
        self.bump(&self.succeeded, "caplink.dispatch.succeeded");
    }

    pub fn record_failure(&self, error: &DispatchError) {
        self.bump(&self.failed, "caplink.dispatch.failed");
        match error {
            DispatchError::Link(caplink_core::LinkError::LinkNotFound { .. }) => {
                self.bump(&self.link_not_found, "caplink.dispatch.link_not_found");
            }
            DispatchError::Contract(_) => {
                self.bump(&self.contract_mismatch, "caplink.dispatch.contract_mismatch");
            }
            DispatchError::NoLiveInstance { .. } => {
                self.bump(&self.no_live_instance, "caplink.dispatch.no_live_instance");
            }
            DispatchError::Blob(BlobError::PathEscape { .. }) => {
                self.bump(&self.path_escapes, "caplink.blob.path_escapes");
            }
            DispatchError::Http(_) => {
                self.bump(&self.http_failures, "caplink.http.failures");
            }
            _ => {}
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str) {
        let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            link_not_found: self.link_not_found.load(Ordering::Relaxed),
            contract_mismatch: self.contract_mismatch.load(Ordering::Relaxed),
            no_live_instance: self.no_live_instance.load(Ordering::Relaxed),
            path_escapes: self.path_escapes.load(Ordering::Relaxed),
            http_failures: self.http_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub link_not_found: u64,
    pub contract_mismatch: u64,
    pub no_live_instance: u64,
    pub path_escapes: u64,
    pub http_failures: u64,
}
