//! Scripted [`GpuPhaseCoordinator`] mock. Grants every acquire immediately
//! with no real exclusion; tracks acquisitions so tests can assert the
//! orchestrator never holds two phases concurrently.

use async_trait::async_trait;
use ibeam_core::{GpuPhaseCoordinator, GpuPhaseGuard, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A no-op mock [`GpuPhaseCoordinator`] that records every acquire/release
/// for assertions, without actually serializing anything.
#[derive(Clone)]
pub struct MockGpuPhaseCoordinator {
    acquire_count: Arc<AtomicU32>,
    held: Arc<Mutex<Vec<String>>>,
}

impl Default for MockGpuPhaseCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpuPhaseCoordinator {
    /// A coordinator that grants every `acquire` call immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            acquire_count: Arc::new(AtomicU32::new(0)),
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of `acquire` calls observed.
    #[must_use]
    pub fn acquire_count(&self) -> u32 {
        self.acquire_count.load(Ordering::SeqCst)
    }

    /// Service names currently holding a guard (not yet released).
    #[must_use]
    pub fn currently_held(&self) -> Vec<String> {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl GpuPhaseCoordinator for MockGpuPhaseCoordinator {
    async fn acquire(&self, service: &str) -> Result<GpuPhaseGuard> {
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        self.held.lock().unwrap_or_else(|e| e.into_inner()).push(service.to_string());

        let held = Arc::clone(&self.held);
        Ok(GpuPhaseGuard::new(
            service,
            Box::new(move |released: &str| {
                let mut held = held.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(pos) = held.iter().position(|s| s == released) {
                    held.remove(pos);
                }
            }),
        ))
    }
}
