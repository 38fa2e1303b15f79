//! Scripted [`ServiceManager`] mock for exercising the supervisor and
//! orchestrator without a real local GPU service process.

use async_trait::async_trait;
use ibeam_core::{IbeamError, Result, ServiceManager};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// A configurable mock [`ServiceManager`].
///
/// Starts alive, with no stop-lock, and restarts succeed immediately. Use
/// the setters to drive failure scenarios (dead process, stop-lock,
/// restart failure) from a test.
pub struct MockServiceManager {
    alive: AtomicBool,
    stop_locked: AtomicBool,
    restart_succeeds: AtomicBool,
    url: Mutex<String>,
    restart_calls: AtomicU32,
}

impl Default for MockServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServiceManager {
    /// A healthy mock manager serving `"http://localhost:9000"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            stop_locked: AtomicBool::new(false),
            restart_succeeds: AtomicBool::new(true),
            url: Mutex::new("http://localhost:9000".to_string()),
            restart_calls: AtomicU32::new(0),
        }
    }

    /// Mark the service as dead (or alive).
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Enable or disable the stop-lock.
    pub fn set_stop_lock(&self, locked: bool) {
        self.stop_locked.store(locked, Ordering::SeqCst);
    }

    /// Control whether the next `restart_service` call succeeds.
    pub fn set_restart_succeeds(&self, succeeds: bool) {
        self.restart_succeeds.store(succeeds, Ordering::SeqCst);
    }

    /// Set the URL returned by `get_service_url` after a restart.
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock().unwrap_or_else(|e| e.into_inner()) = url.into();
    }

    /// Number of `restart_service` calls observed.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceManager for MockServiceManager {
    async fn is_service_running(&self, _name: &str) -> Result<bool> {
        Ok(self.alive.load(Ordering::SeqCst))
    }

    async fn get_service_url(&self, _name: &str) -> Result<String> {
        Ok(self.url.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn has_stop_lock(&self, _name: &str) -> Result<bool> {
        Ok(self.stop_locked.load(Ordering::SeqCst))
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        if self.restart_succeeds.load(Ordering::SeqCst) {
            self.alive.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(IbeamError::TransportUnreachable {
                service: name.to_string(),
                operation: "restart".to_string(),
                source: "mock restart failure".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_alive_with_no_stop_lock() {
        let manager = MockServiceManager::new();
        assert!(manager.is_service_running("svc").await.expect("alive"));
        assert!(!manager.has_stop_lock("svc").await.expect("lock"));
    }

    #[tokio::test]
    async fn restart_failure_surfaces_as_transport_error() {
        let manager = MockServiceManager::new();
        manager.set_restart_succeeds(false);
        let err = manager.restart_service("svc").await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(manager.restart_count(), 1);
    }

    #[tokio::test]
    async fn restart_revives_a_dead_service() {
        let manager = MockServiceManager::new();
        manager.set_alive(false);
        manager.restart_service("svc").await.expect("restart");
        assert!(manager.is_service_running("svc").await.expect("alive"));
    }
}
