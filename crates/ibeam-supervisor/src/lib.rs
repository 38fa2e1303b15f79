//! Service-connection supervisor (C1): wraps every call to a local
//! GPU-backed service with PID-aware retry, restart, and URL-refresh
//! (§4.1). One instance per logical service, shared by every provider that
//! talks to it.

pub mod config;

use config::SupervisorConfig;
use ibeam_core::{IbeamError, Result, ServiceManager};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, warn};

use futures::future::{BoxFuture, FutureExt, Shared};

/// Wraps a restart failure so it can be broadcast to every caller sharing
/// the same in-flight restart (`Shared` requires a `Clone` output).
#[derive(Clone, Debug)]
struct RestartError(Arc<IbeamError>);

impl std::fmt::Display for RestartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RestartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

type RestartFuture = Shared<BoxFuture<'static, std::result::Result<(), RestartError>>>;

/// Options for one [`ServiceConnection::with_retry`] call (§4.1).
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Name of the operation being attempted, used only for error context
    /// and logging.
    pub operation_name: String,
    /// Whether a connection failure may trigger a restart. `false` makes a
    /// connection error terminal immediately after the quick-retry budget.
    pub attempt_restart: bool,
}

impl RetryOptions {
    /// Build options for `operation_name` with `attempt_restart = true`.
    #[must_use]
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            attempt_restart: true,
        }
    }
}

/// One logical service's retry/restart state: in-flight restart
/// deduplication, the last known URL, and a callback notified on refresh.
pub struct ServiceConnection {
    service_name: String,
    manager: Arc<dyn ServiceManager>,
    config: SupervisorConfig,
    url: RwLock<String>,
    in_flight_restart: AsyncMutex<Option<RestartFuture>>,
    on_url_changed: StdMutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl ServiceConnection {
    /// Build a supervisor for `service_name`, backed by `manager` for
    /// liveness checks, URL lookups, stop-lock checks, and restarts.
    #[must_use]
    pub fn new(service_name: impl Into<String>, manager: Arc<dyn ServiceManager>, initial_url: String) -> Self {
        Self::with_config(service_name, manager, initial_url, SupervisorConfig::from_env())
    }

    /// Build a supervisor with an explicit [`SupervisorConfig`], bypassing
    /// environment lookups (used by tests).
    #[must_use]
    pub fn with_config(
        service_name: impl Into<String>,
        manager: Arc<dyn ServiceManager>,
        initial_url: String,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            manager,
            config,
            url: RwLock::new(initial_url),
            in_flight_restart: AsyncMutex::new(None),
            on_url_changed: StdMutex::new(None),
        }
    }

    /// The service's current URL, as last refreshed by a restart.
    pub async fn url(&self) -> String {
        self.url.read().await.clone()
    }

    /// Register a callback fired with the new URL whenever a restart
    /// refreshes it (§4.1 "notify the owning provider of the URL change").
    pub fn on_url_changed(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_url_changed.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Run `operation`, applying the retry/restart state machine on
    /// connection errors (§4.1). `operation` must be safely callable more
    /// than once: each attempt re-invokes it from scratch.
    pub async fn with_retry<T, F, Fut>(&self, mut operation: F, options: RetryOptions) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_connection_error() => return Err(err),
            Err(err) => {
                debug!(service = %self.service_name, operation = %options.operation_name, "connection error, checking liveness");
                return self.recover(operation, options, err).await;
            }
        }
    }

    async fn recover<T, F, Fut>(&self, mut operation: F, options: RetryOptions, first_err: IbeamError) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let alive = self.manager.is_service_running(&self.service_name).await?;

        if alive {
            for attempt in 0..self.config.quick_retries {
                tokio::time::sleep(self.config.quick_retry_delay).await;
                match operation().await {
                    Ok(value) => return Ok(value),
                    Err(err) if !err.is_connection_error() => return Err(err),
                    Err(_) => {
                        debug!(service = %self.service_name, attempt, "quick retry failed");
                    }
                }
            }
            warn!(service = %self.service_name, "quick retries exhausted, escalating to restart");
        } else {
            warn!(service = %self.service_name, "process not alive, skipping quick retries");
        }

        if !options.attempt_restart {
            return Err(IbeamError::RestartBlocked {
                service: self.service_name.clone(),
                reason: format!("attempt_restart disabled for '{}': {first_err}", options.operation_name),
            });
        }

        if self.manager.has_stop_lock(&self.service_name).await? {
            return Err(IbeamError::RestartBlocked {
                service: self.service_name.clone(),
                reason: "user-stopped".to_string(),
            });
        }

        self.ensure_restarted().await?;

        let new_url = self.manager.get_service_url(&self.service_name).await?;
        *self.url.write().await = new_url.clone();
        if let Some(cb) = self
            .on_url_changed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            cb(&new_url);
        }

        tokio::time::sleep(self.config.post_restart_delay).await;
        operation().await
    }

    /// Restart the service, deduplicating concurrent callers onto a single
    /// in-flight attempt (§5 "one restart per service, ever, at a time").
    async fn ensure_restarted(&self) -> Result<()> {
        let mut guard = self.in_flight_restart.lock().await;
        if let Some(existing) = guard.as_ref() {
            let shared = existing.clone();
            drop(guard);
            return shared.await.map_err(|e| IbeamError::MaxRestartsExceeded {
                service: self.service_name.clone(),
                source: Box::new(e),
            });
        }

        let manager = self.manager.clone();
        let service_name = self.service_name.clone();
        let shared: RestartFuture = async move {
            manager
                .restart_service(&service_name)
                .await
                .map_err(|e| RestartError(Arc::new(e)))
        }
        .boxed()
        .shared();

        *guard = Some(shared.clone());
        drop(guard);

        let result = shared.await;
        *self.in_flight_restart.lock().await = None;

        result.map_err(|e| IbeamError::MaxRestartsExceeded {
            service: self.service_name.clone(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct MockManager {
        alive: AtomicU32,
        stop_lock: AtomicU32,
        restart_calls: AtomicU32,
        restart_ok: AtomicU32,
        url: Mutex<String>,
        restart_delay: Duration,
    }

    impl MockManager {
        fn new(alive: bool) -> Self {
            Self {
                alive: AtomicU32::new(u32::from(alive)),
                stop_lock: AtomicU32::new(0),
                restart_calls: AtomicU32::new(0),
                restart_ok: AtomicU32::new(1),
                url: Mutex::new("http://localhost:9000".to_string()),
                restart_delay: Duration::from_millis(0),
            }
        }
    }

    #[async_trait]
    impl ServiceManager for MockManager {
        async fn is_service_running(&self, _name: &str) -> Result<bool> {
            Ok(self.alive.load(Ordering::SeqCst) != 0)
        }

        async fn get_service_url(&self, _name: &str) -> Result<String> {
            Ok(self.url.lock().await.clone())
        }

        async fn has_stop_lock(&self, _name: &str) -> Result<bool> {
            Ok(self.stop_lock.load(Ordering::SeqCst) != 0)
        }

        async fn restart_service(&self, _name: &str) -> Result<()> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            if self.restart_delay > Duration::ZERO {
                tokio::time::sleep(self.restart_delay).await;
            }
            self.alive.store(1, Ordering::SeqCst);
            if self.restart_ok.load(Ordering::SeqCst) != 0 {
                Ok(())
            } else {
                Err(IbeamError::TransportUnreachable {
                    service: "text-model".to_string(),
                    operation: "restart".to_string(),
                    source: "refused".into(),
                })
            }
        }
    }

    fn connection_error() -> IbeamError {
        IbeamError::TransportUnreachable {
            service: "text-model".to_string(),
            operation: "generate_chat".to_string(),
            source: "connection refused".into(),
        }
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            quick_retries: 2,
            quick_retry_delay: Duration::from_millis(1),
            post_restart_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn success_on_first_try_never_touches_recovery() {
        let manager = Arc::new(MockManager::new(true));
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let result = conn
            .with_retry(|| async { Ok::<_, IbeamError>(42) }, RetryOptions::new("generate_chat"))
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn application_error_never_triggers_restart() {
        let manager = Arc::new(MockManager::new(true));
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let err = conn
            .with_retry(
                || async {
                    Err::<i32, _>(IbeamError::ServiceApplication {
                        service: "text-model".into(),
                        operation: "generate_chat".into(),
                        status: 400,
                        body: "bad request".into(),
                    })
                },
                RetryOptions::new("generate_chat"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IbeamError::ServiceApplication { .. }));
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_process_skips_quick_retries_and_restarts_once() {
        let manager = Arc::new(MockManager::new(false));
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let attempts = AtomicU32::new(0);
        let result = conn
            .with_retry(
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(connection_error())
                        } else {
                            Ok(7)
                        }
                    }
                },
                RetryOptions::new("generate_chat"),
            )
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 1);
        // First call fails, restart happens, then exactly one retry succeeds.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn alive_process_exhausts_quick_retries_before_restarting() {
        let manager = Arc::new(MockManager::new(true));
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let attempts = AtomicU32::new(0);
        let result = conn
            .with_retry(
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        // First call + 2 quick retries all fail; 4th call (post-restart) succeeds.
                        if n < 3 {
                            Err(connection_error())
                        } else {
                            Ok(9)
                        }
                    }
                },
                RetryOptions::new("generate_chat"),
            )
            .await
            .unwrap();
        assert_eq!(result, 9);
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stop_lock_blocks_restart_with_zero_restart_calls() {
        let manager = Arc::new(MockManager::new(false));
        manager.stop_lock.store(1, Ordering::SeqCst);
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let err = conn
            .with_retry(|| async { Err::<i32, _>(connection_error()) }, RetryOptions::new("generate_chat"))
            .await
            .unwrap_err();
        assert!(matches!(err, IbeamError::RestartBlocked { .. }));
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attempt_restart_false_is_terminal_without_restarting() {
        let manager = Arc::new(MockManager::new(false));
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let mut options = RetryOptions::new("generate_chat");
        options.attempt_restart = false;
        let err = conn
            .with_retry(|| async { Err::<i32, _>(connection_error()) }, options)
            .await
            .unwrap_err();
        assert!(matches!(err, IbeamError::RestartBlocked { .. }));
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn url_refresh_notifies_callback_after_restart() {
        let manager = Arc::new(MockManager::new(false));
        *manager.url.lock().await = "http://localhost:9100".to_string();
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "http://localhost:9000".into(), fast_config());
        let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let notified_clone = notified.clone();
        conn.on_url_changed(move |url| {
            assert_eq!(url, "http://localhost:9100");
            notified_clone.store(true, Ordering::SeqCst);
        });
        let attempts = AtomicU32::new(0);
        conn.with_retry(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(connection_error())
                    } else {
                        Ok(1)
                    }
                }
            },
            RetryOptions::new("generate_chat"),
        )
        .await
        .unwrap();
        assert_eq!(conn.url().await, "http://localhost:9100");
        assert!(notified.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn restart_failure_surfaces_as_max_restarts_exceeded() {
        let manager = Arc::new(MockManager::new(false));
        manager.restart_ok.store(0, Ordering::SeqCst);
        let conn = ServiceConnection::with_config("text-model", manager.clone(), "u".into(), fast_config());
        let err = conn
            .with_retry(|| async { Err::<i32, _>(connection_error()) }, RetryOptions::new("generate_chat"))
            .await
            .unwrap_err();
        assert!(matches!(err, IbeamError::MaxRestartsExceeded { .. }));
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_dedup_to_one_restart() {
        let mut manager = MockManager::new(false);
        manager.restart_delay = Duration::from_millis(30);
        let manager = Arc::new(manager);
        let conn = Arc::new(ServiceConnection::with_config(
            "text-model",
            manager.clone(),
            "u".into(),
            fast_config(),
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let conn = conn.clone();
            handles.push(tokio::spawn(async move {
                let attempts = AtomicU32::new(0);
                conn.with_retry(
                    move || {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n == 0 {
                                Err(connection_error())
                            } else {
                                Ok(1)
                            }
                        }
                    },
                    RetryOptions::new("generate_chat"),
                )
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(manager.restart_calls.load(Ordering::SeqCst), 1);
    }
}
