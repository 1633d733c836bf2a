//! Lifecycle orchestrator.
//!
//! # Responsibilities
//! - Load config, build the logger, connect the store, in that order
//! - Start the HTTP server once every dependency is ready
//! - Wait for termination, then drain within a deadline
//!
//! # Design Decisions
//! - Fail fast: the first bootstrap error is returned as-is, nothing is retried
//! - Listeners start last (traffic only when ready)
//! - Shutdown has timeout: the server is aborted after the deadline
//! - Every resource is owned by the orchestrator instance, so several can
//!   coexist in one process

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::config::{AppConfig, ConfigProvider};
use crate::http::{DrainOutcome, HttpServer, ServerError, ServerHandle};
use crate::lifecycle::phase::Phase;
use crate::lifecycle::signals::{self, ShutdownTrigger, Termination, TerminationSignal};
use crate::lifecycle::LifecycleError;
use crate::observability::{self, LogHandle, LogOptions};
use crate::store::{self, StoreHandle, StoreOptions};

/// Drain bound used by [`Orchestrator::run`] unless overridden.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns every process-scoped resource and sequences their lifetimes.
///
/// One instance drives one bootstrap/serve/shutdown cycle; operations are not
/// meant to be repeated on the same instance.
pub struct Orchestrator {
    provider: ConfigProvider,
    phase: Phase,
    config: Option<Arc<AppConfig>>,
    logger: Option<LogHandle>,
    store: Option<StoreHandle>,
    store_skipped: bool,
    routes: Option<Router>,
    server: Option<ServerHandle>,
    signal: TerminationSignal,
    os_signals: Option<JoinHandle<()>>,
    serve_failure: Option<ServerError>,
    shutdown_timeout: Duration,
}

impl Orchestrator {
    pub fn new(provider: ConfigProvider) -> Self {
        Self {
            provider,
            phase: Phase::Created,
            config: None,
            logger: None,
            store: None,
            store_skipped: false,
            routes: None,
            server: None,
            signal: TerminationSignal::new(),
            os_signals: None,
            serve_failure: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Serve `routes` next to `GET /health`.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Drain bound used by [`Orchestrator::run`].
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> Option<&Arc<AppConfig>> {
        self.config.as_ref()
    }

    pub fn logger(&self) -> Option<&LogHandle> {
        self.logger.as_ref()
    }

    /// `None` before bootstrap or when the DSN was empty.
    pub fn store(&self) -> Option<&StoreHandle> {
        self.store.as_ref()
    }

    /// Bound HTTP address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// A handle that requests termination, as SIGTERM would.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.signal.trigger()
    }

    /// Load configuration, build the logger, connect the store.
    ///
    /// Stops at the first failure and returns it unchanged.
    pub async fn bootstrap(&mut self) -> Result<(), LifecycleError> {
        self.require(Phase::Created, "bootstrap")?;

        let loaded = self.provider.load()?;
        let config = Arc::new(loaded.config);
        self.config = Some(Arc::clone(&config));
        self.transition(Phase::ConfigLoaded)?;

        let logger = observability::init(&LogOptions::from(&config.log))?;
        let level = logger.level();
        let encoding = logger.encoding();
        let console = logger.has_console();
        let file = logger.file_path();
        self.logger = Some(logger);
        self.transition(Phase::LoggerReady)?;

        self.in_log_scope(|| {
            tracing::info!(
                level = %level,
                encoding = %encoding,
                console,
                file = ?file,
                "Logger initialized"
            );
            match &loaded.source {
                Some(path) => {
                    let path = path.canonicalize().unwrap_or_else(|_| path.clone());
                    tracing::info!(path = %path.display(), "Using config file");
                }
                None => tracing::info!("No config file found, using defaults and environment"),
            }
        });

        let connected = self
            .scoped(store::connect(&StoreOptions::from(&config.db)))
            .await;
        match connected {
            Ok(Some(handle)) => {
                self.store = Some(handle);
                self.transition(Phase::StoreReady)?;
                self.in_log_scope(|| tracing::info!("Database initialized"));
            }
            Ok(None) => self.store_skipped = true,
            Err(e) => {
                self.in_log_scope(|| tracing::error!(error = %e, "Failed to initialize database"));
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Start the HTTP server and enter `Serving`. Returns the bound address.
    pub async fn serve(&mut self) -> Result<SocketAddr, LifecycleError> {
        let ready = match self.phase {
            Phase::StoreReady => true,
            Phase::LoggerReady => self.store_skipped,
            _ => false,
        };
        if !ready {
            return Err(self.invalid("serve"));
        }
        let config = match &self.config {
            Some(config) => Arc::clone(config),
            None => return Err(self.invalid("serve")),
        };

        let server = match self.routes.take() {
            Some(routes) => HttpServer::with_routes(routes),
            None => HttpServer::new(),
        };
        let handle = self
            .scoped(server.start(&config.http.bind_address()))
            .await?;
        let address = handle.local_addr();
        self.server = Some(handle);
        self.transition(Phase::Serving)?;

        Ok(address)
    }

    /// Suspend until termination is requested or the server stops by itself.
    pub async fn wait_for_termination(&mut self) -> Result<Termination, LifecycleError> {
        if self.phase != Phase::Serving {
            return Err(self.invalid("wait for termination"));
        }
        let Some(server) = self.server.as_mut() else {
            return Err(self.invalid("wait for termination"));
        };

        let outcome = tokio::select! {
            reason = self.signal.recv() => Ok(reason),
            exited = server.exited() => Err(exited),
        };

        match outcome {
            Ok(reason) => {
                self.in_log_scope(|| tracing::info!(reason = %reason, "Shutting down HTTP server"));
                Ok(reason)
            }
            Err(exited) => {
                match exited {
                    Ok(()) => self.in_log_scope(|| tracing::warn!("HTTP server exited unexpectedly")),
                    Err(e) => {
                        self.in_log_scope(|| tracing::error!(error = %e, "HTTP server error"));
                        self.serve_failure = Some(e);
                    }
                }
                Ok(Termination::ServerExited)
            }
        }
    }

    /// Drain the server and close the store, both within `timeout`, then
    /// enter `Stopped`.
    ///
    /// `Stopped` is reached even when the deadline elapses; the error then
    /// reports the timeout.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), LifecycleError> {
        self.require(Phase::Serving, "shut down")?;
        let deadline = Instant::now() + timeout;
        self.transition(Phase::ShuttingDown)?;

        let dispatch = self.dispatch();
        let drained = match self.server.as_mut() {
            Some(server) => server.stop(timeout).with_subscriber(dispatch).await,
            None => Ok(DrainOutcome::Drained),
        };

        if let Some(store) = &self.store {
            // Handlers that outlived the drain may still hold connections.
            if !finish_by(deadline, store.close()).await {
                self.in_log_scope(|| tracing::warn!("Database pool did not close in time"));
            }
        }
        if let Some(listener) = self.os_signals.take() {
            listener.abort();
        }

        self.transition(Phase::Stopped)?;

        let result = match drained {
            Ok(DrainOutcome::Drained) => match self.serve_failure.take() {
                Some(e) => Err(e.into()),
                None => Ok(()),
            },
            Ok(DrainOutcome::TimedOut) => Err(LifecycleError::ShutdownTimeout { timeout }),
            Err(e) => Err(e.into()),
        };

        self.in_log_scope(|| match &result {
            Ok(()) => tracing::info!("HTTP server exited gracefully"),
            Err(e) => tracing::error!(error = %e, "HTTP server shutdown error"),
        });
        if let Some(logger) = &self.logger {
            if let Err(e) = logger.flush() {
                eprintln!("failed to flush logs: {e}");
            }
        }

        result
    }

    /// Serve until SIGINT/SIGTERM (or a [`ShutdownTrigger`]), then shut down
    /// with the configured timeout.
    pub async fn run(&mut self) -> Result<(), LifecycleError> {
        let trigger = self.signal.trigger();
        let listener = self.in_log_scope(|| signals::listen_for_os_signals(trigger));

        if let Err(e) = self.serve().await {
            listener.abort();
            return Err(e);
        }
        self.os_signals = Some(listener);

        self.wait_for_termination().await?;
        self.shutdown(self.shutdown_timeout).await
    }

    fn require(&self, expected: Phase, operation: &'static str) -> Result<(), LifecycleError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::InvalidPhase {
            operation,
            phase: self.phase,
        }
    }

    fn transition(&mut self, next: Phase) -> Result<(), LifecycleError> {
        if !self.phase.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        let previous = std::mem::replace(&mut self.phase, next);
        self.in_log_scope(|| tracing::debug!(from = %previous, to = %next, "Phase transition"));
        Ok(())
    }

    /// The orchestrator's logger, or the caller's default before it exists.
    fn dispatch(&self) -> Dispatch {
        match &self.logger {
            Some(logger) => logger.dispatch().clone(),
            None => tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    fn in_log_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch(), f)
    }

    fn scoped<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        future.with_subscriber(self.dispatch())
    }
}

/// Run `step` until `deadline`. Returns `false` if it was cut short.
async fn finish_by<F: Future<Output = ()>>(deadline: Instant, step: F) -> bool {
    tokio::time::timeout_at(deadline, step).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(env: &[(&str, &str)]) -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let mut vars: Vec<(String, String)> = vec![
            ("EZCHAT_HTTP_HOST".into(), "127.0.0.1".into()),
            ("EZCHAT_HTTP_PORT".into(), "0".into()),
        ];
        vars.extend(env.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let provider = ConfigProvider::new(None)
            .with_search_dirs([dir.path()])
            .with_env(vars);
        (dir, Orchestrator::new(provider))
    }

    #[tokio::test]
    async fn test_steps_share_one_deadline() {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(300);

        // A drain that used most of the budget.
        tokio::time::sleep(Duration::from_millis(200)).await;
        // A close that never completes only gets what is left.
        assert!(!finish_by(deadline, std::future::pending::<()>()).await);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_step_after_deadline_is_cut_immediately() {
        let deadline = Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        assert!(!finish_by(deadline, tokio::time::sleep(Duration::from_secs(5))).await);
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(finish_by(Instant::now() + Duration::from_secs(1), async {}).await);
    }

    #[tokio::test]
    async fn test_serve_before_bootstrap_is_rejected() {
        let (_dir, mut orch) = orchestrator(&[]);
        let err = orch.serve().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidPhase { phase: Phase::Created, .. }
        ));
        assert!(orch.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_before_serving_is_rejected() {
        let (_dir, mut orch) = orchestrator(&[]);
        orch.bootstrap().await.unwrap();
        let err = orch.shutdown(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidPhase { .. }));
        assert_eq!(orch.phase(), Phase::LoggerReady);
    }

    #[tokio::test]
    async fn test_second_bootstrap_is_rejected() {
        let (_dir, mut orch) = orchestrator(&[]);
        orch.bootstrap().await.unwrap();
        assert!(matches!(
            orch.bootstrap().await,
            Err(LifecycleError::InvalidPhase { .. })
        ));
    }

    #[tokio::test]
    async fn test_config_failure_stops_before_logger() {
        let (_dir, mut orch) = orchestrator(&[("EZCHAT_HTTP_PORT", "not-a-port")]);
        let err = orch.bootstrap().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
        assert_eq!(orch.phase(), Phase::Created);
        assert!(orch.logger().is_none());
    }

    #[tokio::test]
    async fn test_log_failure_stops_before_store() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let log_file = blocker.path().join("app.log");
        let log_file = log_file.to_str().unwrap();
        let (_dir, mut orch) = orchestrator(&[
            ("EZCHAT_LOG_FILE", log_file),
            ("EZCHAT_DB_DSN", "mysql://root@127.0.0.1:1/ezchat"),
        ]);

        let err = orch.bootstrap().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Log(_)), "got {err}");
        assert_eq!(orch.phase(), Phase::ConfigLoaded);
        assert!(orch.store().is_none());
    }

    #[tokio::test]
    async fn test_pending_request_ends_run() {
        let (_dir, mut orch) = orchestrator(&[]);
        orch.bootstrap().await.unwrap();

        // Fired before run: the single slot holds it until the wait begins.
        assert!(orch.shutdown_trigger().request());
        orch.run().await.unwrap();
        assert_eq!(orch.phase(), Phase::Stopped);
    }
}
