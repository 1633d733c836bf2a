//! HTTP server setup and supervision.
//!
//! # Responsibilities
//! - Create Axum Router with the health route plus caller-supplied routes
//! - Wire up middleware (request ID, tracing, panic recovery)
//! - Bind the listener and run the serve loop on its own task
//! - Stop accepting and drain in-flight requests within a deadline

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument::WithSubscriber;

use crate::http::request::{request_span, MakeRequestUuid};
use crate::http::response::{health, panic_response};

/// Error type for the serve loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] io::Error),

    #[error("HTTP server task failed: {0}")]
    Task(#[source] JoinError),
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight request finished before the deadline.
    Drained,
    /// The deadline elapsed; the serve task was aborted.
    TimedOut,
}

/// HTTP server, not yet bound.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Server exposing only `GET /health`.
    pub fn new() -> Self {
        Self::with_routes(Router::new())
    }

    /// Server exposing `GET /health` plus `routes`.
    ///
    /// Panics if `routes` also defines `/health` (axum rejects overlapping routes).
    pub fn with_routes(routes: Router) -> Self {
        Self {
            router: Self::build_router(routes),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(routes: Router) -> Router {
        Router::new()
            .route("/health", get(health))
            .merge(routes)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `address` and start serving on a background task.
    ///
    /// Returns once the listener is bound; the caller is never blocked by the
    /// accept loop. The task inherits the caller's tracing subscriber.
    pub async fn start(self, address: &str) -> Result<ServerHandle, ServerError> {
        let bind_error = |source| ServerError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, "HTTP server starting");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router;
        let serve = async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // A dropped sender also counts as a stop request.
                    let _ = shutdown_rx.await;
                })
                .await;
            tracing::info!("HTTP server stopped");
            result
        };
        let task = tokio::spawn(serve.with_current_subscriber());

        Ok(ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Control handle for a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    /// `None` once the serve task has been joined or aborted.
    task: Option<JoinHandle<io::Result<()>>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the serve loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Resolves when the serve loop ends on its own (a listener failure).
    ///
    /// Cancel-safe. Resolves immediately if the task was already joined.
    pub async fn exited(&mut self) -> Result<(), ServerError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        flatten(joined)
    }

    /// Stop accepting and wait up to `deadline` for in-flight requests.
    pub async fn stop(&mut self, deadline: Duration) -> Result<DrainOutcome, ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(task) = self.task.as_mut() else {
            return Ok(DrainOutcome::Drained);
        };

        match tokio::time::timeout(deadline, &mut *task).await {
            Ok(joined) => {
                self.task = None;
                flatten(joined).map(|()| DrainOutcome::Drained)
            }
            Err(_) => {
                task.abort();
                self.task = None;
                tracing::warn!(deadline = ?deadline, "Drain deadline elapsed, aborting server");
                Ok(DrainOutcome::TimedOut)
            }
        }
    }
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> Result<(), ServerError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Serve(e)),
        Err(e) => Err(ServerError::Task(e)),
    }
}
