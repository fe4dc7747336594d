//! HTTP engine: binds a listener and serves the handler set with hyper.
//!
//! Connections are served one task each, all watched by a graceful-shutdown
//! coordinator. Stopping the engine closes the listener, asks every
//! connection to finish, and after the grace period aborts whatever is left.
//! Aborting a connection task drops its socket, so the peer sees the
//! connection cut.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use runner_protocol::{RunnerError, Url};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Host;

use crate::handler::HandlerSet;

/// Binds handler sets to network listeners.
pub trait HttpEngine: Send + Sync + 'static {
    /// Bind `base_uri`'s host and port and start serving `handlers`.
    ///
    /// Bind failures (port in use, permission denied, unresolvable host)
    /// are reported as [`RunnerError::Startup`].
    fn bind(
        &self,
        base_uri: &Url,
        handlers: HandlerSet,
    ) -> impl std::future::Future<Output = Result<ServerHandle, RunnerError>> + Send;
}

/// Reference to one bound, serving engine instance.
///
/// Dropping the handle without calling [`ServerHandle::stop`] stops the
/// server with no grace period.
pub struct ServerHandle {
    local_addr: SocketAddr,
    /// Base URI with the actually bound port
    base_uri: Url,
    /// Carries the grace period to the serve loop
    shutdown_tx: Option<oneshot::Sender<Duration>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Wrap a serve task that stops when it receives a grace period on `shutdown_tx`'s receiver.
    pub fn new(
        local_addr: SocketAddr,
        base_uri: Url,
        shutdown_tx: oneshot::Sender<Duration>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            base_uri,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The base URI as actually served (port resolved when `0` was requested).
    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop serving, giving in-flight requests up to `grace` to complete.
    ///
    /// Returns once every connection is closed. Calling it again is a no-op.
    pub async fn stop(&mut self, grace: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(grace);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("HTTP engine task ended abnormally: {e}");
            }
            info!("HTTP engine at {} stopped", self.base_uri);
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("base_uri", &self.base_uri.as_str())
            .field("running", &self.is_running())
            .finish()
    }
}

/// The default engine: axum routers served over hyper's HTTP/1 + HTTP/2 auto builder.
#[derive(Debug, Clone, Default)]
pub struct AxumEngine {
    /// Log every request/response pair at debug level
    trace_requests: bool,
}

impl AxumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_tracing(mut self, enabled: bool) -> Self {
        self.trace_requests = enabled;
        self
    }
}

impl HttpEngine for AxumEngine {
    async fn bind(&self, base_uri: &Url, handlers: HandlerSet) -> Result<ServerHandle, RunnerError> {
        let host = bind_host(base_uri)?;
        let port = base_uri
            .port_or_known_default()
            .ok_or_else(|| RunnerError::configuration(format!("base URI '{base_uri}' has no port")))?;
        let address = format!("{}:{port}", base_uri.host_str().unwrap_or(&host));

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| RunnerError::startup(&address, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RunnerError::startup(&address, e))?;

        let mut effective = base_uri.clone();
        if effective.set_port(Some(local_addr.port())).is_err() {
            warn!("Could not record bound port {} in {base_uri}", local_addr.port());
        }

        let unit_count = handlers.len();
        let mut app = handlers.into_router(&effective);
        if self.trace_requests {
            app = app.layer(TraceLayer::new_for_http());
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, app, shutdown_rx));

        info!("HTTP engine listening on {local_addr} ({unit_count} handler units)");

        Ok(ServerHandle::new(local_addr, effective, shutdown_tx, task))
    }
}

fn bind_host(base_uri: &Url) -> Result<String, RunnerError> {
    match base_uri.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        None => Err(RunnerError::configuration(format!("base URI '{base_uri}' has no host"))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serve loop
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(listener: TcpListener, app: Router, mut shutdown_rx: oneshot::Receiver<Duration>) {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    let grace = loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let conn_id = uuid::Uuid::new_v4();
                        debug!("Connection {conn_id} accepted from {remote_addr}");

                        let io = TokioIo::new(stream);
                        let app = app.clone();
                        let service = service_fn(move |request: Request<Incoming>| {
                            app.clone().oneshot(request)
                        });
                        let watcher = graceful.watcher();

                        connections.spawn(async move {
                            let builder = Builder::new(TokioExecutor::new());
                            let conn = builder.serve_connection_with_upgrades(io, service);
                            if let Err(e) = watcher.watch(conn).await {
                                debug!("Connection {conn_id} ended with error: {e}");
                            } else {
                                debug!("Connection {conn_id} closed");
                            }
                        });
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off instead of spinning.
                        warn!("Failed to accept connection: {e}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            grace = &mut shutdown_rx => {
                break grace.unwrap_or(Duration::ZERO);
            }
        }
    };

    drop(listener);

    debug!("Waiting up to {grace:?} for {} connection(s) to finish", graceful.count());

    match tokio::time::timeout(grace, graceful.shutdown()).await {
        Ok(()) => debug!("All in-flight connections completed"),
        Err(_) => {
            warn!(
                "Grace period of {grace:?} expired, severing {} connection(s)",
                connections.len()
            );
            connections.abort_all();
        }
    }

    while connections.join_next().await.is_some() {}
}
