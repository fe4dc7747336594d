//! ManagedServer — owns the lifecycle of one bound HTTP engine.
//!
//! Start sequence:
//!   1. Ask a prior instance on the shutdown port to stop (absent is fine)
//!   2. Freeze the registry and bind the engine to the base URI
//!   3. Listen on the shutdown port so a later instance can stop this one
//!   4. Optionally open a browser
//!   5. Wait until something calls `shutdown()`
//!
//! Each run gets its own stop notification, so a `start()` blocked on one
//! run returns even if the server is restarted before it is polled again.
//!
//! Startup failures are logged and returned as `RunOutcome::Failed`; only
//! configuration errors come back as `Err`.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use runner_protocol::{RunOutcome, RunnerError, ServerConfig, ServerState, Url};
use runner_protocol::config::description_uri;
use runner_transport::{
    AxumEngine, HandlerPackage, HandlerSet, HandlerUnit, HttpEngine, ServerHandle,
    ShutdownCallback, ShutdownListener, ShutdownSignal, TcpShutdownSignal,
};
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserOpener, system_opener};
use crate::registry::HandlerRegistry;

/// Resolves when the process is asked to stop from the terminal.
pub type InterruptSignal = Arc<dyn Fn() -> BoxFuture<'static, io::Result<()>> + Send + Sync>;

fn ctrl_c_signal() -> InterruptSignal {
    Arc::new(|| -> BoxFuture<'static, io::Result<()>> { Box::pin(tokio::signal::ctrl_c()) })
}

/// A server instance plus the listener that can stop it.
struct RunningServer {
    handle: ServerHandle,
    listener: ShutdownListener,
    /// Wakes the `start()` call that brought this run up
    stopped_tx: oneshot::Sender<()>,
}

struct Inner<E, S> {
    config: ServerConfig,
    registry: parking_lot::Mutex<HandlerRegistry>,
    engine: E,
    signal: S,
    /// Held for the whole start sequence and the whole stop sequence
    running: Mutex<Option<RunningServer>>,
    /// Effective base URI and bound address while running (sync access)
    bound: parking_lot::Mutex<Option<(Url, SocketAddr)>>,
    state_tx: watch::Sender<ServerState>,
    opener: parking_lot::Mutex<BrowserOpener>,
    interrupt: parking_lot::Mutex<InterruptSignal>,
}

/// Lifecycle manager for one HTTP server instance.
///
/// Cloning is cheap and yields another handle to the same server, so one
/// task can block in [`start`](Self::start) while another calls
/// [`shutdown`](Self::shutdown).
pub struct ManagedServer<E = AxumEngine, S = TcpShutdownSignal> {
    inner: Arc<Inner<E, S>>,
}

impl<E, S> Clone for ManagedServer<E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ManagedServer {
    /// A server using the axum engine and the loopback TCP shutdown signal.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_collaborators(config, AxumEngine::new(), TcpShutdownSignal)
    }
}

impl<E: HttpEngine, S: ShutdownSignal> ManagedServer<E, S> {
    pub fn with_collaborators(config: ServerConfig, engine: E, signal: S) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Stopped);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: parking_lot::Mutex::new(HandlerRegistry::new()),
                engine,
                signal,
                running: Mutex::new(None),
                bound: parking_lot::Mutex::new(None),
                state_tx,
                opener: parking_lot::Mutex::new(system_opener()),
                interrupt: parking_lot::Mutex::new(ctrl_c_signal()),
            }),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// The configured base URI.
    pub fn base_uri(&self) -> &Url {
        self.inner.config.base_uri()
    }

    /// The base URI as served, with the bound port. `None` unless running.
    pub fn effective_base_uri(&self) -> Option<Url> {
        self.inner.bound.lock().as_ref().map(|(uri, _)| uri.clone())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.bound.lock().as_ref().map(|(_, addr)| *addr)
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn registered_units(&self) -> Vec<String> {
        self.inner.registry.lock().names()
    }

    /// Replace the platform browser opener used when `open_browser` is set.
    pub fn set_browser_opener(
        &self,
        opener: impl Fn(&Url) -> Result<(), RunnerError> + Send + Sync + 'static,
    ) {
        *self.inner.opener.lock() = Arc::new(opener);
    }

    /// Replace the Ctrl+C listener used when `handle_ctrl_c` is set.
    pub fn set_interrupt_signal(
        &self,
        interrupt: impl Fn() -> BoxFuture<'static, io::Result<()>> + Send + Sync + 'static,
    ) {
        *self.inner.interrupt.lock() = Arc::new(interrupt);
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Register a handler unit. Only allowed while the server is stopped.
    pub fn register<U: HandlerUnit>(&self, unit: U) -> Result<(), RunnerError> {
        self.inner.registry.lock().register(unit)
    }

    pub fn register_shared(&self, unit: Arc<dyn HandlerUnit>) -> Result<(), RunnerError> {
        self.inner.registry.lock().register_shared(unit)
    }

    /// Register every unit of each package. Only allowed while the server is
    /// stopped. A clash anywhere in the batch leaves the registry unchanged.
    pub fn register_packages(&self, packages: &[&dyn HandlerPackage]) -> Result<(), RunnerError> {
        self.inner.registry.lock().register_packages(packages)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Start the server and wait until it is shut down.
    ///
    /// Returns `Err` only for configuration problems detected before any
    /// network action (for example, the server is already running).
    pub async fn start(&self) -> Result<RunOutcome, RunnerError> {
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let effective = {
            let mut running = self.inner.running.lock().await;
            if running.is_some() || self.state() != ServerState::Stopped {
                return Err(RunnerError::configuration(format!(
                    "server at {} is already running",
                    self.base_uri()
                )));
            }

            let handlers = self.inner.registry.lock().freeze();
            self.inner.state_tx.send_replace(ServerState::Starting);

            match self.bring_up(handlers, stopped_tx).await {
                Ok(server) => {
                    let effective = server.handle.base_uri().clone();
                    *self.inner.bound.lock() = Some((effective.clone(), server.handle.local_addr()));
                    *running = Some(server);
                    self.inner.state_tx.send_replace(ServerState::Running);
                    effective
                }
                Err(e) => {
                    self.inner.registry.lock().thaw();
                    self.inner.state_tx.send_replace(ServerState::Stopped);
                    error!("Exception starting server: {e}");
                    return Ok(RunOutcome::Failed(e));
                }
            }
        };

        info!("Application started at {effective}");
        info!("WADL available at {}", description_uri(&effective));

        if self.inner.config.open_browser {
            info!("Opening web browser to {effective}");
            let opener = self.inner.opener.lock().clone();
            if let Err(e) = opener(&effective) {
                warn!("{e}");
            }
        }

        self.wait_for_stop(stopped_rx).await;
        Ok(RunOutcome::Stopped)
    }

    /// Drive [`start`](Self::start) on a dedicated runtime, for synchronous `main` functions.
    ///
    /// Inside a tokio runtime this is a configuration error; await
    /// [`start`](Self::start) there instead.
    pub fn start_blocking(&self) -> Result<RunOutcome, RunnerError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(RunnerError::configuration(
                "start_blocking() called from inside an async runtime; await start() instead",
            ));
        }

        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                let e = RunnerError::startup(self.base_uri().as_str(), e);
                error!("Exception starting server: {e}");
                return Ok(RunOutcome::Failed(e));
            }
        };
        runtime.block_on(self.start())
    }

    /// Stop the server, giving in-flight requests the configured grace period.
    ///
    /// A no-op when the server is not running. Wakes a waiting `start()`.
    pub async fn shutdown(&self) {
        let mut running = self.inner.running.lock().await;
        let Some(mut server) = running.take() else {
            debug!("Shutdown requested but the server is not running");
            return;
        };

        let grace = self.inner.config.grace_period;
        info!("Shutting down server at {} (grace period {grace:?})", server.handle.base_uri());

        server.listener.stop().await;
        server.handle.stop(grace).await;

        *self.inner.bound.lock() = None;
        self.inner.registry.lock().thaw();
        self.inner.state_tx.send_replace(ServerState::Stopped);
        let _ = server.stopped_tx.send(());
        info!("Server stopped");
    }

    // ── Internal ──────────────────────────────────────────────────────────

    async fn bring_up(
        &self,
        handlers: HandlerSet,
        stopped_tx: oneshot::Sender<()>,
    ) -> Result<RunningServer, RunnerError> {
        let config = &self.inner.config;

        // Must finish before binding, or the prior instance still holds the port.
        if config.shutdown.is_enabled() && self.inner.signal.request_shutdown(&config.shutdown).await {
            info!(
                "Prior instance at {} was shut down",
                config.shutdown.address().unwrap_or_default()
            );
        }

        let mut handle = self.inner.engine.bind(config.base_uri(), handlers).await?;

        if !config.shutdown.is_enabled() {
            return Ok(RunningServer {
                handle,
                listener: ShutdownListener::inert(),
                stopped_tx,
            });
        }

        match self.inner.signal.listen(&config.shutdown, self.shutdown_callback()).await {
            Ok(listener) => Ok(RunningServer {
                handle,
                listener,
                stopped_tx,
            }),
            Err(e) => {
                handle.stop(Duration::ZERO).await;
                Err(e)
            }
        }
    }

    /// Callback for the shutdown listener. Holds the server weakly so an
    /// abandoned server is not kept alive by its own listener.
    fn shutdown_callback(&self) -> ShutdownCallback {
        let weak: Weak<Inner<E, S>> = Arc::downgrade(&self.inner);
        Arc::new(move || -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    ManagedServer { inner }.shutdown().await;
                }
            })
        })
    }

    async fn wait_for_stop(&self, stopped_rx: oneshot::Receiver<()>) {
        let interrupt = self
            .inner
            .config
            .handle_ctrl_c
            .then(|| self.inner.interrupt.lock().clone());

        let interrupted = async move {
            if let Some(interrupt) = interrupt {
                match interrupt().await {
                    Ok(()) => return,
                    Err(e) => warn!("Unable to listen for Ctrl+C: {e}"),
                }
            }
            std::future::pending::<()>().await
        };

        // A dropped sender also means the run is over.
        tokio::select! {
            _ = stopped_rx => {}
            _ = interrupted => {
                info!("Interrupt received");
                self.shutdown().await;
            }
        }
    }
}

impl<E, S> std::fmt::Debug for ManagedServer<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("base_uri", &self.inner.config.base_uri().as_str())
            .field("state", &*self.inner.state_tx.borrow())
            .finish()
    }
}
