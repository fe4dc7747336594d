//! Remote shutdown signal: ask a prior instance to stop, and listen for
//! requests to stop this one.
//!
//! The TCP implementation speaks newline-delimited JSON (see
//! `runner_protocol::shutdown`). A listener acknowledges a valid request,
//! runs the shutdown callback, and reports `stopped` once the callback has
//! finished, so the requester knows the ports are free.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use runner_protocol::{
    RunnerError, ShutdownConfig, ShutdownRequest, ShutdownResponse, ShutdownStatus,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Invoked when a valid shutdown request arrives. The returned future
/// completes once the instance has stopped.
pub type ShutdownCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Out-of-band channel used to stop a prior instance and to be stopped by a later one.
pub trait ShutdownSignal: Send + Sync + 'static {
    /// Ask whatever listens at the configured endpoint to stop.
    ///
    /// Best-effort: returns `true` only if an instance acknowledged. No
    /// listener (refused connection, timeout) is the common case and yields `false`.
    fn request_shutdown(
        &self,
        config: &ShutdownConfig,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Start a background acceptor that runs `on_requested` for every valid request.
    fn listen(
        &self,
        config: &ShutdownConfig,
        on_requested: ShutdownCallback,
    ) -> impl std::future::Future<Output = Result<ShutdownListener, RunnerError>> + Send;
}

/// Handle to a running shutdown acceptor.
///
/// Dropping it also stops the acceptor.
#[derive(Debug, Default)]
pub struct ShutdownListener {
    local_addr: Option<SocketAddr>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ShutdownListener {
    pub fn new(local_addr: SocketAddr, stop_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            local_addr: Some(local_addr),
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// A listener that listens on nothing.
    pub fn inert() -> Self {
        Self::default()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting and release the port. Exchanges already in progress
    /// run to completion on their own tasks.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// A signal that never finds a prior instance and never listens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShutdownSignal;

impl ShutdownSignal for NoopShutdownSignal {
    async fn request_shutdown(&self, _config: &ShutdownConfig) -> bool {
        false
    }

    async fn listen(
        &self,
        _config: &ShutdownConfig,
        _on_requested: ShutdownCallback,
    ) -> Result<ShutdownListener, RunnerError> {
        Ok(ShutdownListener::inert())
    }
}

/// Loopback TCP shutdown signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpShutdownSignal;

impl ShutdownSignal for TcpShutdownSignal {
    async fn request_shutdown(&self, config: &ShutdownConfig) -> bool {
        let Some(address) = config.address() else {
            return false;
        };

        match send_request(config, &address).await {
            Ok(acknowledged) => acknowledged,
            Err(e) => {
                debug!("No prior instance at {address}: {e}");
                false
            }
        }
    }

    async fn listen(
        &self,
        config: &ShutdownConfig,
        on_requested: ShutdownCallback,
    ) -> Result<ShutdownListener, RunnerError> {
        let Some(address) = config.address() else {
            return Ok(ShutdownListener::inert());
        };

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| RunnerError::startup(&address, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RunnerError::startup(&address, e))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, config.clone(), on_requested, stop_rx));

        info!("Shutdown listener on {local_addr}");
        Ok(ShutdownListener::new(local_addr, stop_tx, task))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requester side
// ─────────────────────────────────────────────────────────────────────────────

async fn send_request(config: &ShutdownConfig, address: &str) -> Result<bool, RunnerError> {
    let stream = timeout(config.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| RunnerError::shutdown_signal("timed out connecting"))?
        .map_err(|e| RunnerError::shutdown_signal(format!("connect failed: {e}")))?;

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let request = ShutdownRequest::new(config.token())
        .to_line()
        .map_err(|e| RunnerError::shutdown_signal(format!("failed to encode request: {e}")))?;
    writer
        .write_all(request.as_bytes())
        .await
        .map_err(|e| RunnerError::shutdown_signal(format!("failed to send request: {e}")))?;

    let first = timeout(config.connect_timeout, read_response(&mut lines))
        .await
        .map_err(|_| RunnerError::shutdown_signal("timed out waiting for acknowledgement"))??;

    match first.status {
        ShutdownStatus::Accepted => {}
        ShutdownStatus::Stopped => return Ok(true),
        ShutdownStatus::Rejected => {
            warn!(
                "Instance at {address} rejected the shutdown request: {}",
                first.reason.as_deref().unwrap_or("no reason given")
            );
            return Ok(false);
        }
    }

    info!("Instance at {address} accepted the shutdown request, waiting for it to stop");

    match timeout(config.stop_timeout, read_response(&mut lines)).await {
        Ok(Ok(response)) if response.status == ShutdownStatus::Stopped => {
            info!("Instance at {address} stopped");
        }
        Ok(Ok(response)) => {
            warn!("Unexpected reply from {address} while waiting for stop: {:?}", response.status);
        }
        // A prior process that exits right after stopping just closes the socket.
        Ok(Err(e)) => debug!("Shutdown channel to {address} closed: {e}"),
        Err(_) => warn!(
            "Instance at {address} did not report stopping within {:?}",
            config.stop_timeout
        ),
    }

    Ok(true)
}

async fn read_response(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
) -> Result<ShutdownResponse, RunnerError> {
    let line = lines
        .next_line()
        .await
        .map_err(|e| RunnerError::shutdown_signal(format!("read failed: {e}")))?
        .ok_or_else(|| RunnerError::shutdown_signal("connection closed"))?;

    serde_json::from_str(&line)
        .map_err(|e| RunnerError::shutdown_signal(format!("malformed response: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener side
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    config: ShutdownConfig,
    on_requested: ShutdownCallback,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_request(stream, peer, config.clone(), on_requested.clone()));
                    }
                    Err(e) => {
                        warn!("Shutdown listener failed to accept: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }

    debug!("Shutdown listener closed");
}

async fn handle_request(
    stream: TcpStream,
    peer: SocketAddr,
    config: ShutdownConfig,
    on_requested: ShutdownCallback,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let line = match timeout(config.connect_timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => {
            debug!("Shutdown connection from {peer} closed without a request");
            return;
        }
        Ok(Err(e)) => {
            debug!("Failed to read shutdown request from {peer}: {e}");
            return;
        }
        Err(_) => {
            debug!("Shutdown connection from {peer} sent nothing in time");
            return;
        }
    };

    let rejection = match serde_json::from_str::<ShutdownRequest>(&line) {
        Ok(request) if config.accepts_token(&request.token) => None,
        Ok(_) => Some(ShutdownResponse::rejected("invalid shutdown token")),
        Err(e) => Some(ShutdownResponse::rejected(format!("malformed request: {e}"))),
    };

    if let Some(rejection) = rejection {
        warn!(
            "Rejected shutdown request from {peer}: {}",
            rejection.reason.as_deref().unwrap_or_default()
        );
        send_response(&mut writer, &rejection, peer).await;
        return;
    }

    info!("Shutdown requested by {peer}");
    send_response(&mut writer, &ShutdownResponse::accepted(), peer).await;

    on_requested().await;

    send_response(&mut writer, &ShutdownResponse::stopped(), peer).await;
    let _ = writer.shutdown().await;
}

/// Best-effort reply; the requester may already have gone away.
async fn send_response(writer: &mut OwnedWriteHalf, response: &ShutdownResponse, peer: SocketAddr) {
    let line = match response.to_line() {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to encode shutdown response for {peer}: {e}");
            return;
        }
    };
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        debug!("Failed to reply to {peer}: {e}");
    }
}
