//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::{respond, RequestHandler};
use crate::upgrade;
use kitten_protocol::{
    write_message_async, Decoder, FrameLimits, DEFAULT_DEBUG_PATH, DEFAULT_PORT, DEFAULT_RPC_PATH,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Path accepting `CONNECT` for RPC traffic.
    pub rpc_path: String,
    /// Debug path, also upgraded to RPC traffic.
    pub debug_path: String,
    /// Limits applied to incoming frames.
    pub limits: FrameLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            debug_path: DEFAULT_DEBUG_PATH.to_string(),
            limits: FrameLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the frame limits.
    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            rpc_path: config.rpc.rpc_path.clone(),
            debug_path: config.rpc.debug_path.clone(),
            limits: config.rpc.frame_limits(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub heartbeats_total: AtomicU64,
    pub exceptions_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for kitten RPC.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server dispatching requests to `handler`.
    pub fn new(config: ServerConfig, handler: impl RequestHandler + 'static) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Server listening on {} (rpc path {}, debug path {})",
            local_addr,
            self.config.rpc_path,
            self.config.debug_path
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    handler,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    if e.is_failure() {
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single connection: upgrade, then frames until close.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let paths = [config.rpc_path.as_str(), config.debug_path.as_str()];
        let path = tokio::select! {
            result = upgrade::accept_connect(&mut reader, &mut writer, &paths) => result?,
            _ = tokio::time::sleep(config.idle_timeout) => {
                tracing::debug!("[{}] Timed out waiting for CONNECT", addr);
                return Ok(());
            }
        };
        tracing::info!("Client connected: {} ({})", addr, path);

        let mut decoder = Decoder::with_limits(config.limits);
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            if decoder.buffered() > 0 {
                                tracing::debug!(
                                    "[{}] Discarding {} bytes of partial frame",
                                    addr,
                                    decoder.buffered()
                                );
                            }
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    tracing::debug!("[{}] Idle timeout", addr);
                    return Ok(());
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            while let Some(request) = decoder.decode_message()? {
                if let Err(e) = request.header.validate() {
                    tracing::warn!("[{}] {}, closing connection", addr, e);
                    return Err(e.into());
                }

                let header = &request.header;
                if header.is_heartbeat() {
                    stats.heartbeats_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("[{}] Heartbeat (seq={})", addr, header.seq());
                } else if header.is_response() {
                    tracing::debug!("[{}] Ignoring response frame (seq={})", addr, header.seq());
                } else {
                    stats.requests_total.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "[{}] Request: {} (seq={}{})",
                        addr,
                        request.method().unwrap_or("<none>"),
                        header.seq(),
                        if header.is_one_way() { ", one-way" } else { "" }
                    );
                }

                let Some(response) = respond(handler.as_ref(), &request) else {
                    continue;
                };

                if response.header.is_exception() {
                    stats.exceptions_total.fetch_add(1, Ordering::Relaxed);
                }
                if !response.header.is_heartbeat() {
                    tracing::info!(
                        "[{}] Response: {} (seq={})",
                        addr,
                        if response.header.is_exception() { "EXCEPTION" } else { "OK" },
                        response.header.seq()
                    );
                }

                write_message_async(&mut writer, &response).await?;
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
