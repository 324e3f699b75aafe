//! Connection management.

use crate::error::ClientError;
use kitten_protocol::{
    write_message_async, Decoder, FrameLimits, Header, Message, MessageType, SerializeType,
    CONNECTED_STATUS, DEFAULT_RPC_PATH,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Longest handshake response line accepted from the server.
const MAX_HANDSHAKE_LINE: u64 = 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Path sent in the `CONNECT` request.
    pub rpc_path: String,
    /// Connection timeout (TCP connect and handshake).
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Protocol version written into request headers.
    pub version: u8,
    /// Serialization type written into request headers.
    pub serialize_type: SerializeType,
    /// Limits applied to incoming frames.
    pub limits: FrameLimits,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            rpc_path: DEFAULT_RPC_PATH.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            version: 0,
            serialize_type: SerializeType::None,
            limits: FrameLimits::default(),
        }
    }

    pub fn with_rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn with_serialize_type(mut self, serialize_type: SerializeType) -> Self {
        self.serialize_type = serialize_type;
        self
    }

    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A connection to a kitten server.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream (for sending requests).
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half of the stream, taken by the read loop once it starts.
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    /// Requests waiting for a response, keyed by sequence number.
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    /// Next sequence number.
    next_seq: AtomicU64,
    /// Is the connection established? Only cleared while `pending` is locked.
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Returns the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server and performs the `CONNECT` handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(BufReader::new(read_half));

        tracing::debug!("TCP connected, sending CONNECT {}", self.config.rpc_path);
        tokio::time::timeout(self.config.connect_timeout, self.handshake())
            .await
            .map_err(|_| ClientError::Timeout)??;
        tracing::debug!("Handshake complete");

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Sends the `CONNECT` request and reads the response head.
    async fn handshake(&self) -> Result<(), ClientError> {
        let request = format!("CONNECT {} HTTP/1.0\n\n", self.config.rpc_path);
        {
            let mut writer_guard = self.writer.lock().await;
            let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
            writer.write_all(request.as_bytes()).await?;
            writer.flush().await?;
        }

        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;

        let status = read_head_line(reader).await?;
        let expected = format!("HTTP/1.0 {}", CONNECTED_STATUS);
        if status != expected {
            return Err(ClientError::Handshake(format!(
                "unexpected HTTP response: {}",
                status
            )));
        }

        // Skip any response headers up to the blank line.
        while !read_head_line(reader).await?.is_empty() {}

        Ok(())
    }

    /// Builds a request header carrying the configured version and serialize type.
    pub fn request_header(&self) -> Header {
        Header::new()
            .with_version(self.config.version)
            .with_message_type(MessageType::Request)
            .with_serialize_type(self.config.serialize_type)
    }

    fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn write(&self, message: &Message) -> Result<(), ClientError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        write_message_async(writer, message).await?;
        Ok(())
    }

    /// Sends `message` and waits for the response with the same sequence number.
    ///
    /// The sequence number of `message` is replaced by a freshly allocated one.
    pub async fn send(&self, mut message: Message) -> Result<Message, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::debug!("send() called but not connected");
            return Err(ClientError::NotConnected);
        }

        let seq = self.allocate_seq();
        message.header.set_seq(seq);
        message.header.set_one_way(false);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if !self.connected.load(Ordering::SeqCst) {
                tracing::debug!("Request seq={} dropped, connection closed", seq);
                return Err(ClientError::ConnectionClosed);
            }
            pending.insert(seq, tx);
        }

        if let Err(e) = self.write(&message).await {
            self.pending.lock().await.remove(&seq);
            return Err(e);
        }
        tracing::debug!("Request seq={} sent, waiting for response...", seq);

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => {
                tracing::debug!("Request seq={} got response", seq);
                Ok(response)
            }
            Ok(Err(_)) => {
                tracing::debug!("Request seq={} channel closed", seq);
                Err(ClientError::ConnectionClosed)
            }
            Err(_) => {
                tracing::debug!("Request seq={} timed out", seq);
                self.pending.lock().await.remove(&seq);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Sends `message` as a one-way request; no response is expected.
    ///
    /// Returns the sequence number the message was sent with.
    pub async fn send_oneway(&self, mut message: Message) -> Result<u64, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let seq = self.allocate_seq();
        message.header.set_seq(seq);
        message.header.set_one_way(true);
        self.write(&message).await?;
        tracing::debug!("One-way request seq={} sent", seq);
        Ok(seq)
    }

    /// Reads and dispatches responses (call this in a background task).
    ///
    /// Returns when the connection closes or a frame cannot be decoded.
    /// Pending requests are failed with [`ClientError::ConnectionClosed`].
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(ClientError::NotConnected)?;

        tracing::debug!("read_loop started");
        let result = self.dispatch_responses(&mut reader).await;

        self.fail_pending().await;
        result
    }

    /// Marks the connection closed and drops every pending request, whose
    /// callers then see [`ClientError::ConnectionClosed`].
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if !pending.is_empty() {
            tracing::debug!("Failing {} pending requests", pending.len());
        }
        pending.clear();
    }

    async fn dispatch_responses(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
    ) -> Result<(), ClientError> {
        let mut decoder = Decoder::with_limits(self.config.limits);
        let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                return Err(ClientError::ConnectionClosed);
            }
            decoder.extend(&buf[..n]);

            while let Some(message) = decoder.decode_message()? {
                message.header.validate()?;

                let seq = message.header.seq();
                if !message.header.is_response() {
                    tracing::warn!("read_loop: ignoring request frame seq={}", seq);
                    continue;
                }

                match self.pending.lock().await.remove(&seq) {
                    Some(tx) => {
                        tracing::debug!("read_loop: dispatching response seq={}", seq);
                        let _ = tx.send(message);
                    }
                    None => tracing::debug!("read_loop: no pending request for seq={}", seq),
                }
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        // Mark as disconnected first to stop any new requests
        self.fail_pending().await;

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();

        Ok(())
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.try_lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Reads one line of the HTTP response head, without its line terminator.
async fn read_head_line<R>(reader: &mut R) -> Result<String, ClientError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_HANDSHAKE_LINE)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(ClientError::ConnectionClosed);
    }
    if !line.ends_with('\n') {
        return Err(ClientError::Handshake(
            "response line too long or truncated".to_string(),
        ));
    }
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}
