//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::Bytes;
use kitten_protocol::{Message, SerializeType, ID_KEY, METHOD_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// High-level client for kitten RPC.
pub struct Client {
    conn: Arc<Connection>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
            read_task: Mutex::new(None),
        }
    }

    /// Connects to the server and starts the background read loop.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await?;

        let conn = self.conn.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = conn.read_loop().await {
                tracing::debug!("Read loop ended: {}", e);
            }
        });
        if let Some(previous) = self.read_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await?;
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn build_request(&self, method: &str, payload: Bytes) -> Message {
        let mut message = Message::new()
            .with_meta(METHOD_KEY, method)
            .with_meta(ID_KEY, uuid::Uuid::new_v4().to_string())
            .with_payload(payload);
        message.header = self.conn.request_header();
        message
    }

    fn into_result(response: Message) -> Result<Bytes, ClientError> {
        if response.header.is_exception() {
            return Err(ClientError::Remote(
                String::from_utf8_lossy(&response.payload).into_owned(),
            ));
        }
        Ok(response.payload)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Calls `method` and returns the response payload.
    ///
    /// An exception response becomes [`ClientError::Remote`] with the
    /// server's description.
    pub async fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, ClientError> {
        let request = self.build_request(method, payload.into());
        tracing::debug!("Calling {}", method);
        let response = self.conn.send(request).await?;
        Self::into_result(response)
    }

    /// Calls `method` with a JSON-encoded argument and decodes the JSON reply.
    pub async fn call_json<T, R>(&self, method: &str, args: &T) -> Result<R, ClientError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.build_request(method, Bytes::from(serde_json::to_vec(args)?));
        request.header.set_serialize_type(SerializeType::Json);
        let response = self.conn.send(request).await?;
        let payload = Self::into_result(response)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Sends a one-way request to `method`; the server does not reply.
    pub async fn notify(&self, method: &str, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        let request = self.build_request(method, payload.into());
        self.conn.send_oneway(request).await?;
        Ok(())
    }

    /// Sends a heartbeat and returns the round-trip time.
    pub async fn heartbeat(&self) -> Result<Duration, ClientError> {
        let mut request = Message::new();
        request.header = self.conn.request_header().with_heartbeat(true);

        let start = Instant::now();
        let response = self.conn.send(request).await?;
        let elapsed = start.elapsed();

        if !response.header.is_heartbeat() {
            return Err(ClientError::UnexpectedResponse(format!(
                "expected heartbeat reply, got {:?}",
                response.header
            )));
        }
        Ok(elapsed)
    }
}
