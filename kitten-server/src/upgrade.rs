//! HTTP `CONNECT` upgrade.
//!
//! A client opens a plain TCP connection and sends
//!
//! ```text
//! CONNECT /_kittenRpc_ HTTP/1.0
//!
//! ```
//!
//! The server answers `HTTP/1.0 200 Connected to kitten RPC` followed by a
//! blank line, after which both sides speak kitten frames on the raw socket.

use crate::error::ServerError;
use kitten_protocol::CONNECTED_STATUS;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the size of the HTTP request head.
pub const MAX_REQUEST_HEAD: u64 = 8 * 1024;

/// A parsed HTTP request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

impl RequestLine {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();
        let version = parts.next()?.to_string();
        if parts.next().is_some() || !version.starts_with("HTTP/") {
            return None;
        }
        Some(Self {
            method,
            path,
            version,
        })
    }
}

fn plain_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Reads the request head (request line and headers) from `reader`.
///
/// Returns `Ok(None)` when the peer closes before sending a full head.
async fn read_request_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<RequestLine>, ServerError> {
    let mut remaining = MAX_REQUEST_HEAD;
    let mut request_line = None;

    loop {
        let mut line = String::new();
        let n = (&mut *reader)
            .take(remaining)
            .read_line(&mut line)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => {
                    ServerError::UpgradeRejected("request head is not valid UTF-8".to_string())
                }
                _ => ServerError::Io(e),
            })?;
        if n == 0 {
            if remaining == 0 {
                return Err(ServerError::UpgradeRejected(
                    "request head too large".to_string(),
                ));
            }
            return Ok(None);
        }
        remaining -= n as u64;

        if !line.ends_with('\n') {
            if remaining == 0 {
                return Err(ServerError::UpgradeRejected(
                    "request head too large".to_string(),
                ));
            }
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        match request_line {
            None => {
                let parsed = RequestLine::parse(trimmed).ok_or_else(|| {
                    ServerError::UpgradeRejected(format!("malformed request line: {:?}", trimmed))
                })?;
                request_line = Some(parsed);
            }
            Some(_) if trimmed.is_empty() => return Ok(request_line),
            Some(_) => {}
        }
    }
}

/// Performs the server side of the upgrade.
///
/// On success the acknowledgement has been written and the matched path is
/// returned. Rejected requests get an HTTP error response and
/// [`ServerError::UpgradeRejected`].
pub async fn accept_connect<R, W>(
    reader: &mut R,
    writer: &mut W,
    paths: &[&str],
) -> Result<String, ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match read_request_head(reader).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            return Err(ServerError::UpgradeRejected(
                "connection closed before request head".to_string(),
            ))
        }
        Err(ServerError::UpgradeRejected(reason)) => {
            let response = plain_response("400 Bad Request", "400 bad request\n");
            writer.write_all(response.as_bytes()).await?;
            writer.flush().await?;
            return Err(ServerError::UpgradeRejected(reason));
        }
        Err(e) => return Err(e),
    };

    if request.method != "CONNECT" {
        let response = plain_response("405 Method Not Allowed", "405 must CONNECT\n");
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        return Err(ServerError::UpgradeRejected(format!(
            "method {} not allowed",
            request.method
        )));
    }

    if !paths.contains(&request.path.as_str()) {
        let response = plain_response("404 Not Found", "404 page not found\n");
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        return Err(ServerError::UpgradeRejected(format!(
            "unknown path {}",
            request.path
        )));
    }

    let ack = format!("HTTP/1.0 {}\n\n", CONNECTED_STATUS);
    writer.write_all(ack.as_bytes()).await?;
    writer.flush().await?;

    Ok(request.path)
}
