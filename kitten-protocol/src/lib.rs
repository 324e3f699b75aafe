//! # kitten-protocol
//!
//! Wire protocol implementation for kitten RPC.
//!
//! This crate provides:
//! - A 12-byte bit-packed message header
//! - `\r\n`-separated metadata encoding
//! - Length-prefixed message framing over blocking, async and buffered I/O
//! - Error types and protocol constants
//!
//! Frame layout:
//!
//! ```text
//! +----------+-----------+-----------+--------------+--------------+
//! | header   | meta_len  | metadata  | payload_len  | payload      |
//! | 12 bytes | 4 bytes   | meta_len  | 4 bytes      | payload_len  |
//! +----------+-----------+-----------+--------------+--------------+
//! ```

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod metadata;

pub use codec::{
    read_message, read_message_async, read_message_async_with_limits, read_message_with_limits,
    write_message_async, Decoder, Encoder, FrameLimits,
};
pub use error::ProtocolError;
pub use header::{
    CompressType, Header, MessageStatus, MessageType, SerializeType, HEADER_LEN, MAGIC_NUMBER,
};
pub use message::{Message, ID_KEY, METHOD_KEY};
pub use metadata::{Metadata, METADATA_SEPARATOR};

/// Size of each length prefix (metadata and payload) in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default HTTP path on which the RPC endpoint accepts `CONNECT`.
pub const DEFAULT_RPC_PATH: &str = "/_kittenRpc_";

/// Default HTTP path of the debug endpoint.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/kittenRpc";

/// Status text sent after a successful `CONNECT` upgrade.
pub const CONNECTED_STATUS: &str = "200 Connected to kitten RPC";

/// Default port for the kitten server.
pub const DEFAULT_PORT: u16 = 7070;

/// Maximum metadata block size accepted by default (1 MiB).
pub const MAX_METADATA_SIZE: u32 = 1024 * 1024;

/// Maximum payload size accepted by default (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
