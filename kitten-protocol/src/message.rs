//! In-memory message and frame encoding.

use crate::error::ProtocolError;
use crate::header::{Header, MessageStatus, MessageType};
use crate::metadata::{self, Metadata};
use crate::{HEADER_LEN, LENGTH_PREFIX_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;

/// Metadata key naming the remote method a request targets.
pub const METHOD_KEY: &str = "__METHOD";

/// Metadata key carrying a caller-chosen request/trace identifier.
pub const ID_KEY: &str = "__ID";

/// One RPC frame: header, metadata and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub header: Header,
    pub metadata: Metadata,
    pub payload: Bytes,
}

impl Message {
    /// Creates a message with a fresh header, no metadata and an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request with the given sequence number.
    pub fn request(seq: u64) -> Self {
        Self {
            header: Header::new()
                .with_message_type(MessageType::Request)
                .with_seq(seq),
            ..Self::default()
        }
    }

    /// Creates a heartbeat request with the given sequence number.
    pub fn heartbeat(seq: u64) -> Self {
        let mut message = Self::request(seq);
        message.header.set_heartbeat(true);
        message
    }

    /// Creates the response skeleton for `request`.
    ///
    /// Version, sequence number, heartbeat flag, compress and serialize type
    /// are carried over; metadata and payload start empty.
    pub fn response_to(request: &Message) -> Self {
        let req = &request.header;
        let header = Header::new()
            .with_version(req.version())
            .with_message_type(MessageType::Response)
            .with_heartbeat(req.is_heartbeat())
            .with_compress_type(req.compress_type())
            .with_serialize_type(req.serialize_type())
            .with_seq(req.seq());
        Self {
            header,
            ..Self::default()
        }
    }

    /// Creates an exception response to `request` carrying `description`.
    pub fn exception_to(request: &Message, description: impl Into<String>) -> Self {
        let mut message = Self::response_to(request);
        message.header.set_message_status(MessageStatus::Exception);
        message.payload = Bytes::from(description.into());
        message
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Returns the method named in the metadata, if any.
    pub fn method(&self) -> Option<&str> {
        self.metadata.get(METHOD_KEY).map(String::as_str)
    }

    fn checked_section_len(section: &'static str, len: usize) -> Result<u32, ProtocolError> {
        u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
            section,
            size: len as u64,
            max: u32::MAX as u64,
        })
    }

    /// Returns the number of bytes [`Message::encode`] will produce.
    pub fn encoded_len(&self) -> Result<usize, ProtocolError> {
        let meta_len = metadata::encoded_len(&self.metadata)?;
        Ok(HEADER_LEN + LENGTH_PREFIX_LEN + meta_len + LENGTH_PREFIX_LEN + self.payload.len())
    }

    /// Encodes the whole frame into one buffer of exactly the frame's size.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let meta_len = metadata::encoded_len(&self.metadata)?;
        let meta_prefix = Self::checked_section_len("metadata", meta_len)?;
        let payload_prefix = Self::checked_section_len("payload", self.payload.len())?;

        let total = HEADER_LEN + LENGTH_PREFIX_LEN + meta_len + LENGTH_PREFIX_LEN + self.payload.len();
        let mut buf = BytesMut::with_capacity(total);

        buf.put_slice(self.header.as_bytes());
        buf.put_u32(meta_prefix);
        metadata::encode_into(&self.metadata, &mut buf);
        buf.put_u32(payload_prefix);
        buf.put_slice(&self.payload);

        debug_assert_eq!(buf.len(), total);
        Ok(buf)
    }

    /// Writes the frame section by section to `writer`.
    ///
    /// Stops at the first failed write; the sink may then hold a partial frame.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let meta = metadata::encode(&self.metadata)?;
        let meta_prefix = Self::checked_section_len("metadata", meta.len())?;
        let payload_prefix = Self::checked_section_len("payload", self.payload.len())?;

        writer.write_all(self.header.as_bytes())?;
        writer.write_all(&meta_prefix.to_be_bytes())?;
        writer.write_all(&meta)?;
        writer.write_all(&payload_prefix.to_be_bytes())?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}
