//! Frame readers and writers.
//!
//! Three ways to decode a frame:
//! - [`read_message`] over a blocking [`std::io::Read`]
//! - [`read_message_async`] over a tokio [`AsyncRead`]
//! - [`Decoder`], fed with bytes as they arrive
//!
//! The stream readers consume exactly one frame and leave the stream at the
//! start of the next one. None of them reject a wrong magic number; callers
//! check [`Header::validate`](crate::Header::validate) themselves.
//!
//! [`read_message`] and [`read_message_async`] accept any length a frame can
//! declare. Readers facing untrusted peers go through the `_with_limits`
//! variants or a [`Decoder`] built with [`FrameLimits`].

use crate::error::ProtocolError;
use crate::header::{Header, HEADER_LEN};
use crate::message::Message;
use crate::metadata;
use crate::{LENGTH_PREFIX_LEN, MAX_METADATA_SIZE, MAX_PAYLOAD_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SECTION_HEADER: &str = "header";
const SECTION_META_LEN: &str = "metadata length";
const SECTION_META: &str = "metadata";
const SECTION_PAYLOAD_LEN: &str = "payload length";
const SECTION_PAYLOAD: &str = "payload";

/// Largest buffer reserved up front for a section; the rest grows as bytes
/// actually arrive.
const SECTION_PREALLOC: usize = 64 * 1024;

/// Upper bounds on the declared section lengths of an incoming frame.
///
/// Lengths are checked before any buffer is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_metadata_len: u32,
    pub max_payload_len: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_metadata_len: MAX_METADATA_SIZE,
            max_payload_len: MAX_PAYLOAD_SIZE,
        }
    }
}

impl FrameLimits {
    /// Limits that accept any length a frame can declare.
    pub fn unlimited() -> Self {
        Self {
            max_metadata_len: u32::MAX,
            max_payload_len: u32::MAX,
        }
    }

    fn check(&self, section: &'static str, len: u32, max: u32) -> Result<usize, ProtocolError> {
        if len > max {
            return Err(ProtocolError::FrameTooLarge {
                section,
                size: len as u64,
                max: max as u64,
            });
        }
        Ok(len as usize)
    }

    fn check_metadata(&self, len: u32) -> Result<usize, ProtocolError> {
        self.check(SECTION_META, len, self.max_metadata_len)
    }

    fn check_payload(&self, len: u32) -> Result<usize, ProtocolError> {
        self.check(SECTION_PAYLOAD, len, self.max_payload_len)
    }
}

fn read_exact_sync<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), ProtocolError> {
    reader
        .read_exact(buf)
        .map_err(|e| ProtocolError::from_read(section, e))
}

fn read_section_sync<R: Read>(
    reader: &mut R,
    len: usize,
    section: &'static str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(len.min(SECTION_PREALLOC));
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| ProtocolError::from_read(section, e))?;
    if buf.len() < len {
        return Err(ProtocolError::Truncated { section });
    }
    Ok(buf)
}

fn read_u32_sync<R: Read>(reader: &mut R, section: &'static str) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; LENGTH_PREFIX_LEN];
    read_exact_sync(reader, &mut buf, section)?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads one frame from a blocking reader, accepting any declared length.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message, ProtocolError> {
    read_message_with_limits(reader, &FrameLimits::unlimited())
}

/// Reads one frame from a blocking reader.
pub fn read_message_with_limits<R: Read>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Message, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    read_exact_sync(reader, &mut header, SECTION_HEADER)?;

    let meta_len = limits.check_metadata(read_u32_sync(reader, SECTION_META_LEN)?)?;
    let metadata = if meta_len == 0 {
        metadata::Metadata::new()
    } else {
        metadata::decode(&read_section_sync(reader, meta_len, SECTION_META)?)?
    };

    let payload_len = limits.check_payload(read_u32_sync(reader, SECTION_PAYLOAD_LEN)?)?;
    let payload = read_section_sync(reader, payload_len, SECTION_PAYLOAD)?;

    Ok(Message {
        header: Header::from_bytes(header),
        metadata,
        payload: Bytes::from(payload),
    })
}

async fn read_exact_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), ProtocolError> {
    reader
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|e| ProtocolError::from_read(section, e))
}

async fn read_section_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
    section: &'static str,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(len.min(SECTION_PREALLOC));
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ProtocolError::from_read(section, e))?;
    if buf.len() < len {
        return Err(ProtocolError::Truncated { section });
    }
    Ok(buf)
}

async fn read_u32_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    section: &'static str,
) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; LENGTH_PREFIX_LEN];
    read_exact_async(reader, &mut buf, section).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads one frame from an async reader, accepting any declared length.
pub async fn read_message_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Message, ProtocolError> {
    read_message_async_with_limits(reader, &FrameLimits::unlimited()).await
}

/// Reads one frame from an async reader.
///
/// Not cancel-safe: dropping the future mid-frame loses the bytes already
/// consumed, so the connection must be closed afterwards.
pub async fn read_message_async_with_limits<R: AsyncRead + Unpin>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Message, ProtocolError> {
    let mut header = [0u8; HEADER_LEN];
    read_exact_async(reader, &mut header, SECTION_HEADER).await?;

    let meta_len = limits.check_metadata(read_u32_async(reader, SECTION_META_LEN).await?)?;
    let metadata = if meta_len == 0 {
        metadata::Metadata::new()
    } else {
        metadata::decode(&read_section_async(reader, meta_len, SECTION_META).await?)?
    };

    let payload_len = limits.check_payload(read_u32_async(reader, SECTION_PAYLOAD_LEN).await?)?;
    let payload = read_section_async(reader, payload_len, SECTION_PAYLOAD).await?;

    Ok(Message {
        header: Header::from_bytes(header),
        metadata,
        payload: Bytes::from(payload),
    })
}

/// Writes one frame to an async writer, section by section, and flushes it.
pub async fn write_message_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    let meta = metadata::encode(&message.metadata)?;
    let meta_len = u32::try_from(meta.len()).map_err(|_| ProtocolError::FrameTooLarge {
        section: SECTION_META,
        size: meta.len() as u64,
        max: u32::MAX as u64,
    })?;
    let payload_len =
        u32::try_from(message.payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            section: SECTION_PAYLOAD,
            size: message.payload.len() as u64,
            max: u32::MAX as u64,
        })?;

    writer.write_all(message.header.as_bytes()).await?;
    writer.write_all(&meta_len.to_be_bytes()).await?;
    writer.write_all(&meta).await?;
    writer.write_all(&payload_len.to_be_bytes()).await?;
    writer.write_all(&message.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes messages into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message into a contiguous frame.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        message.encode()
    }

    /// Encodes a heartbeat request with the given sequence number.
    pub fn encode_heartbeat(seq: u64) -> Result<BytesMut, ProtocolError> {
        Message::heartbeat(seq).encode()
    }
}

/// Incremental frame decoder.
///
/// Bytes are appended with [`Decoder::extend`]; [`Decoder::decode_message`]
/// returns `Ok(None)` until a complete frame is buffered and then consumes
/// exactly that frame.
pub struct Decoder {
    buffer: BytesMut,
    limits: FrameLimits,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limits(FrameLimits::default())
    }

    pub fn with_limits(limits: FrameLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            limits,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn peek_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.buffer.get(offset..offset + LENGTH_PREFIX_LEN)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Attempts to decode the next message from the buffer.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let meta_offset = HEADER_LEN + LENGTH_PREFIX_LEN;
        let Some(meta_len) = self.peek_u32(HEADER_LEN) else {
            return Ok(None);
        };
        let meta_len = self.limits.check_metadata(meta_len)?;

        let Some(payload_len) = self.peek_u32(meta_offset + meta_len) else {
            return Ok(None);
        };
        let payload_len = self.limits.check_payload(payload_len)?;

        let total = meta_offset + meta_len + LENGTH_PREFIX_LEN + payload_len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total);
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&frame[..HEADER_LEN]);
        frame.advance(meta_offset);

        let block = frame.split_to(meta_len);
        let metadata = metadata::decode(&block)?;
        frame.advance(LENGTH_PREFIX_LEN);

        Ok(Some(Message {
            header: Header::from_bytes(header),
            metadata,
            payload: frame.freeze(),
        }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
