//! Metadata block encoding.
//!
//! Each entry is written as `key \r\n value \r\n`. Entries are emitted in key
//! order so the same map always encodes to the same bytes.

use crate::error::ProtocolError;
use bytes::BufMut;
use std::collections::BTreeMap;

/// String-keyed, string-valued side channel carried with every message.
pub type Metadata = BTreeMap<String, String>;

/// Separator written after every key and every value.
pub const METADATA_SEPARATOR: &[u8; 2] = b"\r\n";

fn contains_separator(s: &str) -> bool {
    s.as_bytes()
        .windows(METADATA_SEPARATOR.len())
        .any(|w| w == METADATA_SEPARATOR)
}

/// Checks that every entry can be encoded and returns the block length.
pub fn encoded_len(metadata: &Metadata) -> Result<usize, ProtocolError> {
    let mut len = 0;
    for (key, value) in metadata {
        if contains_separator(key) || contains_separator(value) {
            return Err(ProtocolError::InvalidMetadataEntry { key: key.clone() });
        }
        len += key.len() + value.len() + 2 * METADATA_SEPARATOR.len();
    }
    Ok(len)
}

/// Appends the encoded block to `buf`.
///
/// Entries must already have been checked with [`encoded_len`].
pub(crate) fn encode_into<B: BufMut>(metadata: &Metadata, buf: &mut B) {
    for (key, value) in metadata {
        buf.put_slice(key.as_bytes());
        buf.put_slice(METADATA_SEPARATOR);
        buf.put_slice(value.as_bytes());
        buf.put_slice(METADATA_SEPARATOR);
    }
}

/// Encodes a metadata map into a standalone block.
pub fn encode(metadata: &Metadata) -> Result<Vec<u8>, ProtocolError> {
    let len = encoded_len(metadata)?;
    let mut buf = Vec::with_capacity(len);
    encode_into(metadata, &mut buf);
    Ok(buf)
}

fn split_on_separator(block: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + METADATA_SEPARATOR.len() <= block.len() {
        if &block[i..i + METADATA_SEPARATOR.len()] == METADATA_SEPARATOR {
            tokens.push(&block[start..i]);
            i += METADATA_SEPARATOR.len();
            start = i;
        } else {
            i += 1;
        }
    }
    tokens.push(&block[start..]);
    tokens
}

/// Decodes a metadata block.
///
/// An empty block is an empty map. Any other block must split into an odd
/// number of tokens whose last token is empty and which hold at least one
/// key/value pair.
pub fn decode(block: &[u8]) -> Result<Metadata, ProtocolError> {
    let mut metadata = Metadata::new();
    if block.is_empty() {
        return Ok(metadata);
    }

    let tokens = split_on_separator(block);
    if tokens.len() % 2 != 1 {
        return Err(ProtocolError::MalformedMetadata(format!(
            "expected an odd number of tokens, got {}",
            tokens.len()
        )));
    }
    if tokens.len() < 3 {
        return Err(ProtocolError::MalformedMetadata(
            "block holds no key/value pair".to_string(),
        ));
    }
    if !tokens[tokens.len() - 1].is_empty() {
        return Err(ProtocolError::MalformedMetadata(
            "block does not end with a separator".to_string(),
        ));
    }

    for pair in tokens[..tokens.len() - 1].chunks_exact(2) {
        let key = std::str::from_utf8(pair[0]).map_err(|_| ProtocolError::InvalidUtf8)?;
        let value = std::str::from_utf8(pair[1]).map_err(|_| ProtocolError::InvalidUtf8)?;
        if metadata.insert(key.to_string(), value.to_string()).is_some() {
            return Err(ProtocolError::MalformedMetadata(format!(
                "duplicate key {:?}",
                key
            )));
        }
    }

    Ok(metadata)
}
