//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding frames.
///
/// Format and truncation errors leave the stream in an unknown position;
/// callers should drop the connection rather than try to resynchronize.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic number: got {0:#04x} (expected {:#04x})", crate::MAGIC_NUMBER)]
    InvalidMagic(u8),

    #[error("malformed metadata block: {0}")]
    MalformedMetadata(String),

    #[error("metadata entry {key:?} contains the line separator")]
    InvalidMetadataEntry { key: String },

    #[error("invalid UTF-8 in metadata")]
    InvalidUtf8,

    #[error("{section} too large: {size} bytes (max {max})")]
    FrameTooLarge {
        section: &'static str,
        size: u64,
        max: u64,
    },

    #[error("stream closed while reading {section}")]
    Truncated { section: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Maps a failed full read of `section` into a protocol error.
    ///
    /// An early end of stream becomes [`ProtocolError::Truncated`], anything
    /// else stays an I/O error.
    pub(crate) fn from_read(section: &'static str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated { section }
        } else {
            ProtocolError::Io(err)
        }
    }

    /// Returns whether the error means the peer sent a frame that cannot be
    /// parsed, as opposed to a transport failure.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagic(_)
                | ProtocolError::MalformedMetadata(_)
                | ProtocolError::InvalidUtf8
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_from_read_maps_eof_to_truncated() {
        let err = ProtocolError::from_read("header", io::ErrorKind::UnexpectedEof.into());
        assert!(matches!(err, ProtocolError::Truncated { section: "header" }));

        let err = ProtocolError::from_read("payload", io::ErrorKind::ConnectionReset.into());
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_format_error_classification() {
        assert!(ProtocolError::InvalidMagic(0x09).is_format_error());
        assert!(ProtocolError::MalformedMetadata("x".into()).is_format_error());
        assert!(!ProtocolError::Truncated { section: "header" }.is_format_error());
        assert!(!ProtocolError::Io(io::ErrorKind::BrokenPipe.into()).is_format_error());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(0x42);
        let msg = err.to_string();
        assert!(msg.contains("0x08"));
        assert!(msg.contains("0x42"));

        let err = ProtocolError::FrameTooLarge {
            section: "payload",
            size: 100,
            max: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("payload"));
        assert!(msg.contains("100"));

        let err = ProtocolError::Truncated {
            section: "metadata",
        };
        assert!(err.to_string().contains("metadata"));

        let err = ProtocolError::InvalidMetadataEntry {
            key: "bad".to_string(),
        };
        assert!(err.to_string().contains("bad"));
    }
}
