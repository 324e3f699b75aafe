//! Fixed-size bit-packed message header.
//!
//! Header layout (12 bytes, multi-byte integers big-endian):
//!
//! ```text
//! byte 0    magic number (0x08)
//! byte 1    version
//! byte 2    +------1------+-----1-----+----1----+-----3-----+----2----+
//!           | msg type    | heartbeat | one-way | compress  | status  |
//!           +-------------+-----------+---------+-----------+---------+
//! byte 3    +------4------+-----4-----+
//!           | serialize   | reserved  |
//!           +-------------+-----------+
//! byte 4-11 sequence number (u64)
//! ```
//!
//! Bytes 2 and 3 are shared by several fields, so every setter clears its own
//! bit range before writing and leaves the rest of the byte untouched.

use crate::error::ProtocolError;
use std::fmt;

/// Size of the header in bytes.
pub const HEADER_LEN: usize = 12;

/// Sentinel stored in byte 0 of every valid header.
pub const MAGIC_NUMBER: u8 = 0x08;

const MAGIC_BYTE: usize = 0;
const VERSION_BYTE: usize = 1;
const FLAGS_BYTE: usize = 2;
const SERIALIZE_BYTE: usize = 3;
const SEQ_OFFSET: usize = 4;

const MESSAGE_TYPE_MASK: u8 = 0b1000_0000;
const MESSAGE_TYPE_SHIFT: u8 = 7;
const HEARTBEAT_MASK: u8 = 0b0100_0000;
const ONE_WAY_MASK: u8 = 0b0010_0000;
const COMPRESS_MASK: u8 = 0b0001_1100;
const COMPRESS_SHIFT: u8 = 2;
const STATUS_MASK: u8 = 0b0000_0011;
const STATUS_SHIFT: u8 = 0;
const SERIALIZE_MASK: u8 = 0b1111_0000;
const SERIALIZE_SHIFT: u8 = 4;

/// Whether a frame is a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    #[default]
    Request,
    Response,
}

impl MessageType {
    pub fn bits(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        if bits & 0x01 == 0 {
            MessageType::Request
        } else {
            MessageType::Response
        }
    }
}

/// Compression applied to the payload.
///
/// Only the tag is carried; this crate never compresses anything.
/// Values 2-7 are reserved and preserved as `Reserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressType {
    #[default]
    None,
    Gzip,
    Reserved(u8),
}

impl CompressType {
    pub fn bits(self) -> u8 {
        match self {
            CompressType::None => 0,
            CompressType::Gzip => 1,
            CompressType::Reserved(v) => v & 0x07,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => CompressType::None,
            1 => CompressType::Gzip,
            v => CompressType::Reserved(v),
        }
    }
}

/// Outcome carried by a frame.
///
/// With `Exception` the payload holds an error description instead of a
/// normal result. Values 2-3 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageStatus {
    #[default]
    Normal,
    Exception,
    Reserved(u8),
}

impl MessageStatus {
    pub fn bits(self) -> u8 {
        match self {
            MessageStatus::Normal => 0,
            MessageStatus::Exception => 1,
            MessageStatus::Reserved(v) => v & 0x03,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageStatus::Normal,
            1 => MessageStatus::Exception,
            v => MessageStatus::Reserved(v),
        }
    }
}

/// Serialization format of the payload. Values 2-15 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializeType {
    #[default]
    None,
    Json,
    Reserved(u8),
}

impl SerializeType {
    pub fn bits(self) -> u8 {
        match self {
            SerializeType::None => 0,
            SerializeType::Json => 1,
            SerializeType::Reserved(v) => v & 0x0F,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0 => SerializeType::None,
            1 => SerializeType::Json,
            v => SerializeType::Reserved(v),
        }
    }
}

/// The 12-byte message header.
///
/// The raw bytes are only reachable read-only; all mutation goes through the
/// field setters (`set_*`) or their chaining forms (`with_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header([u8; HEADER_LEN]);

impl Header {
    /// Creates a header with the magic number set and every other field zero.
    pub fn new() -> Self {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[MAGIC_BYTE] = MAGIC_NUMBER;
        Self(bytes)
    }

    /// Wraps raw header bytes as read from the wire. No validation is done.
    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; HEADER_LEN] {
        self.0
    }

    fn field(&self, byte: usize, mask: u8, shift: u8) -> u8 {
        (self.0[byte] & mask) >> shift
    }

    fn set_field(&mut self, byte: usize, mask: u8, shift: u8, value: u8) {
        self.0[byte] = (self.0[byte] & !mask) | ((value << shift) & mask);
    }

    /// Returns whether byte 0 holds the protocol's magic number.
    pub fn check_magic_number(&self) -> bool {
        self.0[MAGIC_BYTE] == MAGIC_NUMBER
    }

    /// Fails with [`ProtocolError::InvalidMagic`] if the magic number is wrong.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.check_magic_number() {
            Ok(())
        } else {
            Err(ProtocolError::InvalidMagic(self.0[MAGIC_BYTE]))
        }
    }

    pub fn version(&self) -> u8 {
        self.0[VERSION_BYTE]
    }

    pub fn set_version(&mut self, version: u8) {
        self.0[VERSION_BYTE] = version;
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_bits(self.field(FLAGS_BYTE, MESSAGE_TYPE_MASK, MESSAGE_TYPE_SHIFT))
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.set_field(
            FLAGS_BYTE,
            MESSAGE_TYPE_MASK,
            MESSAGE_TYPE_SHIFT,
            message_type.bits(),
        );
    }

    pub fn is_request(&self) -> bool {
        self.message_type() == MessageType::Request
    }

    pub fn is_response(&self) -> bool {
        self.message_type() == MessageType::Response
    }

    pub fn is_heartbeat(&self) -> bool {
        self.0[FLAGS_BYTE] & HEARTBEAT_MASK != 0
    }

    pub fn set_heartbeat(&mut self, heartbeat: bool) {
        self.set_flag(HEARTBEAT_MASK, heartbeat);
    }

    pub fn is_one_way(&self) -> bool {
        self.0[FLAGS_BYTE] & ONE_WAY_MASK != 0
    }

    pub fn set_one_way(&mut self, one_way: bool) {
        self.set_flag(ONE_WAY_MASK, one_way);
    }

    fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.0[FLAGS_BYTE] |= mask;
        } else {
            self.0[FLAGS_BYTE] &= !mask;
        }
    }

    pub fn compress_type(&self) -> CompressType {
        CompressType::from_bits(self.field(FLAGS_BYTE, COMPRESS_MASK, COMPRESS_SHIFT))
    }

    pub fn set_compress_type(&mut self, compress_type: CompressType) {
        self.set_field(
            FLAGS_BYTE,
            COMPRESS_MASK,
            COMPRESS_SHIFT,
            compress_type.bits(),
        );
    }

    pub fn message_status(&self) -> MessageStatus {
        MessageStatus::from_bits(self.field(FLAGS_BYTE, STATUS_MASK, STATUS_SHIFT))
    }

    pub fn set_message_status(&mut self, status: MessageStatus) {
        self.set_field(FLAGS_BYTE, STATUS_MASK, STATUS_SHIFT, status.bits());
    }

    pub fn is_exception(&self) -> bool {
        self.message_status() == MessageStatus::Exception
    }

    /// Reads the high nibble of byte 3; the low nibble is ignored.
    pub fn serialize_type(&self) -> SerializeType {
        SerializeType::from_bits(self.field(SERIALIZE_BYTE, SERIALIZE_MASK, SERIALIZE_SHIFT))
    }

    pub fn set_serialize_type(&mut self, serialize_type: SerializeType) {
        self.set_field(
            SERIALIZE_BYTE,
            SERIALIZE_MASK,
            SERIALIZE_SHIFT,
            serialize_type.bits(),
        );
    }

    pub fn seq(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[SEQ_OFFSET..HEADER_LEN]);
        u64::from_be_bytes(buf)
    }

    pub fn set_seq(&mut self, seq: u64) {
        self.0[SEQ_OFFSET..HEADER_LEN].copy_from_slice(&seq.to_be_bytes());
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.set_version(version);
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.set_message_type(message_type);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: bool) -> Self {
        self.set_heartbeat(heartbeat);
        self
    }

    pub fn with_one_way(mut self, one_way: bool) -> Self {
        self.set_one_way(one_way);
        self
    }

    pub fn with_compress_type(mut self, compress_type: CompressType) -> Self {
        self.set_compress_type(compress_type);
        self
    }

    pub fn with_message_status(mut self, status: MessageStatus) -> Self {
        self.set_message_status(status);
        self
    }

    pub fn with_serialize_type(mut self, serialize_type: SerializeType) -> Self {
        self.set_serialize_type(serialize_type);
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.set_seq(seq);
        self
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl From<[u8; HEADER_LEN]> for Header {
    fn from(bytes: [u8; HEADER_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for Header {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("magic", &format_args!("{:#04x}", self.0[MAGIC_BYTE]))
            .field("version", &self.version())
            .field("message_type", &self.message_type())
            .field("heartbeat", &self.is_heartbeat())
            .field("one_way", &self.is_one_way())
            .field("compress_type", &self.compress_type())
            .field("message_status", &self.message_status())
            .field("serialize_type", &self.serialize_type())
            .field("seq", &self.seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fully_set() -> Header {
        Header::new()
            .with_version(0xA5)
            .with_message_type(MessageType::Response)
            .with_heartbeat(true)
            .with_one_way(true)
            .with_compress_type(CompressType::Reserved(5))
            .with_message_status(MessageStatus::Exception)
            .with_serialize_type(SerializeType::Reserved(9))
            .with_seq(0x0102_0304_0506_0708)
    }

    fn assert_fully_set_except(header: &Header, skip: &str) {
        if skip != "version" {
            assert_eq!(header.version(), 0xA5);
        }
        if skip != "message_type" {
            assert_eq!(header.message_type(), MessageType::Response);
        }
        if skip != "heartbeat" {
            assert!(header.is_heartbeat());
        }
        if skip != "one_way" {
            assert!(header.is_one_way());
        }
        if skip != "compress_type" {
            assert_eq!(header.compress_type(), CompressType::Reserved(5));
        }
        if skip != "message_status" {
            assert_eq!(header.message_status(), MessageStatus::Exception);
        }
        if skip != "serialize_type" {
            assert_eq!(header.serialize_type(), SerializeType::Reserved(9));
        }
        if skip != "seq" {
            assert_eq!(header.seq(), 0x0102_0304_0506_0708);
        }
        assert!(header.check_magic_number());
    }

    #[test]
    fn test_new_header_defaults() {
        let header = Header::new();
        assert!(header.check_magic_number());
        assert_eq!(header.as_bytes()[0], MAGIC_NUMBER);
        assert_eq!(&header.as_bytes()[1..], &[0u8; HEADER_LEN - 1]);
        assert_eq!(header.version(), 0);
        assert_eq!(header.message_type(), MessageType::Request);
        assert!(!header.is_heartbeat());
        assert!(!header.is_one_way());
        assert_eq!(header.compress_type(), CompressType::None);
        assert_eq!(header.message_status(), MessageStatus::Normal);
        assert_eq!(header.serialize_type(), SerializeType::None);
        assert_eq!(header.seq(), 0);
    }

    #[test]
    fn test_corrupted_magic() {
        let mut bytes = Header::new().into_bytes();
        bytes[0] = 0x09;
        let header = Header::from_bytes(bytes);
        assert!(!header.check_magic_number());
        assert!(matches!(
            header.validate(),
            Err(ProtocolError::InvalidMagic(0x09))
        ));
        assert!(Header::new().validate().is_ok());
    }

    #[test]
    fn test_flag_byte_layout() {
        let header = Header::new()
            .with_message_type(MessageType::Response)
            .with_heartbeat(true)
            .with_one_way(true)
            .with_compress_type(CompressType::Gzip)
            .with_message_status(MessageStatus::Exception)
            .with_serialize_type(SerializeType::Json);

        // 1 | 1 | 1 | 001 | 01
        assert_eq!(header.as_bytes()[2], 0b1110_0101);
        assert_eq!(header.as_bytes()[3], 0b0001_0000);
    }

    #[test]
    fn test_seq_big_endian() {
        let header = Header::new().with_seq(123_456_789);
        assert_eq!(&header.as_bytes()[4..], &123_456_789u64.to_be_bytes());
        assert_eq!(header.seq(), 123_456_789);

        let header = header.with_seq(u64::MAX);
        assert_eq!(header.seq(), u64::MAX);
    }

    #[test]
    fn test_boolean_flags_reversible() {
        let mut header = fully_set();
        header.set_heartbeat(false);
        assert!(!header.is_heartbeat());
        assert_fully_set_except(&header, "heartbeat");
        header.set_heartbeat(true);
        assert!(header.is_heartbeat());

        header.set_one_way(false);
        assert!(!header.is_one_way());
        assert_fully_set_except(&header, "one_way");
        header.set_one_way(true);
        assert_fully_set_except(&header, "");
    }

    #[test]
    fn test_multi_bit_setters_replace() {
        let mut header = Header::new();
        header.set_compress_type(CompressType::Gzip);
        header.set_compress_type(CompressType::Reserved(6));
        assert_eq!(header.compress_type(), CompressType::Reserved(6));
        header.set_compress_type(CompressType::None);
        assert_eq!(header.compress_type(), CompressType::None);

        header.set_message_status(MessageStatus::Exception);
        header.set_message_status(MessageStatus::Reserved(2));
        assert_eq!(header.message_status(), MessageStatus::Reserved(2));
        header.set_message_status(MessageStatus::Normal);
        assert_eq!(header.message_status(), MessageStatus::Normal);

        header.set_serialize_type(SerializeType::Json);
        header.set_serialize_type(SerializeType::Reserved(14));
        assert_eq!(header.serialize_type(), SerializeType::Reserved(14));

        header.set_message_type(MessageType::Response);
        header.set_message_type(MessageType::Request);
        assert_eq!(header.message_type(), MessageType::Request);
        assert_eq!(header.as_bytes()[2], 0);
    }

    #[test]
    fn test_each_setter_is_isolated() {
        let mut header = fully_set();
        header.set_version(0);
        assert_fully_set_except(&header, "version");

        let mut header = fully_set();
        header.set_message_type(MessageType::Request);
        assert_fully_set_except(&header, "message_type");

        let mut header = fully_set();
        header.set_compress_type(CompressType::Gzip);
        assert_eq!(header.compress_type(), CompressType::Gzip);
        assert_fully_set_except(&header, "compress_type");

        let mut header = fully_set();
        header.set_message_status(MessageStatus::Normal);
        assert_fully_set_except(&header, "message_status");

        let mut header = fully_set();
        header.set_serialize_type(SerializeType::Json);
        assert_eq!(header.serialize_type(), SerializeType::Json);
        assert_fully_set_except(&header, "serialize_type");

        let mut header = fully_set();
        header.set_seq(1);
        assert_fully_set_except(&header, "seq");
    }

    #[test]
    fn test_serialize_low_nibble_ignored_and_preserved() {
        let mut bytes = Header::new().into_bytes();
        bytes[3] = 0x1F;
        let mut header = Header::from_bytes(bytes);
        assert_eq!(header.serialize_type(), SerializeType::Json);

        header.set_serialize_type(SerializeType::None);
        assert_eq!(header.as_bytes()[3], 0x0F);
    }

    #[test]
    fn test_enum_bits_roundtrip() {
        for bits in 0..8u8 {
            assert_eq!(CompressType::from_bits(bits).bits(), bits);
        }
        for bits in 0..4u8 {
            assert_eq!(MessageStatus::from_bits(bits).bits(), bits);
        }
        for bits in 0..16u8 {
            assert_eq!(SerializeType::from_bits(bits).bits(), bits);
        }
        assert_eq!(MessageType::from_bits(1), MessageType::Response);
        assert_eq!(MessageType::from_bits(0), MessageType::Request);
    }

    #[test]
    fn test_debug_lists_fields() {
        let debug = format!("{:?}", Header::new().with_seq(42));
        assert!(debug.contains("seq: 42"));
        assert!(debug.contains("0x08"));
    }

    proptest! {
        #[test]
        fn prop_fields_read_back(
            version in any::<u8>(),
            response in any::<bool>(),
            heartbeat in any::<bool>(),
            one_way in any::<bool>(),
            compress in 0u8..8,
            status in 0u8..4,
            serialize in 0u8..16,
            seq in any::<u64>(),
        ) {
            let message_type = if response { MessageType::Response } else { MessageType::Request };
            let header = Header::new()
                .with_seq(seq)
                .with_serialize_type(SerializeType::from_bits(serialize))
                .with_message_status(MessageStatus::from_bits(status))
                .with_compress_type(CompressType::from_bits(compress))
                .with_one_way(one_way)
                .with_heartbeat(heartbeat)
                .with_message_type(message_type)
                .with_version(version);

            prop_assert!(header.check_magic_number());
            prop_assert_eq!(header.version(), version);
            prop_assert_eq!(header.message_type(), message_type);
            prop_assert_eq!(header.is_heartbeat(), heartbeat);
            prop_assert_eq!(header.is_one_way(), one_way);
            prop_assert_eq!(header.compress_type().bits(), compress);
            prop_assert_eq!(header.message_status().bits(), status);
            prop_assert_eq!(header.serialize_type().bits(), serialize);
            prop_assert_eq!(header.seq(), seq);
            prop_assert_eq!(header.as_bytes()[3] & 0x0F, 0);
        }

        #[test]
        fn prop_setters_on_arbitrary_bytes(
            bytes in any::<[u8; HEADER_LEN]>(),
            compress in 0u8..8,
            status in 0u8..4,
        ) {
            let original = Header::from_bytes(bytes);
            let mut header = original;
            header.set_compress_type(CompressType::from_bits(compress));
            header.set_message_status(MessageStatus::from_bits(status));

            prop_assert_eq!(header.compress_type().bits(), compress);
            prop_assert_eq!(header.message_status().bits(), status);
            prop_assert_eq!(header.as_bytes()[2] & 0xE0, bytes[2] & 0xE0);
            prop_assert_eq!(&header.as_bytes()[..2], &bytes[..2]);
            prop_assert_eq!(&header.as_bytes()[3..], &bytes[3..]);
        }
    }
}
