//! Binary envelope codec for screen frames.
//!
//! Wire format:
//! ```text
//! [version:1][kind:1][room_len:2][seq:8][timestamp_us:8][room_code:room_len][payload:N]
//! ```
//! Fixed header size: 20 bytes. All multi-byte integers are big-endian.
//!
//! The payload is an uninterpreted byte blob (an encoded video frame, a JPEG,
//! whatever the host produces).  The relay never looks inside it.
//!
//! Decoding is zero-copy: the returned [`FrameEnvelope::payload`] is a
//! [`Bytes`] slice of the input buffer, so handing the same payload to many
//! viewers never duplicates it.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Current frame envelope version.
pub const FRAME_VERSION: u8 = 0x01;

/// Size of the fixed part of the envelope header in bytes.
pub const FRAME_HEADER_SIZE: usize = 20;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The kind byte in the header is not a recognized value.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// The envelope version in the header is not supported.
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// The room code bytes are not valid UTF-8.
    #[error("room code is not valid UTF-8")]
    InvalidRoomCode,

    /// The room code does not fit in the 16-bit length field.
    #[error("room code too long: {0} bytes")]
    RoomCodeTooLong(usize),
}

/// Direction of a frame envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Host → relay.  The sequence field is ignored by the relay.
    HostFrame = 0x01,
    /// Relay → viewer, stamped with the room's sequence number.
    ViewerFrame = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::HostFrame),
            0x02 => Ok(FrameKind::ViewerFrame),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// A decoded frame envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    pub kind: FrameKind,
    pub room_code: String,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub payload: Bytes,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a frame envelope into a single contiguous buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::RoomCodeTooLong`] if the room code exceeds
/// `u16::MAX` bytes.
///
/// # Examples
///
/// ```rust
/// use deskrelay_core::protocol::codec::{decode_frame, encode_frame, FrameKind};
///
/// let bytes = encode_frame(FrameKind::ViewerFrame, "ABCD", 7, 0, b"jpeg").unwrap();
/// let frame = decode_frame(bytes).unwrap();
/// assert_eq!(frame.room_code, "ABCD");
/// assert_eq!(frame.sequence, 7);
/// assert_eq!(&frame.payload[..], b"jpeg");
/// ```
pub fn encode_frame(
    kind: FrameKind,
    room_code: &str,
    sequence: u64,
    timestamp_us: u64,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    let room_len = u16::try_from(room_code.len())
        .map_err(|_| ProtocolError::RoomCodeTooLong(room_code.len()))?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + room_code.len() + payload.len());

    // Header: version (1) + kind (1) + room_len (2) + seq (8) + timestamp_us (8) = 20 bytes
    buf.put_u8(FRAME_VERSION);
    buf.put_u8(kind as u8);
    buf.put_u16(room_len);
    buf.put_u64(sequence);
    buf.put_u64(timestamp_us);

    buf.put_slice(room_code.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encodes a frame envelope using the current system time as the timestamp.
///
/// # Errors
///
/// See [`encode_frame`].
pub fn encode_frame_now(
    kind: FrameKind,
    room_code: &str,
    sequence: u64,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    encode_frame(kind, room_code, sequence, current_timestamp_us(), payload)
}

/// Decodes one frame envelope occupying the whole of `bytes`.
///
/// WebSocket binary messages are already length-delimited, so everything
/// after the room code is payload.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is truncated, the version or kind
/// is unknown, or the room code is not UTF-8.
pub fn decode_frame(bytes: Bytes) -> Result<FrameEnvelope, ProtocolError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: FRAME_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != FRAME_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let kind = FrameKind::try_from(bytes[1])?;
    let room_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let sequence = read_u64(&bytes, 4);
    let timestamp_us = read_u64(&bytes, 12);

    let room_end = FRAME_HEADER_SIZE + room_len;
    if bytes.len() < room_end {
        return Err(ProtocolError::InsufficientData {
            needed: room_end,
            available: bytes.len(),
        });
    }

    let room_code = std::str::from_utf8(&bytes[FRAME_HEADER_SIZE..room_end])
        .map_err(|_| ProtocolError::InvalidRoomCode)?
        .to_string();

    Ok(FrameEnvelope {
        kind,
        room_code,
        sequence,
        timestamp_us,
        payload: bytes.slice(room_end..),
    })
}

/// Microseconds since the Unix epoch, or 0 if the clock is before 1970.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// Callers guarantee `offset + 8 <= bytes.len()`.
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(raw)
}
