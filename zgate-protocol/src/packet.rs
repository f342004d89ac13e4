//! Packet Classification and Control Packet Wire Format
//!
//! Key-negotiation control packets share the media socket with RTP traffic.
//! A control packet has a 12-byte RTP-shaped header whose timestamp slot
//! carries a fixed magic cookie, followed by the negotiation message and a
//! 4-byte CRC-32C trailer:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0 0 1 0 0 0 0 0 0 0 0 0 0 0 0|        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Magic Cookie 'ZRTP' (0x5a525450)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Source Identifier                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Negotiation Message (starts with 0x505a)            |
//! |                             . . .                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          CRC (1 word)                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Anything else is media and is only ever inspected through [`MediaHeader`].

use crate::sequence::ControlSeq;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISCSI};
use std::fmt;
use thiserror::Error;

/// Size of the control packet header in bytes
pub const HEADER_SIZE: usize = 12;

/// Size of the CRC trailer in bytes
pub const CRC_SIZE: usize = 4;

/// Magic cookie stored at bytes 4..8 of every control packet ("ZRTP")
pub const MAGIC_COOKIE: u32 = 0x5A52_5450;

/// Preamble every negotiation message starts with
pub const MESSAGE_PREAMBLE: u16 = 0x505A;

/// Size of the fixed RTP header (without CSRC list and extension)
pub const RTP_HEADER_SIZE: usize = 12;

/// First header byte of a control packet: version 0, extension bit set
const CONTROL_FIRST_BYTE: u8 = 0x10;

/// Offset of the magic cookie inside the header
const MAGIC_OFFSET: usize = 4;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Wire-level packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Key-negotiation control packet
    Control,
    /// RTP media packet (possibly encrypted)
    Media,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Control => write!(f, "Control"),
            PacketKind::Media => write!(f, "Media"),
        }
    }
}

/// Classify a raw packet.
///
/// A packet is a control packet iff it is at least [`HEADER_SIZE`] bytes long
/// and carries [`MAGIC_COOKIE`] at offset 4. The packet is never modified.
#[inline]
pub fn classify(packet: &[u8]) -> PacketKind {
    if packet.len() < HEADER_SIZE {
        return PacketKind::Media;
    }

    let mut cookie = &packet[MAGIC_OFFSET..MAGIC_OFFSET + 4];
    if cookie.get_u32() == MAGIC_COOKIE {
        PacketKind::Control
    } else {
        PacketKind::Media
    }
}

/// Shorthand for `classify(packet) == PacketKind::Control`
#[inline]
pub fn is_control(packet: &[u8]) -> bool {
    classify(packet) == PacketKind::Control
}

/// Compute the on-wire checksum value over `bytes`.
///
/// CRC-32C (Castagnoli) as used by SCTP; the result is stored on the wire
/// least-significant byte first.
pub fn checksum(bytes: &[u8]) -> u32 {
    CASTAGNOLI.checksum(bytes)
}

/// Verify the CRC trailer of a packet already classified as control.
pub fn verify_checksum(packet: &[u8]) -> Result<(), PacketError> {
    if packet.len() < HEADER_SIZE + CRC_SIZE {
        return Err(PacketError::InsufficientData {
            expected: HEADER_SIZE + CRC_SIZE,
            actual: packet.len(),
        });
    }

    let (covered, mut trailer) = packet.split_at(packet.len() - CRC_SIZE);
    let carried = trailer.get_u32_le();
    let computed = checksum(covered);

    if carried != computed {
        return Err(PacketError::ChecksumMismatch { carried, computed });
    }
    Ok(())
}

/// Control packet header (96 bits = 12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// Control packet sequence number
    pub seq: ControlSeq,
    /// Sender's stream source identifier
    pub ssrc: u32,
}

impl ControlHeader {
    /// Create a new control header
    pub fn new(seq: ControlSeq, ssrc: u32) -> Self {
        ControlHeader { seq, ssrc }
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let _flags = buf.get_u16();
        let seq = ControlSeq::new(buf.get_u16());
        let cookie = buf.get_u32();
        if cookie != MAGIC_COOKIE {
            return Err(PacketError::MissingCookie(cookie));
        }
        let ssrc = buf.get_u32();

        Ok(ControlHeader { seq, ssrc })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u8(CONTROL_FIRST_BYTE);
        buf.put_u8(0);
        buf.put_u16(self.seq.as_raw());
        buf.put_u32(MAGIC_COOKIE);
        buf.put_u32(self.ssrc);
    }
}

/// Control packet: header, negotiation message and CRC trailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Packet header
    pub header: ControlHeader,
    /// Negotiation message, handed verbatim to the negotiation engine
    pub message: Bytes,
}

impl ControlPacket {
    /// Create a new control packet
    pub fn new(seq: ControlSeq, ssrc: u32, message: Bytes) -> Self {
        ControlPacket {
            header: ControlHeader::new(seq, ssrc),
            message,
        }
    }

    /// Total size of the packet on the wire (header + message + CRC)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.message.len() + CRC_SIZE
    }

    /// Check that the message starts with [`MESSAGE_PREAMBLE`]
    pub fn has_message_magic(&self) -> bool {
        self.message.len() >= 2 && self.message[..2] == MESSAGE_PREAMBLE.to_be_bytes()
    }

    /// Serialize the packet to bytes, appending the CRC trailer
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.message);
        let crc = checksum(&buf);
        buf.put_u32_le(crc);
        buf
    }

    /// Parse a control packet, verifying the cookie and the CRC trailer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = ControlHeader::from_bytes(bytes)?;
        verify_checksum(bytes)?;

        let message = Bytes::copy_from_slice(&bytes[HEADER_SIZE..bytes.len() - CRC_SIZE]);
        Ok(ControlPacket { header, message })
    }
}

/// Read-only view of a fixed RTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    /// Padding flag
    pub padding: bool,
    /// Header extension flag
    pub extension: bool,
    /// Number of CSRC identifiers
    pub csrc_count: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type
    pub payload_type: u8,
    /// RTP sequence number
    pub seq: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Full header length including CSRC list and extension
    pub header_len: usize,
}

impl MediaHeader {
    /// Parse the RTP header of a media packet
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < RTP_HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: RTP_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..RTP_HEADER_SIZE];
        let b0 = buf.get_u8();
        let b1 = buf.get_u8();
        let version = b0 >> 6;
        if version != 2 {
            return Err(PacketError::UnsupportedVersion(version));
        }

        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = b0 & 0x0F;
        let seq = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let mut header_len = RTP_HEADER_SIZE + 4 * csrc_count as usize;
        if extension {
            if bytes.len() < header_len + 4 {
                return Err(PacketError::InsufficientData {
                    expected: header_len + 4,
                    actual: bytes.len(),
                });
            }
            let mut ext = &bytes[header_len + 2..header_len + 4];
            header_len += 4 + 4 * ext.get_u16() as usize;
        }
        if bytes.len() < header_len {
            return Err(PacketError::InsufficientData {
                expected: header_len,
                actual: bytes.len(),
            });
        }

        Ok(MediaHeader {
            padding,
            extension,
            csrc_count,
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7F,
            seq,
            timestamp,
            ssrc,
            header_len,
        })
    }
}

/// Read the SSRC of a media packet without validating the rest of the header
pub fn media_ssrc(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < RTP_HEADER_SIZE {
        return None;
    }
    let mut buf = &bytes[8..RTP_HEADER_SIZE];
    Some(buf.get_u32())
}

/// Packet parsing and validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Missing magic cookie, found {0:#010x}")]
    MissingCookie(u32),

    #[error("Checksum mismatch: carried {carried:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { carried: u32, computed: u32 },

    #[error("Unsupported RTP version: {0}")]
    UnsupportedVersion(u8),
}
