/*!
Wire packet parsing and construction.

A packet is 37 bytes, all multi-byte fields big-endian:

| Offset | Field        | Size |
|--------|--------------|------|
| 0      | Start marker | 2    |
| 2      | Length (31)  | 1    |
| 3      | Timestamp    | 4    |
| 7      | Status       | 3    |
| 10     | Channel data | 24   |
| 34     | Checksum     | 1    |
| 35     | End marker   | 2    |
*/

use crate::protocol::{
    offset, BYTES_PER_CHANNEL, END_MARKER, MESSAGE_LENGTH, NUM_CHANNELS, PACKET_TOTAL_SIZE,
    START_MARKER, STATUS_BYTES,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest value a 24-bit two's-complement code can hold
pub const CODE_MIN: i32 = -(1 << 23);

/// Largest value a 24-bit two's-complement code can hold
pub const CODE_MAX: i32 = (1 << 23) - 1;

/// Reasons a packet candidate is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid packet size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },

    #[error("Invalid start marker: {0:#06X}")]
    StartMarker(u16),

    #[error("Invalid length field: expected {expected}, got {actual}")]
    LengthField { expected: u8, actual: u8 },

    #[error("Checksum mismatch: packet carries {received:#04X}, computed {computed:#04X}")]
    Checksum { received: u8, computed: u8 },

    #[error("Invalid end marker: {0:#06X}")]
    EndMarker(u16),

    #[error("Channel {channel} code {code} does not fit in 24 bits")]
    CodeOutOfRange { channel: usize, code: i32 },
}

/// Interpret the low 24 bits of `code` as a two's-complement integer.
///
/// Bits above 23 are ignored.
pub fn sign_extend_24(code: u32) -> i32 {
    let code = (code & 0x00FF_FFFF) as i32;
    if code >= 1 << 23 {
        code - (1 << 24)
    } else {
        code
    }
}

/// Sum of `bytes` modulo 256.
///
/// The packet checksum covers the length byte through the last channel byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// One validated packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub start_marker: u16,
    pub length: u8,
    pub timestamp: u32,
    pub status: [u8; STATUS_BYTES],
    pub channel_codes: [i32; NUM_CHANNELS],
    pub checksum: u8,
    pub end_marker: u16,
}

impl RawFrame {
    /// Build a valid frame, filling in markers, length and checksum
    pub fn new(
        timestamp: u32,
        status: [u8; STATUS_BYTES],
        channel_codes: [i32; NUM_CHANNELS],
    ) -> Result<Self, FrameError> {
        for (channel, &code) in channel_codes.iter().enumerate() {
            if !(CODE_MIN..=CODE_MAX).contains(&code) {
                return Err(FrameError::CodeOutOfRange { channel, code });
            }
        }

        let mut frame = RawFrame {
            start_marker: START_MARKER,
            length: MESSAGE_LENGTH as u8,
            timestamp,
            status,
            channel_codes,
            checksum: 0,
            end_marker: END_MARKER,
        };
        let bytes = frame.to_bytes();
        frame.checksum = checksum(&bytes[offset::LENGTH..offset::CHECKSUM]);
        Ok(frame)
    }

    /// Parse and validate exactly one packet.
    ///
    /// Checks run in wire order: start marker, length field, checksum, end
    /// marker. The first failing check is reported.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != PACKET_TOTAL_SIZE {
            return Err(FrameError::InvalidSize {
                expected: PACKET_TOTAL_SIZE,
                actual: bytes.len(),
            });
        }

        let start_marker = u16::from_be_bytes([bytes[0], bytes[1]]);
        if start_marker != START_MARKER {
            return Err(FrameError::StartMarker(start_marker));
        }

        let length = bytes[offset::LENGTH];
        if length as usize != MESSAGE_LENGTH {
            return Err(FrameError::LengthField {
                expected: MESSAGE_LENGTH as u8,
                actual: length,
            });
        }

        let received = bytes[offset::CHECKSUM];
        let computed = checksum(&bytes[offset::LENGTH..offset::CHECKSUM]);
        if received != computed {
            return Err(FrameError::Checksum { received, computed });
        }

        let end_marker = u16::from_be_bytes([bytes[offset::END_MARKER], bytes[offset::END_MARKER + 1]]);
        if end_marker != END_MARKER {
            return Err(FrameError::EndMarker(end_marker));
        }

        let timestamp = u32::from_be_bytes([
            bytes[offset::TIMESTAMP],
            bytes[offset::TIMESTAMP + 1],
            bytes[offset::TIMESTAMP + 2],
            bytes[offset::TIMESTAMP + 3],
        ]);

        let mut status = [0u8; STATUS_BYTES];
        status.copy_from_slice(&bytes[offset::STATUS..offset::STATUS + STATUS_BYTES]);

        let mut channel_codes = [0i32; NUM_CHANNELS];
        let channel_bytes = &bytes[offset::CHANNELS..offset::CHECKSUM];
        for (code, chunk) in channel_codes
            .iter_mut()
            .zip(channel_bytes.chunks_exact(BYTES_PER_CHANNEL))
        {
            let raw = u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]);
            *code = sign_extend_24(raw);
        }

        Ok(RawFrame {
            start_marker,
            length,
            timestamp,
            status,
            channel_codes,
            checksum: received,
            end_marker,
        })
    }

    /// Serialize to the 37 wire bytes
    pub fn to_bytes(&self) -> [u8; PACKET_TOTAL_SIZE] {
        let mut bytes = [0u8; PACKET_TOTAL_SIZE];
        bytes[0..2].copy_from_slice(&self.start_marker.to_be_bytes());
        bytes[offset::LENGTH] = self.length;
        bytes[offset::TIMESTAMP..offset::STATUS].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[offset::STATUS..offset::CHANNELS].copy_from_slice(&self.status);

        for (i, &code) in self.channel_codes.iter().enumerate() {
            let start = offset::CHANNELS + i * BYTES_PER_CHANNEL;
            // Low three bytes of the two's-complement representation
            let be = (code as u32).to_be_bytes();
            bytes[start..start + BYTES_PER_CHANNEL].copy_from_slice(&be[1..]);
        }

        bytes[offset::CHECKSUM] = self.checksum;
        bytes[offset::END_MARKER..].copy_from_slice(&self.end_marker.to_be_bytes());
        bytes
    }
}
