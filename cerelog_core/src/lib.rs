/*!
# Cerelog Core

Decoding of the Cerelog acquisition board's serial stream: an ADS1299
front-end sampling 8 channels at 24 bits, framed into fixed 37-byte packets.

## Core Types

- [`RawFrame`] - One validated wire packet with sign-extended channel codes
- [`FrameDecoder`] - Resynchronizing stream parser producing [`Sample`]s
- [`SampleConverter`] - Raw code to physical unit conversion
- [`CalibrationConfig`] - Reference voltage, gain and output unit
- [`SampleRateMeter`] - Samples-per-second from device timestamps

## Modules

- [`frame`] - Wire layout, checksum and 24-bit sign extension
- [`decoder`] - Stream resynchronization state machine
- [`calibration`] - Calibration model
- [`rate`] - Sliding-window rate measurement
- [`error`] - Common error types
*/

pub mod calibration;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod rate;

// Re-export commonly used types
pub use calibration::{CalibrationConfig, OutputScale, SampleConverter};
pub use decoder::{DecoderStats, FrameDecoder, Sample, SyncState};
pub use error::{CoreError, Result};
pub use frame::{checksum, sign_extend_24, FrameError, RawFrame};
pub use rate::SampleRateMeter;

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol constants
pub mod protocol {
    /// Start of every packet, big-endian on the wire
    pub const START_MARKER: u16 = 0xABCD;

    /// End of every packet, big-endian on the wire
    pub const END_MARKER: u16 = 0xDCBA;

    /// Number of ADC channels per sample
    pub const NUM_CHANNELS: usize = 8;

    /// Bytes per channel code
    pub const BYTES_PER_CHANNEL: usize = 3;

    /// ADS1299 status word size
    pub const STATUS_BYTES: usize = 3;

    /// Device timestamp size
    pub const TIMESTAMP_BYTES: usize = 4;

    /// ADS1299 data block: status + channel codes (27 bytes)
    pub const ADC_DATA_BYTES: usize = STATUS_BYTES + NUM_CHANNELS * BYTES_PER_CHANNEL;

    /// Value carried in the length field: timestamp + ADC data (31 bytes)
    pub const MESSAGE_LENGTH: usize = TIMESTAMP_BYTES + ADC_DATA_BYTES;

    /// Full packet: markers + length + message + checksum (37 bytes)
    pub const PACKET_TOTAL_SIZE: usize = 2 + 1 + MESSAGE_LENGTH + 1 + 2;

    /// Resolution of one channel code
    pub const CODE_BITS: u8 = 24;

    /// Byte offsets inside a packet
    pub mod offset {
        pub const LENGTH: usize = 2;
        pub const TIMESTAMP: usize = 3;
        pub const STATUS: usize = 7;
        pub const CHANNELS: usize = 10;
        pub const CHECKSUM: usize = 34;
        pub const END_MARKER: usize = 35;
    }
}
