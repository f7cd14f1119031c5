/*!
Marker-based resynchronizing frame decoder.

The decoder buffers arbitrary byte chunks and extracts every complete, valid
packet from them. Alignment is recovered by slipping one byte at a time:

1. Fewer than two bytes buffered: wait.
2. Head is not `0xABCD`: drop one byte and retry.
3. Head is the start marker but fewer than 37 bytes are buffered: wait.
4. Validate length, checksum and end marker of the 37-byte candidate. Any
   failure drops one byte and retries.
5. Otherwise consume the packet and emit a [`Sample`].

Because every decision depends only on the buffered bytes, the emitted
sequence is the same however the input is chunked.
*/

use crate::calibration::SampleConverter;
use crate::frame::{FrameError, RawFrame};
use crate::protocol::{NUM_CHANNELS, PACKET_TOTAL_SIZE, START_MARKER, STATUS_BYTES};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// One calibrated sample across all channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device clock in milliseconds, wraps at 2^32
    pub timestamp_ms: u32,
    /// ADS1299 status word, uninterpreted
    pub status: [u8; STATUS_BYTES],
    /// Calibrated channel values in the configured unit
    pub channels: [f64; NUM_CHANNELS],
}

impl Sample {
    pub fn from_frame(frame: &RawFrame, converter: &SampleConverter) -> Self {
        Self {
            timestamp_ms: frame.timestamp,
            status: frame.status,
            channels: converter.convert(&frame.channel_codes),
        }
    }
}

/// Observable decoder state between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Scanning for the start marker
    SeekingStart,
    /// Start marker at the head of the residue, waiting for the rest of the packet
    AwaitingFullFrame,
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    pub bytes_received: u64,
    pub frames_decoded: u64,
    pub bytes_discarded: u64,
    pub length_mismatches: u64,
    pub checksum_mismatches: u64,
    pub end_marker_mismatches: u64,
    /// Times alignment was regained after discarding bytes
    pub resyncs: u64,
}

impl DecoderStats {
    /// Candidates that carried a start marker but failed validation
    pub fn rejected_frames(&self) -> u64 {
        self.length_mismatches + self.checksum_mismatches + self.end_marker_mismatches
    }
}

/// Streaming packet decoder
pub struct FrameDecoder {
    converter: SampleConverter,
    residue: BytesMut,
    state: SyncState,
    stats: DecoderStats,
    /// Bytes dropped since the last emitted frame
    slip: u64,
    locked: bool,
}

impl FrameDecoder {
    /// Create a decoder converting with `converter`
    pub fn new(converter: SampleConverter) -> Self {
        Self {
            converter,
            residue: BytesMut::with_capacity(PACKET_TOTAL_SIZE * 4),
            state: SyncState::SeekingStart,
            stats: DecoderStats::default(),
            slip: 0,
            locked: false,
        }
    }

    pub fn converter(&self) -> &SampleConverter {
        &self.converter
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes buffered but not yet resolved into a frame
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }

    /// Feed a chunk and collect every sample it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Sample> {
        self.push(chunk);
        self.samples().collect()
    }

    /// Feed a chunk and hand each completed sample to `emit`, in order
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut emit: F)
    where
        F: FnMut(Sample),
    {
        self.push(chunk);
        while let Some(sample) = self.next_sample() {
            emit(sample);
        }
    }

    /// Append bytes without extracting anything
    pub fn push(&mut self, chunk: &[u8]) {
        self.stats.bytes_received += chunk.len() as u64;
        self.residue.extend_from_slice(chunk);
    }

    /// Lazily extract calibrated samples from the buffered bytes
    pub fn samples(&mut self) -> Samples<'_> {
        Samples { decoder: self }
    }

    /// Lazily extract raw frames from the buffered bytes
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Extract the next calibrated sample, if one is complete
    pub fn next_sample(&mut self) -> Option<Sample> {
        self.next_frame()
            .map(|frame| Sample::from_frame(&frame, &self.converter))
    }

    /// Extract the next valid frame, discarding garbage in front of it.
    ///
    /// Returns `None` once no further frame can be completed from the
    /// buffered bytes.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        while self.residue.len() >= 2 {
            let marker = u16::from_be_bytes([self.residue[0], self.residue[1]]);
            if marker != START_MARKER {
                self.discard_one(None);
                continue;
            }

            if self.residue.len() < PACKET_TOTAL_SIZE {
                self.state = SyncState::AwaitingFullFrame;
                return None;
            }

            match RawFrame::from_bytes(&self.residue[..PACKET_TOTAL_SIZE]) {
                Ok(frame) => {
                    self.residue.advance(PACKET_TOTAL_SIZE);
                    self.on_frame();
                    self.state = SyncState::SeekingStart;
                    return Some(frame);
                }
                Err(err) => {
                    trace!(
                        "Rejected candidate {}: {}",
                        hex::encode(&self.residue[..PACKET_TOTAL_SIZE]),
                        err
                    );
                    self.discard_one(Some(err));
                }
            }
        }

        self.state = SyncState::SeekingStart;
        None
    }

    /// Drop buffered bytes, keeping counters
    pub fn reset(&mut self) {
        if !self.residue.is_empty() {
            debug!("Decoder reset, dropping {} buffered bytes", self.residue.len());
        }
        self.residue.clear();
        self.state = SyncState::SeekingStart;
        self.slip = 0;
        self.locked = false;
    }

    /// Tear down the decoder, returning how many buffered bytes were never
    /// resolved into a frame. No partial sample is produced from them.
    pub fn finish(mut self) -> usize {
        let residual = self.residue.len();
        if residual > 0 {
            debug!("Discarding {} trailing bytes at shutdown", residual);
        }
        self.residue.clear();
        residual
    }

    fn discard_one(&mut self, reason: Option<FrameError>) {
        match reason {
            Some(FrameError::LengthField { .. }) => self.stats.length_mismatches += 1,
            Some(FrameError::Checksum { .. }) => self.stats.checksum_mismatches += 1,
            Some(FrameError::EndMarker(_)) => self.stats.end_marker_mismatches += 1,
            _ => {}
        }

        if self.locked {
            warn!(
                "Lost frame sync after {} frames ({})",
                self.stats.frames_decoded,
                reason.map_or_else(|| "missing start marker".to_string(), |e| e.to_string())
            );
            self.locked = false;
        }

        self.residue.advance(1);
        self.stats.bytes_discarded += 1;
        self.slip += 1;
    }

    fn on_frame(&mut self) {
        self.stats.frames_decoded += 1;
        if self.slip > 0 {
            self.stats.resyncs += 1;
            info!("Frame sync acquired after discarding {} bytes", self.slip);
        } else if !self.locked {
            debug!("Frame sync acquired");
        }
        self.slip = 0;
        self.locked = true;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(SampleConverter::default())
    }
}

/// Pull iterator over calibrated samples, see [`FrameDecoder::samples`]
pub struct Samples<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Samples<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.decoder.next_sample()
    }
}

/// Pull iterator over raw frames, see [`FrameDecoder::frames`]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        self.decoder.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationConfig, OutputScale};

    fn frame_bytes(timestamp: u32, codes: [i32; NUM_CHANNELS]) -> Vec<u8> {
        RawFrame::new(timestamp, [0xC0, 0x00, 0x00], codes)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    fn volts_decoder() -> FrameDecoder {
        let calibration = CalibrationConfig::new(4.5, 24.0, OutputScale::Volts).unwrap();
        FrameDecoder::new(SampleConverter::new(calibration))
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut stream = vec![0x00, 0x11, 0x22];
        stream.extend(frame_bytes(1000, [0; 8]));
        stream.extend(frame_bytes(1001, [1, 0, 0, 0, 0, 0, 0, 0]));

        let mut decoder = volts_decoder();
        let samples = decoder.feed(&stream);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp_ms, 1000);
        assert_eq!(samples[0].channels, [0.0; 8]);
        assert_eq!(samples[1].timestamp_ms, 1001);
        assert_eq!(samples[1].channels[0], decoder.converter().convert_code(1));
        assert_eq!(&samples[1].channels[1..], &[0.0; 7]);

        let stats = decoder.stats();
        assert_eq!(stats.bytes_discarded, 3);
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.resyncs, 1);
        assert_eq!(decoder.residue_len(), 0);
    }

    #[test]
    fn test_byte_at_a_time_matches_single_feed() {
        let bytes = frame_bytes(42, [5, -5, 100, -100, 0, 7, -7, 8_388_607]);

        let mut whole = FrameDecoder::default();
        let expected = whole.feed(&bytes);
        assert_eq!(expected.len(), 1);

        let mut trickle = FrameDecoder::default();
        let mut collected = Vec::new();
        for (i, byte) in bytes.iter().enumerate() {
            let out = trickle.feed(std::slice::from_ref(byte));
            if i + 1 < bytes.len() {
                assert!(out.is_empty(), "sample emitted early at byte {}", i);
            }
            collected.extend(out);
        }

        assert_eq!(collected, expected);
        assert_eq!(trickle.stats().bytes_discarded, 0);
    }

    #[test]
    fn test_garbage_prefix_discarded_exactly() {
        let garbage = [0x01, 0x02, 0x03, 0x04, 0x05, 0xAB, 0x00];
        let mut stream = garbage.to_vec();
        stream.extend(frame_bytes(7, [0; 8]));

        let mut decoder = FrameDecoder::default();
        let samples = decoder.feed(&stream);

        assert_eq!(samples.len(), 1);
        assert_eq!(decoder.stats().bytes_discarded, garbage.len() as u64);
    }

    #[test]
    fn test_bad_checksum_slips_one_byte() {
        let mut bad = frame_bytes(1, [3; 8]);
        bad[34] = bad[34].wrapping_add(1);

        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(&bad).is_empty());

        let stats = decoder.stats();
        assert_eq!(stats.checksum_mismatches, 1);
        // Only the leading 0xAB went on the checksum failure; the rest of the
        // candidate was scanned byte by byte for another marker.
        assert_eq!(stats.bytes_discarded as usize, bad.len() - 1);
        assert_eq!(decoder.residue_len(), 1);
    }

    #[test]
    fn test_bad_checksum_then_good_frame() {
        let mut stream = frame_bytes(1, [3; 8]);
        stream[34] ^= 0xFF;
        stream.extend(frame_bytes(2, [4; 8]));

        let mut decoder = FrameDecoder::default();
        let samples = decoder.feed(&stream);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_ms, 2);
        assert_eq!(decoder.stats().bytes_discarded, 37);
    }

    #[test]
    fn test_bad_length_and_end_marker_counted() {
        let mut bad_length = frame_bytes(1, [0; 8]);
        bad_length[2] = 30;
        let mut bad_end = frame_bytes(2, [0; 8]);
        bad_end[36] = 0x00;

        let mut decoder = FrameDecoder::default();
        decoder.feed(&bad_length);
        decoder.reset();
        decoder.feed(&bad_end);

        let stats = decoder.stats();
        assert_eq!(stats.length_mismatches, 1);
        assert_eq!(stats.end_marker_mismatches, 1);
        assert_eq!(stats.rejected_frames(), 2);
        assert_eq!(stats.frames_decoded, 0);
    }

    #[test]
    fn test_marker_inside_payload_does_not_lose_next_frame() {
        // A payload containing the start marker must not shadow the real
        // packet that follows a corrupted one.
        let mut codes = [0; 8];
        codes[0] = 0xAB_CD00u32 as i32 - (1 << 24);
        let mut stream = frame_bytes(10, codes);
        stream[36] = 0x00; // corrupt end marker
        stream.extend(frame_bytes(11, [0; 8]));

        let mut decoder = FrameDecoder::default();
        let samples = decoder.feed(&stream);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_ms, 11);
    }

    #[test]
    fn test_states() {
        let bytes = frame_bytes(5, [0; 8]);
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.state(), SyncState::SeekingStart);

        decoder.feed(&bytes[..1]);
        assert_eq!(decoder.state(), SyncState::SeekingStart);

        decoder.feed(&bytes[1..20]);
        assert_eq!(decoder.state(), SyncState::AwaitingFullFrame);
        assert_eq!(decoder.residue_len(), 20);

        assert_eq!(decoder.feed(&bytes[20..]).len(), 1);
        assert_eq!(decoder.state(), SyncState::SeekingStart);
    }

    #[test]
    fn test_residue_stays_bounded_without_frames() {
        let mut decoder = FrameDecoder::default();
        for i in 0..10_000u32 {
            decoder.feed(&[(i % 200) as u8, 0x55, 0xAB]);
            assert!(decoder.residue_len() < PACKET_TOTAL_SIZE);
        }
        assert_eq!(decoder.stats().frames_decoded, 0);
    }

    #[test]
    fn test_empty_feed() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(&[]).is_empty());
        assert_eq!(decoder.stats().bytes_received, 0);
    }

    #[test]
    fn test_finish_reports_truncated_tail() {
        let bytes = frame_bytes(9, [0; 8]);
        let mut decoder = FrameDecoder::default();
        let mut emitted = Vec::new();
        decoder.feed_with(&bytes[..30], |s| emitted.push(s));
        assert!(emitted.is_empty());
        assert_eq!(decoder.finish(), 30);
    }

    #[test]
    fn test_raw_frames_iterator() {
        let mut stream = frame_bytes(1, [1; 8]);
        stream.extend(frame_bytes(2, [-2; 8]));

        let mut decoder = FrameDecoder::default();
        decoder.push(&stream);
        let frames: Vec<RawFrame> = decoder.frames().collect();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel_codes, [1; 8]);
        assert_eq!(frames[1].channel_codes, [-2; 8]);
    }

    #[test]
    fn test_status_passed_through() {
        let bytes = RawFrame::new(3, [0xC1, 0x23, 0x45], [0; 8]).unwrap().to_bytes();
        let mut decoder = FrameDecoder::default();
        let samples = decoder.feed(&bytes);
        assert_eq!(samples[0].status, [0xC1, 0x23, 0x45]);
    }
}
