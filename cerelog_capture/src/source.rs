/*!
Byte sources feeding the decoder.

A source hands out whatever bytes are available, in arbitrary chunk sizes.
`Ok(None)` means nothing arrived during this poll; it is not end of stream.
*/

use crate::config::{SerialConfig, SyntheticConfig};
use cerelog_core::protocol::NUM_CHANNELS;
use cerelog_core::{CalibrationConfig, OutputScale, RawFrame, SampleConverter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by byte sources
#[derive(Error, Debug)]
pub enum SourceError {
    /// The stream ended: replay EOF or generator limit reached
    #[error("Byte source closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Supplier of raw stream bytes
pub trait ByteSource {
    /// Next chunk of bytes, `Ok(None)` if none are available right now
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError>;

    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Called once when capture stops, however it stopped
    fn finish(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        (**self).next_chunk()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn finish(&mut self) -> Result<(), SourceError> {
        (**self).finish()
    }
}

/// Serial port connected to the acquisition board
pub struct SerialSource {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    buffer: Vec<u8>,
}

impl SerialSource {
    pub fn open(config: &SerialConfig) -> Result<Self, SourceError> {
        info!("🔌 Opening serial port {} at {} baud", config.port, config.baud_rate);

        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms.max(1)))
            .open()?;

        info!("✅ Serial port open");

        Ok(Self {
            port,
            name: config.port.clone(),
            buffer: vec![0u8; config.read_chunk_size.max(1)],
        })
    }
}

impl ByteSource for SerialSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        match self.port.read(&mut self.buffer) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(self.buffer[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("serial port {}", self.name)
    }
}

/// Replays bytes from any reader, e.g. a raw dump file
pub struct ReaderSource<R> {
    reader: R,
    label: String,
    buffer: Vec<u8>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R, label: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            reader,
            label: label.into(),
            buffer: vec![0u8; chunk_size.max(1)],
        }
    }
}

impl ReaderSource<File> {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(file, path.as_ref().display().to_string(), chunk_size))
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        match self.reader.read(&mut self.buffer) {
            Ok(0) => Err(SourceError::Closed),
            Ok(n) => Ok(Some(self.buffer[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.label)
    }
}

/// Copies every byte read from `inner` into a writer
pub struct TeeSource<S, W> {
    inner: S,
    sink: W,
    written: u64,
}

impl<S: ByteSource, W: Write> TeeSource<S, W> {
    pub fn new(inner: S, sink: W) -> Self {
        Self {
            inner,
            sink,
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl<S: ByteSource, W: Write> ByteSource for TeeSource<S, W> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let chunk = self.inner.next_chunk()?;
        if let Some(bytes) = &chunk {
            self.sink.write_all(bytes)?;
            self.written += bytes.len() as u64;
        }
        Ok(chunk)
    }

    fn describe(&self) -> String {
        format!("{} (dumping raw bytes)", self.inner.describe())
    }

    fn finish(&mut self) -> Result<(), SourceError> {
        let inner = self.inner.finish();
        self.sink.flush()?;
        info!("💾 {} raw bytes dumped", self.bytes_written());
        inner
    }
}

/// Largest chunk handed out by the synthetic source
const MAX_CHUNK: usize = 64;

/// Generates valid frames carrying sine waves, optionally with line noise
pub struct SyntheticSource {
    rng: StdRng,
    converter: SampleConverter,
    amplitude_uv: f64,
    garbage_probability: f64,
    interval: Duration,
    started: Instant,
    paced: bool,
    next_index: u64,
    limit: Option<u64>,
    pending: Vec<u8>,
}

impl SyntheticSource {
    /// Generator paced to the configured sample rate
    pub fn new(config: &SyntheticConfig, calibration: CalibrationConfig) -> Self {
        let rate = config.sample_rate_hz.max(1);
        info!(
            "🧪 Synthetic source: {} Hz, {:.1} uV amplitude, noise probability {:.3}",
            rate, config.amplitude_uv, config.garbage_probability
        );
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            // Waveforms are specified in microvolts whatever the output unit is
            converter: SampleConverter::new(calibration.with_scale(OutputScale::Microvolts)),
            amplitude_uv: config.amplitude_uv,
            garbage_probability: config.garbage_probability.clamp(0.0, 1.0),
            interval: Duration::from_secs(1) / rate,
            started: Instant::now(),
            paced: true,
            next_index: 0,
            limit: None,
            pending: Vec::new(),
        }
    }

    /// Generate as fast as polled instead of in real time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Close the source after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    fn frames_due(&self) -> u64 {
        if !self.paced {
            return if self.pending.is_empty() {
                self.next_index + 1
            } else {
                self.next_index
            };
        }
        let elapsed = self.started.elapsed().as_nanos();
        (elapsed / self.interval.as_nanos().max(1)) as u64 + 1
    }

    fn frame_bytes(&mut self, index: u64) -> Vec<u8> {
        let t = index as f64 * self.interval.as_secs_f64();
        let mut codes = [0i32; NUM_CHANNELS];
        for (channel, code) in codes.iter_mut().enumerate() {
            // Channel n carries a (n + 1) * 2 Hz tone plus a little noise
            let frequency = (channel as f64 + 1.0) * 2.0;
            let noise = self.rng.random_range(-0.02..0.02) * self.amplitude_uv;
            let value = self.amplitude_uv * (2.0 * PI * frequency * t).sin() + noise;
            *code = self.converter.code_for(value);
        }

        // Device clock in ms, wrapping like the firmware's u32 counter
        let timestamp = (index as u128 * self.interval.as_nanos() / 1_000_000) as u32;
        let mut out = Vec::new();
        if self.garbage_probability > 0.0 && self.rng.random_bool(self.garbage_probability) {
            let len = self.rng.random_range(1..=12);
            out.extend((0..len).map(|_| self.rng.random::<u8>()));
        }

        match RawFrame::new(timestamp, [0xC0, 0x00, 0x00], codes) {
            Ok(frame) => out.extend_from_slice(&frame.to_bytes()),
            Err(e) => debug!("Skipping synthetic frame {}: {}", index, e),
        }
        out
    }
}

impl ByteSource for SyntheticSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let mut due = self.frames_due();
        if let Some(limit) = self.limit {
            due = due.min(limit);
        }
        while self.next_index < due {
            let index = self.next_index;
            let bytes = self.frame_bytes(index);
            self.pending.extend(bytes);
            self.next_index += 1;
        }

        if self.pending.is_empty() {
            if self.limit.is_some_and(|limit| self.next_index >= limit) {
                return Err(SourceError::Closed);
            }
            std::thread::sleep(Duration::from_millis(1));
            return Ok(None);
        }

        // Hand out a random-size prefix, the way a USB CDC link splits the
        // stream; frame boundaries are not preserved.
        let take = self.rng.random_range(1..=self.pending.len().min(MAX_CHUNK));
        let rest = self.pending.split_off(take);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    fn describe(&self) -> String {
        "synthetic generator".to_string()
    }
}
