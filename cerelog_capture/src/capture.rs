/*!
Capture pipeline.

Three threads connected by bounded queues:
1. Reader thread: byte source -> raw chunks (the only place that blocks on I/O)
2. Decoder thread: raw chunks -> `FrameDecoder` -> samples
3. Sink thread: samples -> live output / rate reporting

The decoder is owned by its thread alone; samples travel downstream in the
order they were decoded.
*/

use crate::config::PipelineConfig;
use crate::sink::SampleSink;
use crate::source::{ByteSource, SourceError};
use anyhow::{anyhow, Result};
use cerelog_core::{CalibrationConfig, DecoderStats, FrameDecoder, Sample, SampleConverter};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Summary of a finished capture
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureReport {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub samples_delivered: u64,
    pub decoder: DecoderStats,
    /// Bytes still buffered in the decoder when it was torn down
    pub residual_bytes: usize,
    pub duration: Duration,
}

/// Runs a byte source through the decoder into a sink until the source
/// closes or the running flag is cleared
pub struct CapturePipeline {
    calibration: CalibrationConfig,
    config: PipelineConfig,
    running: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(calibration: CalibrationConfig, config: PipelineConfig) -> Self {
        Self {
            calibration,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the capture to completion
    pub fn run<S, K>(&self, source: S, sink: K) -> Result<CaptureReport>
    where
        S: ByteSource + Send + 'static,
        K: SampleSink + Send + 'static,
    {
        let capacity = self.config.channel_buffer_size.max(1);
        let (byte_tx, byte_rx) = bounded::<Vec<u8>>(capacity);
        let (sample_tx, sample_rx) = bounded::<Sample>(capacity);

        let started = Instant::now();
        info!("🚀 Capturing from {}", source.describe());
        info!(
            "🔧 Calibration: vref {} V, gain {}, output in {}",
            self.calibration.reference_voltage(),
            self.calibration.gain(),
            self.calibration.output_scale()
        );

        let running_reader = Arc::clone(&self.running);
        let reader_handle = thread::spawn(move || {
            let result = Self::reader_thread(source, byte_tx, &running_reader);
            if let Err(e) = &result {
                error!("Reader thread failed: {}", e);
                running_reader.store(false, Ordering::SeqCst);
            }
            result
        });

        let running_decoder = Arc::clone(&self.running);
        let converter = SampleConverter::new(self.calibration);
        let stats_interval = Duration::from_secs(self.config.stats_interval_seconds);
        let decoder_handle = thread::spawn(move || {
            Self::decoder_thread(converter, byte_rx, sample_tx, &running_decoder, stats_interval)
        });

        let running_sink = Arc::clone(&self.running);
        let sink_handle = thread::spawn(move || {
            let result = Self::sink_thread(sink, sample_rx);
            if let Err(e) = &result {
                error!("Sink thread failed: {}", e);
                running_sink.store(false, Ordering::SeqCst);
            }
            result
        });

        let reader_result = reader_handle
            .join()
            .map_err(|_| anyhow!("Reader thread panicked"))?;
        let (decoder_stats, residual_bytes) = decoder_handle
            .join()
            .map_err(|_| anyhow!("Decoder thread panicked"))?;
        let sink_result = sink_handle
            .join()
            .map_err(|_| anyhow!("Sink thread panicked"))?;

        let (chunks_read, bytes_read) = reader_result?;
        let samples_delivered = sink_result?;

        let report = CaptureReport {
            chunks_read,
            bytes_read,
            samples_delivered,
            decoder: decoder_stats,
            residual_bytes,
            duration: started.elapsed(),
        };
        Self::log_report(&report);
        Ok(report)
    }

    /// Reader thread - pulls chunks from the source and forwards them
    fn reader_thread<S: ByteSource>(
        mut source: S,
        byte_tx: Sender<Vec<u8>>,
        running: &AtomicBool,
    ) -> Result<(u64, u64)> {
        let mut chunks = 0u64;
        let mut bytes = 0u64;

        while running.load(Ordering::SeqCst) {
            match source.next_chunk() {
                Ok(Some(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    bytes += chunk.len() as u64;
                    if byte_tx.send(chunk).is_err() {
                        debug!("Decoder stopped, reader exiting");
                        break;
                    }
                }
                Ok(None) => continue,
                Err(SourceError::Closed) => {
                    info!("Source closed after {} bytes", bytes);
                    break;
                }
                Err(e) => {
                    if let Err(finish_err) = source.finish() {
                        warn!("Failed to finish {}: {}", source.describe(), finish_err);
                    }
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = source.finish() {
            warn!("⚠️ Failed to finish {}: {}", source.describe(), e);
            return Err(e.into());
        }

        Ok((chunks, bytes))
    }

    /// Decoder thread - owns the decoder for its whole lifetime
    fn decoder_thread(
        converter: SampleConverter,
        byte_rx: Receiver<Vec<u8>>,
        sample_tx: Sender<Sample>,
        running: &AtomicBool,
        stats_interval: Duration,
    ) -> (DecoderStats, usize) {
        let mut decoder = FrameDecoder::new(converter);
        let mut last_report = Instant::now();

        'recv: while running.load(Ordering::SeqCst) || !byte_rx.is_empty() {
            match byte_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => {
                    for sample in decoder.feed(&chunk) {
                        if sample_tx.send(sample).is_err() {
                            warn!("Sink stopped, dropping remaining samples");
                            break 'recv;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Byte channel disconnected - reader has stopped");
                    break;
                }
            }

            if !stats_interval.is_zero() && last_report.elapsed() >= stats_interval {
                let stats = decoder.stats();
                info!(
                    "🔄 Decoder: {} frames, {} bytes discarded, {} rejected, {} resyncs",
                    stats.frames_decoded,
                    stats.bytes_discarded,
                    stats.rejected_frames(),
                    stats.resyncs
                );
                last_report = Instant::now();
            }
        }

        let stats = decoder.stats();
        let residual = decoder.finish();
        if residual > 0 {
            warn!("⚠️ Incomplete frame at shutdown: {} bytes discarded", residual);
        }
        (stats, residual)
    }

    /// Sink thread - delivers samples in order
    fn sink_thread<K: SampleSink>(mut sink: K, sample_rx: Receiver<Sample>) -> Result<u64> {
        let mut delivered = 0u64;
        for sample in sample_rx.iter() {
            sink.accept(&sample)?;
            delivered += 1;
        }
        sink.finish()?;
        Ok(delivered)
    }

    fn log_report(report: &CaptureReport) {
        let stats = &report.decoder;
        info!("📈 Capture final stats:");
        info!("   Chunks: {}", report.chunks_read);
        info!("   Bytes: {}", report.bytes_read);
        info!("   Frames decoded: {}", stats.frames_decoded);
        info!("   Samples delivered: {}", report.samples_delivered);
        info!("   Bytes discarded: {}", stats.bytes_discarded);
        info!(
            "   Rejected frames: {} (length {}, checksum {}, end marker {})",
            stats.rejected_frames(),
            stats.length_mismatches,
            stats.checksum_mismatches,
            stats.end_marker_mismatches
        );
        info!("   Resyncs: {}", stats.resyncs);
        info!("   Duration: {:.1}s", report.duration.as_secs_f64());
    }
}
