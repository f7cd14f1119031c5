/*!
Consumers of the decoded sample stream.
*/

use anyhow::{Context, Result};
use cerelog_core::{OutputScale, Sample, SampleRateMeter};
use chrono::{Local, SecondsFormat};
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Receives samples in emission order
pub trait SampleSink {
    fn accept(&mut self, sample: &Sample) -> Result<()>;

    /// Called once after the last sample
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        (**self).accept(sample)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

#[derive(Serialize)]
struct JsonSample<'a> {
    timestamp_ms: u32,
    received_at: String,
    status: String,
    unit: &'static str,
    channels: &'a [f64],
}

/// Writes one JSON object per sample, newline separated
pub struct JsonLinesSink<W: Write> {
    writer: W,
    unit: OutputScale,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W, unit: OutputScale) -> Self {
        Self {
            writer,
            unit,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> SampleSink for JsonLinesSink<W> {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        let record = JsonSample {
            timestamp_ms: sample.timestamp_ms,
            received_at: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            status: hex::encode_upper(sample.status),
            unit: self.unit.as_str(),
            channels: &sample.channels,
        };
        serde_json::to_writer(&mut self.writer, &record).context("Failed to encode sample")?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        debug!("{} samples written as JSON", self.written());
        self.writer.flush().context("Failed to flush sample output")
    }
}

/// Logs the sample rate and latest values periodically
pub struct RateLogSink {
    meter: SampleRateMeter,
    unit: OutputScale,
    interval: Duration,
    last_report: Instant,
    total: u64,
}

impl RateLogSink {
    pub fn new(window_ms: u32, interval: Duration, unit: OutputScale) -> Self {
        Self {
            meter: SampleRateMeter::new(window_ms),
            unit,
            interval,
            last_report: Instant::now(),
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn rate(&self) -> f64 {
        self.meter.rate()
    }
}

impl SampleSink for RateLogSink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        self.meter.record(sample.timestamp_ms);
        self.total += 1;

        if !self.interval.is_zero() && self.last_report.elapsed() >= self.interval {
            let values: Vec<String> = sample
                .channels
                .iter()
                .map(|v| format!("{:.2}", v))
                .collect();
            info!(
                "📊 {:.1} SPS, {} samples, t={} ms, [{}] {}",
                self.meter.rate(),
                self.total,
                sample.timestamp_ms,
                values.join(", "),
                self.unit
            );
            self.last_report = Instant::now();
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("📈 {} samples received, last rate {:.1} SPS", self.total(), self.rate());
        Ok(())
    }
}

/// Forwards every sample to several sinks
pub struct FanOutSink {
    sinks: Vec<Box<dyn SampleSink + Send>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn SampleSink + Send>>) -> Self {
        Self { sinks }
    }
}

impl SampleSink for FanOutSink {
    fn accept(&mut self, sample: &Sample) -> Result<()> {
        for sink in &mut self.sinks {
            sink.accept(sample)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.finish()?;
        }
        Ok(())
    }
}
