/*!
Samples-per-second measurement from device timestamps.
*/

use std::collections::VecDeque;

/// Default measurement window
pub const DEFAULT_WINDOW_MS: u32 = 1000;

/// Sliding-window sample rate estimate.
///
/// Keeps the timestamps no older than `window_ms` relative to the newest one.
/// The device clock wraps at 2^32 ms, so ages are computed with wrapping
/// arithmetic.
#[derive(Debug, Clone)]
pub struct SampleRateMeter {
    window_ms: u32,
    timestamps: VecDeque<u32>,
}

impl SampleRateMeter {
    pub fn new(window_ms: u32) -> Self {
        Self {
            window_ms: window_ms.max(1),
            timestamps: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Record a sample timestamp and return the updated rate
    pub fn record(&mut self, timestamp_ms: u32) -> f64 {
        if let Some(&newest) = self.timestamps.back() {
            // A large forward jump past half the clock range means the
            // device clock went backwards (board reset).
            if timestamp_ms.wrapping_sub(newest) > u32::MAX / 2 {
                self.timestamps.clear();
            }
        }
        self.timestamps.push_back(timestamp_ms);

        while let Some(&oldest) = self.timestamps.front() {
            if timestamp_ms.wrapping_sub(oldest) > self.window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        self.rate()
    }

    /// Samples per second over the current window
    pub fn rate(&self) -> f64 {
        self.timestamps.len() as f64 * 1000.0 / self.window_ms as f64
    }

    /// Samples currently inside the window
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }
}

impl Default for SampleRateMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_rate() {
        let mut meter = SampleRateMeter::default();
        let mut rate = 0.0;
        // 250 SPS: one sample every 4 ms for two seconds
        for i in 0..500u32 {
            rate = meter.record(i * 4);
        }
        // Window is inclusive at both ends: 1000 / 4 + 1 samples
        assert_eq!(meter.len(), 251);
        assert!((rate - 251.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_boundary() {
        let mut meter = SampleRateMeter::new(100);
        meter.record(0);
        meter.record(100);
        assert_eq!(meter.len(), 2);
        meter.record(101);
        assert_eq!(meter.len(), 2);
    }

    #[test]
    fn test_clock_wrap() {
        let mut meter = SampleRateMeter::new(1000);
        meter.record(u32::MAX - 10);
        meter.record(u32::MAX);
        meter.record(5);
        assert_eq!(meter.len(), 3);
        meter.record(2000);
        assert_eq!(meter.len(), 1);
    }

    #[test]
    fn test_clock_reset_clears_window() {
        let mut meter = SampleRateMeter::new(1000);
        for t in [50_000, 50_004, 50_008] {
            meter.record(t);
        }
        meter.record(3);
        assert_eq!(meter.len(), 1);
        assert_eq!(meter.rate(), 1.0);
    }

    #[test]
    fn test_zero_window_clamped() {
        let meter = SampleRateMeter::new(0);
        assert_eq!(meter.window_ms(), 1);
        assert!(meter.is_empty());
        assert_eq!(meter.rate(), 0.0);
    }
}
