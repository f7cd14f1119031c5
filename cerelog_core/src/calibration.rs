/*!
Calibration of raw ADC codes into physical units.

The ADS1299 full-scale range is `±VREF / gain`, spread over 2^24 codes, so one
code step is `2 * VREF / gain / 2^24` volts.
*/

use crate::error::{CoreError, Result};
use crate::protocol::{CODE_BITS, NUM_CHANNELS};
use crate::frame::{CODE_MAX, CODE_MIN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of the calibrated values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputScale {
    #[serde(rename = "V")]
    Volts,
    #[serde(rename = "mV")]
    Millivolts,
    #[default]
    #[serde(rename = "uV")]
    Microvolts,
}

impl OutputScale {
    /// Multiplier applied to a value in volts
    pub fn factor(self) -> f64 {
        match self {
            Self::Volts => 1.0,
            Self::Millivolts => 1e3,
            Self::Microvolts => 1e6,
        }
    }

    /// Unit symbol
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volts => "V",
            Self::Millivolts => "mV",
            Self::Microvolts => "uV",
        }
    }
}

impl fmt::Display for OutputScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputScale {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "v" | "volts" => Ok(Self::Volts),
            "mv" | "millivolts" => Ok(Self::Millivolts),
            "uv" | "µv" | "microvolts" => Ok(Self::Microvolts),
            _ => Err(CoreError::unknown_scale(s)),
        }
    }
}

/// Static calibration parameters, validated at construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationFields", into = "CalibrationFields")]
pub struct CalibrationConfig {
    reference_voltage: f64,
    gain: f64,
    code_bits: u8,
    output_scale: OutputScale,
}

impl CalibrationConfig {
    /// Create a calibration for 24-bit codes.
    ///
    /// Reference voltage and gain must be finite and positive.
    pub fn new(reference_voltage: f64, gain: f64, output_scale: OutputScale) -> Result<Self> {
        Self::with_code_bits(reference_voltage, gain, CODE_BITS, output_scale)
    }

    fn with_code_bits(
        reference_voltage: f64,
        gain: f64,
        code_bits: u8,
        output_scale: OutputScale,
    ) -> Result<Self> {
        if !reference_voltage.is_finite() || reference_voltage <= 0.0 {
            return Err(CoreError::invalid_calibration(format!(
                "reference voltage must be positive, got {}",
                reference_voltage
            )));
        }
        if !gain.is_finite() || gain <= 0.0 {
            return Err(CoreError::invalid_calibration(format!(
                "gain must be positive, got {}",
                gain
            )));
        }
        if code_bits != CODE_BITS {
            return Err(CoreError::invalid_calibration(format!(
                "only {}-bit codes are supported, got {}",
                CODE_BITS, code_bits
            )));
        }

        Ok(Self {
            reference_voltage,
            gain,
            code_bits,
            output_scale,
        })
    }

    pub fn reference_voltage(&self) -> f64 {
        self.reference_voltage
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn code_bits(&self) -> u8 {
        self.code_bits
    }

    pub fn output_scale(&self) -> OutputScale {
        self.output_scale
    }

    /// Same calibration reporting in a different unit
    pub fn with_scale(self, output_scale: OutputScale) -> Self {
        Self { output_scale, ..self }
    }
}

impl Default for CalibrationConfig {
    /// ADS1299 internal 4.5 V reference, PGA gain 24, microvolts
    fn default() -> Self {
        Self {
            reference_voltage: 4.5,
            gain: 24.0,
            code_bits: CODE_BITS,
            output_scale: OutputScale::Microvolts,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CalibrationFields {
    reference_voltage: f64,
    gain: f64,
    #[serde(default = "default_code_bits")]
    code_bits: u8,
    #[serde(default)]
    output_scale: OutputScale,
}

fn default_code_bits() -> u8 {
    CODE_BITS
}

impl TryFrom<CalibrationFields> for CalibrationConfig {
    type Error = CoreError;

    fn try_from(fields: CalibrationFields) -> Result<Self> {
        Self::with_code_bits(
            fields.reference_voltage,
            fields.gain,
            fields.code_bits,
            fields.output_scale,
        )
    }
}

impl From<CalibrationConfig> for CalibrationFields {
    fn from(config: CalibrationConfig) -> Self {
        Self {
            reference_voltage: config.reference_voltage,
            gain: config.gain,
            code_bits: config.code_bits,
            output_scale: config.output_scale,
        }
    }
}

/// Pure mapping from sign-extended codes to calibrated values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleConverter {
    calibration: CalibrationConfig,
    volts_per_code: f64,
}

impl SampleConverter {
    pub fn new(calibration: CalibrationConfig) -> Self {
        let full_scale_codes = (1u32 << calibration.code_bits) as f64;
        let volts_per_code = 2.0 * calibration.reference_voltage / calibration.gain / full_scale_codes;
        Self {
            calibration,
            volts_per_code,
        }
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        &self.calibration
    }

    /// Size of one code step in the output unit
    pub fn lsb(&self) -> f64 {
        self.volts_per_code * self.calibration.output_scale.factor()
    }

    /// Convert a single sign-extended code
    pub fn convert_code(&self, code: i32) -> f64 {
        code as f64 * self.volts_per_code * self.calibration.output_scale.factor()
    }

    /// Convert all channel codes of one frame
    pub fn convert(&self, codes: &[i32; NUM_CHANNELS]) -> [f64; NUM_CHANNELS] {
        codes.map(|code| self.convert_code(code))
    }

    /// Nearest code for a value in the output unit, clamped to 24 bits
    pub fn code_for(&self, value: f64) -> i32 {
        let code = (value / self.lsb()).round();
        if code.is_nan() {
            return 0;
        }
        code.clamp(CODE_MIN as f64, CODE_MAX as f64) as i32
    }
}

impl Default for SampleConverter {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl From<CalibrationConfig> for SampleConverter {
    fn from(calibration: CalibrationConfig) -> Self {
        Self::new(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volts(vref: f64, gain: f64) -> SampleConverter {
        SampleConverter::new(CalibrationConfig::new(vref, gain, OutputScale::Volts).unwrap())
    }

    #[test]
    fn test_max_positive_code() {
        let converter = volts(4.5, 24.0);
        let expected = 4.5 * 2.0 / 24.0 / 16_777_216.0 * 8_388_607.0;
        let value = converter.convert_code(8_388_607);
        assert!((value - expected).abs() < 1e-15);

        // Full scale is +/- vref / gain; the top code sits one LSB below it
        let full_scale = 2.0 * 4.5 / 24.0 / 2.0;
        assert!(value < full_scale);
        assert!(full_scale - value <= converter.lsb() + 1e-15);
    }

    #[test]
    fn test_zero_code_is_exactly_zero() {
        for scale in [OutputScale::Volts, OutputScale::Millivolts, OutputScale::Microvolts] {
            let converter = SampleConverter::new(CalibrationConfig::default().with_scale(scale));
            assert_eq!(converter.convert_code(0), 0.0);
        }
    }

    #[test]
    fn test_output_scales() {
        let calibration = CalibrationConfig::new(4.5, 24.0, OutputScale::Volts).unwrap();
        let v = SampleConverter::new(calibration).convert_code(-1000);
        let mv = SampleConverter::new(calibration.with_scale(OutputScale::Millivolts)).convert_code(-1000);
        let uv = SampleConverter::new(calibration.with_scale(OutputScale::Microvolts)).convert_code(-1000);

        assert!(v < 0.0);
        assert!((mv - v * 1e3).abs() < 1e-12);
        assert!((uv - v * 1e6).abs() < 1e-9);
    }

    #[test]
    fn test_convert_all_channels() {
        let converter = SampleConverter::default();
        let values = converter.convert(&[0, 1, -1, 2, -2, 0, 0, 0]);
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], converter.lsb());
        assert_eq!(values[2], -converter.lsb());
        assert!((values[3] - 2.0 * converter.lsb()).abs() < 1e-12);
    }

    #[test]
    fn test_code_for_inverts_convert() {
        let converter = SampleConverter::default();
        for code in [0, 1, -1, 4096, -123_456, 8_388_607, -8_388_608] {
            assert_eq!(converter.code_for(converter.convert_code(code)), code);
        }
        assert_eq!(converter.code_for(1e12), CODE_MAX);
        assert_eq!(converter.code_for(-1e12), CODE_MIN);
        assert_eq!(converter.code_for(f64::NAN), 0);
    }

    #[test]
    fn test_invalid_calibration() {
        assert!(CalibrationConfig::new(0.0, 24.0, OutputScale::Volts).is_err());
        assert!(CalibrationConfig::new(4.5, -1.0, OutputScale::Volts).is_err());
        assert!(CalibrationConfig::new(f64::NAN, 24.0, OutputScale::Volts).is_err());
        assert!(CalibrationConfig::new(4.5, f64::INFINITY, OutputScale::Volts).is_err());
        assert!(CalibrationConfig::with_code_bits(4.5, 24.0, 16, OutputScale::Volts).is_err());
    }

    #[test]
    fn test_scale_parsing() {
        assert_eq!("V".parse::<OutputScale>().unwrap(), OutputScale::Volts);
        assert_eq!("mv".parse::<OutputScale>().unwrap(), OutputScale::Millivolts);
        assert_eq!("uV".parse::<OutputScale>().unwrap(), OutputScale::Microvolts);
        assert_eq!("µV".parse::<OutputScale>().unwrap(), OutputScale::Microvolts);
        assert!("kV".parse::<OutputScale>().is_err());
        assert_eq!(OutputScale::Millivolts.to_string(), "mV");
    }
}
