/*!
# Cerelog Python Bindings

Streaming frame decoder for the Python plotting scripts. Bytes read from the
serial port are fed in as they arrive; every call returns the samples that
completed, as numpy arrays.

```python
import cerelog_py

decoder = cerelog_py.Decoder(reference_voltage=4.5, gain=24.0, scale="uV")
timestamps, channels = decoder.feed(port.read(4096))
# timestamps: uint32[n], channels: float64[n, 8]
```
*/

use cerelog_core::protocol::{NUM_CHANNELS, PACKET_TOTAL_SIZE};
use cerelog_core::{CalibrationConfig, CoreError, FrameDecoder, OutputScale, SampleConverter};
use numpy::{PyArray1, PyArray2, PyArrayMethods};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::debug;

fn to_py_err(e: CoreError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Python wrapper around the resynchronizing decoder
#[pyclass(name = "Decoder")]
pub struct PyDecoder {
    decoder: FrameDecoder,
}

#[pymethods]
impl PyDecoder {
    #[new]
    #[pyo3(signature = (reference_voltage = 4.5, gain = 24.0, scale = "uV"))]
    fn new(reference_voltage: f64, gain: f64, scale: &str) -> PyResult<Self> {
        let output_scale: OutputScale = scale.parse().map_err(to_py_err)?;
        let calibration =
            CalibrationConfig::new(reference_voltage, gain, output_scale).map_err(to_py_err)?;
        Ok(Self {
            decoder: FrameDecoder::new(SampleConverter::new(calibration)),
        })
    }

    /// Feed raw bytes, returning (timestamps, channels) for completed frames
    fn feed<'py>(
        &mut self,
        py: Python<'py>,
        data: &[u8],
    ) -> PyResult<(Bound<'py, PyArray1<u32>>, Bound<'py, PyArray2<f64>>)> {
        let samples = self.decoder.feed(data);

        let timestamps: Vec<u32> = samples.iter().map(|s| s.timestamp_ms).collect();
        let values: Vec<f64> = samples
            .iter()
            .flat_map(|s| s.channels.iter().copied())
            .collect();

        let timestamps = PyArray1::from_vec_bound(py, timestamps);
        let channels =
            PyArray1::from_vec_bound(py, values).reshape([samples.len(), NUM_CHANNELS])?;
        Ok((timestamps, channels))
    }

    /// Bytes buffered while waiting for the rest of a frame
    #[getter]
    fn residue_len(&self) -> usize {
        self.decoder.residue_len()
    }

    /// Output unit of the channel values
    #[getter]
    fn unit(&self) -> &'static str {
        self.decoder.converter().calibration().output_scale().as_str()
    }

    /// Value of one LSB in the output unit
    #[getter]
    fn lsb(&self) -> f64 {
        self.decoder.converter().lsb()
    }

    /// Decoder counters as a dict
    fn stats<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let stats = self.decoder.stats();
        let dict = PyDict::new_bound(py);
        dict.set_item("bytes_received", stats.bytes_received)?;
        dict.set_item("frames_decoded", stats.frames_decoded)?;
        dict.set_item("bytes_discarded", stats.bytes_discarded)?;
        dict.set_item("length_mismatches", stats.length_mismatches)?;
        dict.set_item("checksum_mismatches", stats.checksum_mismatches)?;
        dict.set_item("end_marker_mismatches", stats.end_marker_mismatches)?;
        dict.set_item("resyncs", stats.resyncs)?;
        Ok(dict)
    }

    /// Drop buffered bytes and start seeking a frame again
    fn reset(&mut self) {
        debug!("Decoder reset from Python, {} bytes dropped", self.decoder.residue_len());
        self.decoder.reset();
    }

    fn __repr__(&self) -> String {
        let calibration = self.decoder.converter().calibration();
        format!(
            "Decoder(reference_voltage={}, gain={}, scale=\"{}\")",
            calibration.reference_voltage(),
            calibration.gain(),
            calibration.output_scale()
        )
    }
}

/// Interpret a 24-bit two's complement code
#[pyfunction]
fn sign_extend_24(code: u32) -> i32 {
    cerelog_core::sign_extend_24(code)
}

/// Python module definition
#[pymodule]
fn cerelog_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyDecoder>()?;
    m.add_function(wrap_pyfunction!(sign_extend_24, m)?)?;
    m.add("PACKET_TOTAL_SIZE", PACKET_TOTAL_SIZE)?;
    m.add("NUM_CHANNELS", NUM_CHANNELS)?;
    m.add("__version__", cerelog_core::VERSION)?;
    m.add("__doc__", "Resynchronizing decoder for Cerelog ADS1299 sample frames")?;
    Ok(())
}
