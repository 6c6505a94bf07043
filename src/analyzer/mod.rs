pub mod decode;
pub mod fifo;
pub mod ini;
pub mod reader;
pub mod supervisor;

use serde::{Deserialize, Serialize};

/// Sample width the analyzer writes to its raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitFormat {
    #[serde(rename = "8bit")]
    Bit8,
    #[serde(rename = "16bit")]
    Bit16,
}

impl BitFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitFormat::Bit8 => 1,
            BitFormat::Bit16 => 2,
        }
    }

    /// Divisor mapping a raw sample onto [0, 1].
    pub fn max_value(self) -> f32 {
        match self {
            BitFormat::Bit8 => 255.0,
            BitFormat::Bit16 => 65535.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BitFormat::Bit8 => "8bit",
            BitFormat::Bit16 => "16bit",
        }
    }
}

/// Per-band amplitudes of one analyzer write, each in [0, 1].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleFrame {
    values: Vec<f32>,
}

impl SampleFrame {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn zeros(bands: usize) -> Self {
        Self {
            values: vec![0.0; bands],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Amplitude of the lowest band, used for silence detection.
    pub fn leading(&self) -> Option<f32> {
        self.values.first().copied()
    }
}

/// Frame geometry shared by the reader and the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub bars: usize,
    pub bit_format: BitFormat,
}

impl StreamFormat {
    pub fn new(bars: usize, bit_format: BitFormat) -> Self {
        Self { bars, bit_format }
    }

    /// Bytes in one frame on the wire.
    pub fn chunk_size(&self) -> usize {
        self.bars * self.bit_format.bytes_per_sample()
    }
}
