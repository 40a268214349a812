//! Sink collaborator contract and the WAV export sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;

use crate::sample::Sample;

/// Stream format handed to a sink when it is opened. The sample rate is the
/// effective (post-interpolation) output rate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u64,
    pub center_frequency: u64,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink open failed: {0}")]
    OpenFailed(String),
    #[error("sink write failed: {0}")]
    WriteFailed(String),
    #[error("sink is not open")]
    Closed,
}

/// Consumer of the live sample stream: a file, a network daemon, or a
/// sound-card exciter. Open may be called again with a new format after a
/// reconfiguration; implementations tear down the previous stream first.
pub trait SampleSink: Send {
    fn open(&mut self, format: &SinkFormat) -> Result<(), SinkError>;
    fn write(&mut self, block: &[Sample]) -> Result<(), SinkError>;
    fn close(&mut self);
}

/// Offline export sink: 2-channel float WAV, I on the left channel and Q on
/// the right. Runs unpaced.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        WavFileSink {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }
}

impl SampleSink for WavFileSink {
    fn open(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        self.close();

        let spec = WavSpec {
            channels: 2,
            sample_rate: format.sample_rate as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| SinkError::OpenFailed(e.to_string()))?;
        log::info!(
            "wav sink open: {} at {} Hz",
            self.path.display(),
            format.sample_rate
        );
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, block: &[Sample]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        for sample in block {
            writer
                .write_sample(sample.i)
                .map_err(|e| SinkError::WriteFailed(e.to_string()))?;
            writer
                .write_sample(sample.q)
                .map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                log::warn!("wav sink finalize failed: {}", e);
            }
        }
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        self.close();
    }
}
