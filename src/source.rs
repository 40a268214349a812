//! Baseband sample producers feeding the sink engine.

use std::f32::consts::PI;

use anyhow::{anyhow, Result};
use hound::{SampleFormat, WavReader};

use crate::sample::Sample;

/// Producer of baseband blocks at the engine's configured sample rate.
///
/// `fill` writes up to `buf.len()` samples and returns how many were
/// produced; 0 means the source is starved (or exhausted) and the engine
/// should try again later.
pub trait SampleSource: Send {
    fn fill(&mut self, buf: &mut [Sample]) -> usize;

    /// Called when the active configuration changes the baseband rate.
    fn set_sample_rate(&mut self, _sample_rate: u32) {}
}

/// Complex exponential test carrier at a fixed offset from center.
pub struct ToneSource {
    frequency_hz: f32,
    amplitude: f32,
    phase: f32,
    step: f32,
}

impl ToneSource {
    pub fn new(frequency_hz: f32, sample_rate: u32, amplitude: f32) -> Self {
        ToneSource {
            frequency_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            step: 2.0 * PI * frequency_hz / sample_rate.max(1) as f32,
        }
    }
}

impl SampleSource for ToneSource {
    fn fill(&mut self, buf: &mut [Sample]) -> usize {
        for sample in buf.iter_mut() {
            sample.i = self.amplitude * self.phase.cos();
            sample.q = self.amplitude * self.phase.sin();
            self.phase += self.step;
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            }
        }
        buf.len()
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.step = 2.0 * PI * self.frequency_hz / sample_rate.max(1) as f32;
    }
}

/// I/Q baseband read from a WAV file: channel 0 is I, channel 1 is Q.
/// Mono files transmit on I only.
pub struct WavBasebandSource {
    samples: Vec<Sample>,
    position: usize,
    looping: bool,
}

impl WavBasebandSource {
    pub fn new(path: &str, looping: bool) -> Result<Self> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        if channels == 0 {
            return Err(anyhow!("invalid channel count"));
        }

        let mut interleaved = Vec::new();
        match spec.sample_format {
            SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    interleaved.push(sample?);
                }
            }
            SampleFormat::Int => {
                let bits = spec.bits_per_sample as i32;
                let max = (1i64 << (bits - 1)) - 1;
                if bits <= 16 {
                    for sample in reader.samples::<i16>() {
                        interleaved.push(sample? as i64 as f32 / max as f32);
                    }
                } else {
                    for sample in reader.samples::<i32>() {
                        interleaved.push(sample? as i64 as f32 / max as f32);
                    }
                }
            }
        }

        let samples = interleaved
            .chunks_exact(channels)
            .map(|frame| Sample {
                i: frame[0],
                q: if channels > 1 { frame[1] } else { 0.0 },
            })
            .collect::<Vec<_>>();

        if samples.is_empty() {
            return Err(anyhow!("empty baseband file"));
        }

        Ok(WavBasebandSource {
            samples,
            position: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleSource for WavBasebandSource {
    fn fill(&mut self, buf: &mut [Sample]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            if self.position >= self.samples.len() {
                if !self.looping {
                    break;
                }
                self.position = 0;
            }
            let take = (buf.len() - written).min(self.samples.len() - self.position);
            buf[written..written + take]
                .copy_from_slice(&self.samples[self.position..self.position + take]);
            self.position += take;
            written += take;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_test_wav(path: &std::path::Path, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for n in 0..frames {
            for ch in 0..channels {
                let value = (n as f32 / frames as f32) * if ch == 0 { 1.0 } else { -1.0 };
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_tone_constant_magnitude() {
        let mut tone = ToneSource::new(1_000.0, 48_000, 0.5);
        let mut block = vec![Sample::zero(); 256];
        assert_eq!(tone.fill(&mut block), 256);
        for sample in &block {
            assert!((sample.magnitude() - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn test_tone_phase_advances() {
        let mut tone = ToneSource::new(12_000.0, 48_000, 1.0);
        let mut block = vec![Sample::zero(); 4];
        tone.fill(&mut block);
        // Quarter-rate tone rotates 90 degrees per sample.
        assert!((block[0].i - 1.0).abs() < 1e-4);
        assert!((block[1].q - 1.0).abs() < 1e-4);
        assert!((block[2].i + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_wav_source_stereo_maps_iq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.wav");
        write_test_wav(&path, 2, 100);

        let mut source = WavBasebandSource::new(path.to_str().unwrap(), false).unwrap();
        assert_eq!(source.len(), 100);
        let mut block = vec![Sample::zero(); 100];
        assert_eq!(source.fill(&mut block), 100);
        assert!((block[50].i - 0.5).abs() < 1e-4);
        assert!((block[50].q + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_wav_source_mono_has_zero_q() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_test_wav(&path, 1, 32);

        let mut source = WavBasebandSource::new(path.to_str().unwrap(), false).unwrap();
        let mut block = vec![Sample::zero(); 32];
        source.fill(&mut block);
        assert!(block.iter().all(|s| s.q == 0.0));
    }

    #[test]
    fn test_wav_source_exhausts_then_starves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_test_wav(&path, 2, 10);

        let mut source = WavBasebandSource::new(path.to_str().unwrap(), false).unwrap();
        let mut block = vec![Sample::zero(); 64];
        assert_eq!(source.fill(&mut block), 10);
        assert_eq!(source.fill(&mut block), 0);
    }

    #[test]
    fn test_wav_source_loops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_test_wav(&path, 2, 10);

        let mut source = WavBasebandSource::new(path.to_str().unwrap(), true).unwrap();
        let mut block = vec![Sample::zero(); 64];
        assert_eq!(source.fill(&mut block), 64);
    }
}
