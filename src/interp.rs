//! Interpolation stage multiplying the output rate by a power of two.

use std::f32::consts::PI;

use crate::sample::Sample;

const TAPS_PER_PHASE: usize = 8;

/// Zero-stuffing upsampler with a windowed-sinc low-pass, gain-compensated
/// so the stuffed stream keeps unit DC gain. Factor 1 is a straight copy.
pub struct Interpolator {
    factor: usize,
    taps: Vec<f32>,
    history: Vec<Sample>,
    history_index: usize,
}

impl Interpolator {
    pub fn new(log2_interp: u32) -> Self {
        let factor = 1usize << log2_interp;
        let taps = if factor > 1 {
            design_low_pass(factor)
        } else {
            Vec::new()
        };
        Interpolator {
            factor,
            taps,
            history: vec![Sample::zero(); TAPS_PER_PHASE],
            history_index: 0,
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn reset(&mut self) {
        self.history.fill(Sample::zero());
        self.history_index = 0;
    }

    /// Interpolate `input` into `output`, which is cleared first and ends
    /// up holding `input.len() * factor` samples.
    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) {
        output.clear();

        if self.factor == 1 {
            output.extend_from_slice(input);
            return;
        }

        output.reserve(input.len() * self.factor);

        for &sample in input {
            self.history[self.history_index] = sample;

            for phase in 0..self.factor {
                let mut out_i = 0.0f32;
                let mut out_q = 0.0f32;
                let mut hist = self.history_index;
                for k in 0..TAPS_PER_PHASE {
                    let tap = self.taps[phase + k * self.factor];
                    out_i += tap * self.history[hist].i;
                    out_q += tap * self.history[hist].q;
                    if hist == 0 {
                        hist = TAPS_PER_PHASE - 1;
                    } else {
                        hist -= 1;
                    }
                }
                output.push(Sample::new(out_i, out_q));
            }

            self.history_index += 1;
            if self.history_index >= TAPS_PER_PHASE {
                self.history_index = 0;
            }
        }
    }
}

/// Windowed-sinc prototype with cutoff at the input Nyquist, scaled so the
/// tap sum equals the factor (compensates the zero-stuffing loss).
fn design_low_pass(factor: usize) -> Vec<f32> {
    let len = factor * TAPS_PER_PHASE;
    let center = (len - 1) as f32 / 2.0;
    let mut taps = vec![0.0f32; len];

    for (n, tap) in taps.iter_mut().enumerate() {
        let x = (n as f32 - center) / factor as f32;
        let sinc = if x == 0.0 {
            1.0
        } else {
            (PI * x).sin() / (PI * x)
        };
        let window = 0.54 - 0.46 * (2.0 * PI * n as f32 / (len - 1) as f32).cos();
        *tap = sinc * window;
    }

    let sum: f32 = taps.iter().sum();
    let scale = factor as f32 / sum;
    for tap in taps.iter_mut() {
        *tap *= scale;
    }
    taps
}
