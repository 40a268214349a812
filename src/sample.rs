const I16_SCALE: f32 = 32767.0;

/// One complex baseband sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    pub i: f32,
    pub q: f32,
}

impl Sample {
    pub fn new(i: f32, q: f32) -> Self {
        Sample { i, q }
    }

    pub fn zero() -> Self {
        Sample { i: 0.0, q: 0.0 }
    }

    pub fn magnitude(&self) -> f32 {
        (self.i * self.i + self.q * self.q).sqrt()
    }

    /// Quantize to the 16-bit wire representation.
    pub fn to_i16_pair(&self) -> (i16, i16) {
        let i = (self.i.clamp(-1.0, 1.0) * I16_SCALE) as i16;
        let q = (self.q.clamp(-1.0, 1.0) * I16_SCALE) as i16;
        (i, q)
    }

    pub fn from_i16_pair(i: i16, q: i16) -> Self {
        Sample {
            i: i as f32 / I16_SCALE,
            q: q as f32 / I16_SCALE,
        }
    }
}
