//! Second-order IIR notch filter
//!
//! Removes a known sinusoidal test tone from one channel of an interleaved
//! buffer. What remains is harmonic distortion and noise, which the
//! clipping check measures.

use crate::error::{Result, VerificationError};
use crate::PcmBuffer;
use std::f64::consts::PI;

/// Pole radius; sets the notch width
pub const POLE_RADIUS: f64 = 0.95;

/// Biquad notch state (Direct-Form I)
#[derive(Debug, Clone)]
pub struct NotchFilter {
    /// Feed-forward coefficients b0, b1, b2
    b: [f64; 3],
    /// Feedback coefficients a0, a1, a2
    a: [f64; 3],
    /// Input history x[n-1], x[n-2]
    x: [f64; 2],
    /// Output history y[n-1], y[n-2]
    y: [f64; 2],
}

impl NotchFilter {
    /// Design a notch at `frequency` Hz for audio at `sample_rate` Hz
    pub fn new(frequency: f64, sample_rate: u32) -> Result<Self> {
        let nyquist = sample_rate as f64 / 2.0;
        if !(frequency > 0.0 && frequency < nyquist) {
            return Err(VerificationError::InvalidInput(format!(
                "notch frequency {} Hz outside (0, {}) Hz",
                frequency, nyquist
            )));
        }

        let omega = 2.0 * PI * frequency / sample_rate as f64;
        let cos_omega = omega.cos();

        Ok(Self {
            b: [1.0, -2.0 * cos_omega, 1.0],
            a: [1.0, -2.0 * POLE_RADIUS * cos_omega, POLE_RADIUS * POLE_RADIUS],
            x: [0.0; 2],
            y: [0.0; 2],
        })
    }

    pub fn coefficients(&self) -> ([f64; 3], [f64; 3]) {
        (self.b, self.a)
    }

    fn reset(&mut self) {
        self.x = [0.0; 2];
        self.y = [0.0; 2];
    }

    fn process(&mut self, sample: f64) -> f64 {
        let out = self.b[0] * sample + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[1] * self.y[0]
            - self.a[2] * self.y[1];

        self.x = [sample, self.x[0]];
        self.y = [out, self.y[0]];

        out
    }

    /// Filter one channel of `buffer` in place
    ///
    /// Visits `buffer[offset]`, `buffer[offset + stride]`, ... in order. History
    /// is cleared first so every call is an independent pass. Results are
    /// truncated toward zero; values outside the i16 range are clamped to
    /// `i16::MIN` / `i16::MAX` rather than wrapped.
    pub fn apply(&mut self, buffer: &mut [i16], offset: usize, stride: usize) {
        self.reset();
        for sample in buffer.iter_mut().skip(offset).step_by(stride.max(1)) {
            let out = self.process(*sample as f64);
            *sample = out as i16;
        }
    }

    /// Filter every channel of an interleaved buffer in place
    pub fn apply_interleaved(&mut self, buffer: &mut [i16], channels: usize) {
        for ch in 0..channels {
            self.apply(buffer, ch, channels);
        }
    }

    /// Filtered copy of a PCM buffer
    pub fn filtered(&mut self, pcm: &PcmBuffer) -> PcmBuffer {
        let mut out = pcm.clone();
        self.apply_interleaved(&mut out.samples, pcm.params.channels);
        out
    }
}
