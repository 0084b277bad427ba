//! Resonant low-pass filter (RBJ Audio-EQ-Cookbook biquad).
//!
//! Cutoff and resonance arrive as per-sample signals, so the coefficients
//! are recomputed for every sample instead of being cached behind a dirty
//! flag. Direct Form I keeps two samples of input and output history.

use std::f64::consts::{PI, TAU};

/// Fallback sample spacing when the time buffer gives no usable delta.
pub const DEFAULT_DT: f64 = 1.0 / 48_000.0;

const MIN_CUTOFF_HZ: f64 = 1.0;
const MIN_Q: f64 = 0.01;
/// Keep the normalized angular cutoff strictly below π.
const MAX_W0: f64 = PI * 0.999;

/// Low-pass biquad state: 2-sample input and output history.
#[derive(Debug, Clone, Default)]
pub struct LowPassCore {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl LowPassCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Filter one sample with the cutoff/resonance in effect right now.
    ///
    /// The cutoff clamps to Nyquist for the current sample spacing and the
    /// angular cutoff clamps away from π, so abnormally large deltas
    /// (transport gaps) cannot destabilize the recurrence.
    pub fn process_sample(&mut self, input: f64, cutoff: f64, resonance: f64, dt: f64) -> f64 {
        let dt = if dt > 0.0 { dt } else { DEFAULT_DT };
        // An idle gap can push Nyquist below the cutoff floor, so clamp
        // with min/max instead of `clamp` and let MAX_W0 keep w0 sane.
        let nyquist = 0.5 / dt;
        let fc = cutoff.min(nyquist).max(MIN_CUTOFF_HZ);
        let w0 = (TAU * fc * dt).min(MAX_W0);
        let q = resonance.max(MIN_Q);

        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let b1 = 1.0 - cos_w0;
        let b0 = b1 * 0.5;
        let b2 = b0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        let output = (b0 * input + b1 * self.x1 + b2 * self.x2
            - a1 * self.y1
            - a2 * self.y2)
            / a0;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}
