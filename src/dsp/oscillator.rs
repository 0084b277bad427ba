//! Waveform generators driven by a time-like phase signal.
//!
//! Oscillators here do not keep a phase accumulator: the phase arrives as
//! a signal (typically `time * freq` built upstream) and each sample is a
//! pure function of its fractional part. Pulse-width gating divides the
//! phase by the width before testing the cutoff, so a width below 1.0
//! squeezes the active part of the cycle and silences the rest.

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Width values at or below zero clamp here before the division.
const MIN_WIDTH: f64 = 1e-6;

/// Fractional part of a phase value, in `[0, 1)`.
///
/// `x - floor(x)` keeps negative phases correct without a modulo.
#[inline]
pub fn phase_frac(x: f64) -> f64 {
    x - x.floor()
}

/// Deterministic waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveShape {
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

impl WaveShape {
    /// Sample the shape at phase fraction `frac` with pulse width `width`.
    #[inline]
    pub fn sample(self, frac: f64, width: f64) -> f64 {
        let w = width.max(MIN_WIDTH);
        match self {
            WaveShape::Sine => {
                if frac / w > 1.0 {
                    0.0
                } else {
                    (TAU * frac).sin()
                }
            }
            WaveShape::Triangle => {
                if frac / w > 1.0 {
                    0.0
                } else {
                    1.0 - 4.0 * (frac - 0.5).abs()
                }
            }
            WaveShape::Sawtooth => {
                let p = frac / w;
                if p > 1.0 { 0.0 } else { 2.0 * p - 1.0 }
            }
            WaveShape::Square => {
                if frac <= w * 0.5 { 1.0 } else { -1.0 }
            }
        }
    }
}

/// Uniform noise in `[0, 1)`, one draw per sample.
#[derive(Debug, Clone)]
pub struct NoiseCore {
    rng: StdRng,
}

impl NoiseCore {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Noise with a caller-supplied RNG, for deterministic tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    #[inline]
    pub fn sample(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }
}

impl Default for NoiseCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Band-limited-ish noise: two random endpoints joined by a smoothstep.
///
/// Endpoints advance every `sampleRate / freq` samples; the span is
/// recomputed whenever the observed sample rate changes.
#[derive(Debug, Clone)]
pub struct SmoothNoiseCore {
    freq: f64,
    rng: StdRng,
    near: f64,
    far: f64,
    pos: usize,
    span: usize,
    span_rate: f64,
}

impl SmoothNoiseCore {
    pub fn new(freq: f64) -> Self {
        Self::with_rng(freq, StdRng::from_entropy())
    }

    pub fn with_rng(freq: f64, mut rng: StdRng) -> Self {
        let near = rng.gen_range(0.0..1.0);
        let far = rng.gen_range(0.0..1.0);
        Self {
            freq: freq.max(0.001),
            rng,
            near,
            far,
            pos: 0,
            span: 1,
            span_rate: 0.0,
        }
    }

    /// Next sample, given the time delta since the previous one.
    pub fn sample(&mut self, dt: f64) -> f64 {
        let rate = if dt > 0.0 { 1.0 / dt } else { self.span_rate };
        if rate != self.span_rate && rate > 0.0 {
            self.span = ((rate / self.freq).max(1.0)) as usize;
            self.span_rate = rate;
        }
        if self.pos >= self.span {
            self.near = self.far;
            self.far = self.rng.gen_range(0.0..1.0);
            self.pos = 0;
        }
        let x = self.pos as f64 / self.span as f64;
        let s = x * x * (3.0 - 2.0 * x);
        self.pos += 1;
        self.near + (self.far - self.near) * s
    }
}
