//! Feedback comb filter, Karplus-Strong style.
//!
//! A fixed circular delay line whose read tap sits `sampleRate / freq`
//! samples behind the write head, with linear interpolation between the
//! two bracketing slots. Output recirculates into the line, so an impulse
//! in produces the classic train of decaying echoes at the tuned period.

use crate::dsp::filter::DEFAULT_DT;

/// Lowest tunable frequency the ring is sized for.
pub const MIN_COMB_FREQ_HZ: f64 = 20.0;
/// A time gap beyond this clears the line: stale resonance must not
/// survive a transport jump.
pub const GAP_RESET_SECONDS: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct CombCore {
    buffer: Box<[f64]>,
    write_pos: usize,
}

impl CombCore {
    /// Ring sized for `MIN_COMB_FREQ_HZ` at the given maximum sample rate.
    pub fn new(max_sample_rate: f64) -> Self {
        let rate = max_sample_rate.max(1_000.0);
        let len = (rate / MIN_COMB_FREQ_HZ).ceil() as usize + 2;
        Self {
            buffer: vec![0.0; len].into_boxed_slice(),
            write_pos: 0,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Filter one sample. `dt` is the spacing to the previous sample.
    pub fn process_sample(&mut self, input: f64, freq: f64, feedback: f64, dt: f64) -> f64 {
        if dt > GAP_RESET_SECONDS {
            self.clear();
        }
        let dt = if dt > 0.0 { dt } else { DEFAULT_DT };
        let rate = 1.0 / dt;

        let max_delay = (self.buffer.len() - 2) as f64;
        let delay = rate / freq;
        let delay = if delay.is_finite() {
            delay.clamp(2.0, max_delay)
        } else {
            max_delay
        };

        let delayed = self.read_interpolated(delay);
        let output = input + feedback.clamp(-1.0, 1.0) * delayed;

        self.buffer[self.write_pos] = output;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();

        output
    }

    /// Read `delay_samples` behind the write head with linear interpolation.
    #[inline]
    fn read_interpolated(&self, delay_samples: f64) -> f64 {
        let len = self.buffer.len();
        let delay_int = delay_samples as usize;
        let frac = delay_samples - delay_int as f64;

        let pos_0 = if self.write_pos >= delay_int {
            self.write_pos - delay_int
        } else {
            len - (delay_int - self.write_pos)
        };
        let pos_1 = if pos_0 == 0 { len - 1 } else { pos_0 - 1 };

        let s0 = self.buffer[pos_0];
        let s1 = self.buffer[pos_1];
        s0 + frac * (s1 - s0)
    }
}
