//! Float delay lines for the reverb and delay effects

/// Convert a duration to a delay length in samples
pub fn calculate_delay_samples(sample_rate_khz: f32, time_ms: f32) -> usize {
    let samples = sample_rate_khz * time_ms;
    if samples.is_finite() && samples > 0.0 {
        samples as usize
    } else {
        0
    }
}

/// Circular delay with a fixed maximum and an adjustable length
///
/// `tick` stores a sample; `read` returns the one stored `delay` ticks ago.
/// Each line also carries the gain of its all-pass section, used when the
/// line is driven through [`DelayLine::all_pass_tick`].
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    delay: usize,
    /// All-pass feedback coefficient
    pub wet_gain: f32,
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DelayLine {
    /// Create a line able to hold `max_delay` samples (at least one)
    pub fn new(max_delay: usize) -> Self {
        let len = max_delay.max(1);
        Self {
            buffer: vec![0.0; len],
            write_pos: 0,
            delay: len,
            wet_gain: 0.0,
        }
    }

    pub fn max_delay(&self) -> usize {
        self.buffer.len()
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Set the active length, clamped to `[1, max_delay]`
    pub fn set_delay(&mut self, samples: usize) {
        if samples > self.buffer.len() {
            log::debug!(
                "Delay of {} samples exceeds line length {}, clamping",
                samples,
                self.buffer.len()
            );
        }
        self.delay = samples.clamp(1, self.buffer.len());
    }

    /// Sample stored `delay` ticks ago
    #[inline]
    pub fn read(&self) -> f32 {
        self.tap_out(self.delay)
    }

    /// Sample stored `steps` ticks ago (clamped to the line length)
    #[inline]
    pub fn tap_out(&self, steps: usize) -> f32 {
        let len = self.buffer.len();
        let steps = steps.clamp(1, len);
        self.buffer[(self.write_pos + len - steps) % len]
    }

    /// Store a sample and advance
    #[inline]
    pub fn tick(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Schroeder all-pass step using `wet_gain` as the coefficient
    #[inline]
    pub fn all_pass_tick(&mut self, input: f32) -> f32 {
        let delayed = self.read();
        let stored = input - self.wet_gain * delayed;
        self.tick(stored);
        delayed + self.wet_gain * stored
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
