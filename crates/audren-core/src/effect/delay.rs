//! Multi-channel feedback delay
//!
//! Each channel owns a delay line. The feedback path is low-passed and can
//! bleed into the neighbouring channel (`channel_spread`).

use std::sync::Arc;

use super::{channel_pairs, pass_through, ParameterStatus};
use crate::command::MixBufferPool;
use crate::dsp::delay::{calculate_delay_samples, DelayLine};
use crate::protocol::DelayParams;
use crate::types::MAX_CHANNEL_COUNT;

#[derive(Debug, Clone, Default)]
pub struct DelayEffect {
    params: DelayParams,
    /// Shared with clones until one of them runs or retunes it
    lines: Arc<Vec<DelayLine>>,
    lowpass_state: [f32; MAX_CHANNEL_COUNT],
    scratch: Vec<i32>,
}

impl DelayEffect {
    pub fn update(&mut self, params: &DelayParams, renderer_rate: u32) {
        let rate = if params.sample_rate != 0 {
            params.sample_rate
        } else {
            renderer_rate
        };
        let rate_khz = rate as f32 / 1000.0;
        let channels = (params.channel_count as usize).min(MAX_CHANNEL_COUNT);

        let reinitialize = ParameterStatus::from_raw(params.status) == ParameterStatus::Initialized
            || self.lines.len() != channels
            || params.max_delay_ms != self.params.max_delay_ms;
        if reinitialize {
            let max_delay = calculate_delay_samples(rate_khz, params.max_delay_ms as f32);
            self.lines = Arc::new((0..channels).map(|_| DelayLine::new(max_delay)).collect());
            self.lowpass_state = [0.0; MAX_CHANNEL_COUNT];
        }

        let delay = calculate_delay_samples(rate_khz, params.delay_ms as f32);
        if reinitialize || params.delay_ms != self.params.delay_ms || params.sample_rate != self.params.sample_rate {
            for line in Arc::make_mut(&mut self.lines).iter_mut() {
                line.set_delay(delay);
            }
        }
        self.params = *params;
    }

    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool) {
        let pairs = channel_pairs(&self.params.input, &self.params.output, self.lines.len(), base, pool);
        if !enabled || pairs.len() != self.lines.len() {
            pass_through(pool, &pairs);
            return;
        }

        let sample_count = pool.sample_count();
        if sample_count == 0 {
            return;
        }
        let channels = pairs.len();
        // Planar outputs; inputs stay readable while an output aliases one
        self.scratch.resize(channels * sample_count, 0);

        let p = self.params;
        let spread = p.channel_spread.clamp(0.0, 1.0);
        let lowpass = p.lowpass_amount.clamp(0.0, 1.0);
        let mut delayed = [0.0f32; MAX_CHANNEL_COUNT];
        let lines = Arc::make_mut(&mut self.lines);

        for i in 0..sample_count {
            for (channel, line) in lines.iter().enumerate() {
                delayed[channel] = line.read();
            }
            for (channel, &(input, _)) in pairs.iter().enumerate() {
                let x = pool.get(input).map_or(0, |samples| samples[i]) as f32;
                let neighbour = delayed[(channel + 1) % channels];
                let feedback = delayed[channel] * (1.0 - spread) + neighbour * spread;
                let state = &mut self.lowpass_state[channel];
                *state = feedback * (1.0 - lowpass) + *state * lowpass;

                lines[channel].tick(x * p.in_gain + *state * p.feedback_gain);
                self.scratch[channel * sample_count + i] = (x * p.dry_gain + delayed[channel] * p.wet_gain) as i32;
            }
        }

        for (&(_, output), samples) in pairs.iter().zip(self.scratch.chunks_exact(sample_count)) {
            if let Some(buffer) = pool.get_mut(output) {
                buffer.copy_from_slice(samples);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(delay_ms: u32) -> DelayParams {
        let mut params = DelayParams {
            channel_count: 1,
            max_channels: 1,
            max_delay_ms: 10,
            delay_ms,
            sample_rate: 1000,
            in_gain: 1.0,
            wet_gain: 1.0,
            ..Default::default()
        };
        params.output[0] = 1;
        params
    }

    #[test]
    fn test_impulse_is_delayed() {
        let mut pool = MixBufferPool::new(2, 6);
        pool.get_mut(0).unwrap()[0] = 1000;

        let mut effect = DelayEffect::default();
        // 1kHz, 3ms: three samples of delay
        effect.update(&params(3), 48000);
        effect.process(&mut pool, 0, true);
        assert_eq!(pool.get(1).unwrap(), &[0, 0, 0, 1000, 0, 0]);
    }

    #[test]
    fn test_in_place_reuses_scratch() {
        let mut pool = MixBufferPool::new(1, 6);
        pool.get_mut(0).unwrap()[0] = 1000;
        let mut effect = DelayEffect::default();
        let mut p = params(3);
        p.output[0] = 0;
        effect.update(&p, 48000);

        effect.process(&mut pool, 0, true);
        assert_eq!(pool.get(0).unwrap(), &[0, 0, 0, 1000, 0, 0]);
        let scratch = effect.scratch.as_ptr();
        effect.process(&mut pool, 0, true);
        assert_eq!(effect.scratch.as_ptr(), scratch);
    }

    #[test]
    fn test_disabled_passes_through() {
        let mut pool = MixBufferPool::new(2, 2);
        pool.get_mut(0).unwrap().copy_from_slice(&[1, 2]);
        let mut effect = DelayEffect::default();
        effect.update(&params(3), 48000);
        effect.process(&mut pool, 0, false);
        assert_eq!(pool.get(1).unwrap(), &[1, 2]);
    }

    #[test]
    fn test_reinitialize_on_status() {
        let mut effect = DelayEffect::default();
        let mut p = params(3);
        effect.update(&p, 48000);
        assert_eq!(effect.lines[0].max_delay(), 10);

        p.status = 2;
        p.max_delay_ms = 10;
        p.delay_ms = 5;
        effect.update(&p, 48000);
        assert_eq!(effect.lines[0].delay(), 5);
    }
}
