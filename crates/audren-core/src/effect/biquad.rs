//! Biquad filter effect: one fixed-point filter per channel

use super::{channel_pairs, pass_through, ParameterStatus};
use crate::command::MixBufferPool;
use crate::dsp::biquad::{BiquadCoefficients, BiquadState};
use crate::protocol::BiquadEffectParams;
use crate::types::MAX_CHANNEL_COUNT;

#[derive(Debug, Clone, Default)]
pub struct BiquadEffect {
    params: BiquadEffectParams,
    states: [BiquadState; MAX_CHANNEL_COUNT],
}

impl BiquadEffect {
    pub fn update(&mut self, params: &BiquadEffectParams) {
        if ParameterStatus::from_raw(params.status) == ParameterStatus::Initialized {
            self.states = [BiquadState::default(); MAX_CHANNEL_COUNT];
        }
        self.params = *params;
    }

    fn coefficients(&self) -> BiquadCoefficients {
        BiquadCoefficients {
            numerator: self.params.numerator,
            denominator: self.params.denominator,
        }
    }

    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool) {
        let count = (self.params.channel_count as usize).min(MAX_CHANNEL_COUNT);
        let pairs = channel_pairs(&self.params.input, &self.params.output, count, base, pool);
        if !enabled {
            pass_through(pool, &pairs);
            return;
        }

        let coefficients = self.coefficients();
        for (channel, &(input, output)) in pairs.iter().enumerate() {
            pool.copy(input, output);
            if let Some(buffer) = pool.get_mut(output) {
                self.states[channel].process_block(&coefficients, buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_filter_copies() {
        let mut pool = MixBufferPool::new(2, 3);
        pool.get_mut(0).unwrap().copy_from_slice(&[10, -20, 30]);
        let mut params = BiquadEffectParams {
            numerator: [0x4000, 0, 0],
            channel_count: 1,
            ..Default::default()
        };
        params.output[0] = 1;

        let mut effect = BiquadEffect::default();
        effect.update(&params);
        effect.process(&mut pool, 0, true);
        // b0 = 0.5 halves the signal
        assert_eq!(pool.get(1).unwrap(), &[5, -10, 15]);
        assert_eq!(pool.get(0).unwrap(), &[10, -20, 30]);
    }

    #[test]
    fn test_disabled_passes_through() {
        let mut pool = MixBufferPool::new(2, 2);
        pool.get_mut(0).unwrap().copy_from_slice(&[3, 4]);
        let mut params = BiquadEffectParams {
            channel_count: 1,
            ..Default::default()
        };
        params.output[0] = 1;

        let mut effect = BiquadEffect::default();
        effect.update(&params);
        effect.process(&mut pool, 0, false);
        assert_eq!(pool.get(1).unwrap(), &[3, 4]);
    }
}
