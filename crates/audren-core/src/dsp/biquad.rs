//! Fixed-point biquad filter (direct form II transposed)

/// Filter coefficients: numerator `b0..b2`, denominator `a1..a2`, Q15
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiquadCoefficients {
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
}

/// Persistent filter state
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BiquadState {
    pub s0: i64,
    pub s1: i64,
}

impl BiquadState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_zero(&self) -> bool {
        self.s0 == 0 && self.s1 == 0
    }

    /// Filter one sample
    #[inline]
    pub fn process(&mut self, coefficients: &BiquadCoefficients, x: i32) -> i32 {
        let [n0, n1, n2] = coefficients.numerator.map(i64::from);
        let [d0, d1] = coefficients.denominator.map(i64::from);
        let x = x as i64;

        let f = (x * n0 + self.s0 + 0x4000) >> 15;
        let y = f.clamp(i32::MIN as i64, i32::MAX as i64);
        self.s0 = x * n1 + y * d0 + self.s1;
        self.s1 = x * n2 + y * d1;
        y as i32
    }

    /// Filter a block in place
    pub fn process_block(&mut self, coefficients: &BiquadCoefficients, samples: &mut [i32]) {
        for sample in samples.iter_mut() {
            *sample = self.process(coefficients, *sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gentle low-pass: b = [0.25, 0.5, 0.25] * 0.5, a = [0.5, -0.25]
    fn lowpass() -> BiquadCoefficients {
        BiquadCoefficients {
            numerator: [4096, 8192, 4096],
            denominator: [16384, -8192],
        }
    }

    #[test]
    fn test_zero_state_stays_zero() {
        let mut state = BiquadState::default();
        let mut block = [0i32; 64];
        state.process_block(&lowpass(), &mut block);
        assert!(state.is_zero());
        assert!(block.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_zero_input_decays_state() {
        let coefficient_sets = [
            lowpass(),
            BiquadCoefficients {
                numerator: [32767, 0, 0],
                denominator: [0, 0],
            },
            BiquadCoefficients {
                numerator: [1000, -2000, 1000],
                denominator: [-16000, 4000],
            },
        ];
        for coefficients in coefficient_sets {
            let mut state = BiquadState {
                s0: 1 << 30,
                s1: -(1 << 29),
            };
            let mut block = [0i32; 512];
            state.process_block(&coefficients, &mut block);
            assert!(state.is_zero(), "state {:?} did not settle", state);
        }
    }

    #[test]
    fn test_impulse_response_starts_with_b0() {
        let mut state = BiquadState::default();
        let coefficients = lowpass();
        let y0 = state.process(&coefficients, 32767);
        assert_eq!(y0, ((32767i64 * 4096 + 0x4000) >> 15) as i32);
        let y1 = state.process(&coefficients, 0);
        assert!(y1 > y0);
    }

    #[test]
    fn test_reset() {
        let mut state = BiquadState { s0: 5, s1: 6 };
        state.reset();
        assert!(state.is_zero());
    }
}
