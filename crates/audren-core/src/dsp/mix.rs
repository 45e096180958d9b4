//! Mix-buffer arithmetic: volume ramps, accumulation, gain and depop
//!
//! Mix buffers hold signed 32-bit samples so sums of many sources keep their
//! headroom until the final clamp to 16 bits.

/// Q15 fixed-point one
const Q15_ONE: f32 = 32768.0;

/// Depop decay ratio at 48kHz (Q15)
pub const DEPOP_DELTA_48K: i32 = 0x7B29;
/// Depop decay ratio at other rates (Q15)
pub const DEPOP_DELTA_32K: i32 = 0x78CB;

/// Decay ratio for the renderer sample rate
pub fn depop_delta(sample_rate: u32) -> i32 {
    if sample_rate == 48000 {
        DEPOP_DELTA_48K
    } else {
        DEPOP_DELTA_32K
    }
}

#[inline]
fn to_q15(volume: f32) -> i64 {
    (volume * Q15_ONE) as i64
}

/// Ramp in place from `last_volume` to `volume` across the block
///
/// The gain for sample `i` is `last + (current - last) * i / len` in Q15, so
/// the first sample uses the old volume exactly.
pub fn apply_volume_ramp(samples: &mut [i32], last_volume: f32, volume: f32) {
    let len = samples.len() as i64;
    if len == 0 {
        return;
    }
    let last = to_q15(last_volume);
    let span = to_q15(volume) - last;
    for (i, sample) in samples.iter_mut().enumerate() {
        let gain = last + span * i as i64 / len;
        let value = (*sample as i64 * gain + 0x4000) >> 15;
        *sample = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    }
}

/// Scale in place by a constant Q15 gain
pub fn apply_gain(samples: &mut [i32], volume: f32) {
    let gain = to_q15(volume);
    if gain == 1 << 15 {
        return;
    }
    for sample in samples.iter_mut() {
        let value = (*sample as i64 * gain + 0x4000) >> 15;
        *sample = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    }
}

/// Accumulate `input * volume` into `output`
pub fn apply_mix(output: &mut [i32], input: &[i32], volume: f32) {
    for (out, &x) in output.iter_mut().zip(input) {
        *out = out.wrapping_add((x as f32 * volume) as i32);
    }
}

/// Accumulate `input` into `output` with a gain moving linearly from
/// `last_volume` toward `volume`
///
/// Returns the last contribution written, which the caller keeps as the depop
/// seed for this destination.
pub fn apply_mix_ramp(output: &mut [i32], input: &[i32], last_volume: f32, volume: f32) -> i32 {
    let count = output.len().min(input.len());
    if count == 0 {
        return 0;
    }
    let delta = (volume - last_volume) / count as f32;
    let mut gain = last_volume;
    let mut contribution = 0;
    for (out, &x) in output.iter_mut().zip(input) {
        contribution = (x as f32 * gain) as i32;
        *out = out.wrapping_add(contribution);
        gain += delta;
    }
    contribution
}

/// Add a geometrically decaying tail seeded by `first_sample`
///
/// Returns the value left after the block, signed like the seed, so the tail
/// continues across frames until it reaches zero.
pub fn apply_depop(output: &mut [i32], first_sample: i32, delta: i32) -> i32 {
    let positive = first_sample > 0;
    let mut magnitude = first_sample.unsigned_abs() as i64;
    for out in output.iter_mut() {
        magnitude = (magnitude * delta as i64) >> 15;
        let value = magnitude as i32;
        *out = if positive {
            out.wrapping_add(value)
        } else {
            out.wrapping_sub(value)
        };
    }
    if positive {
        magnitude as i32
    } else {
        -(magnitude as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_ramp_is_linear() {
        let mut block = [32767i32; 240];
        apply_volume_ramp(&mut block, 0.0, 1.0);
        assert_eq!(block[0], 0);
        for (i, &sample) in block.iter().enumerate() {
            let ideal = 32767.0 * i as f64 / 240.0;
            assert!((sample as f64 - ideal).abs() <= 1.5, "sample {} = {}", i, sample);
        }
    }

    #[test]
    fn test_volume_ramp_constant_is_identity() {
        let mut block = [1000i32, -1000, 32767, -32768];
        apply_volume_ramp(&mut block, 1.0, 1.0);
        assert_eq!(block, [1000, -1000, 32767, -32768]);
    }

    #[test]
    fn test_gain() {
        let mut block = [1000i32, -1000];
        apply_gain(&mut block, 0.5);
        assert_eq!(block, [500, -500]);
        apply_gain(&mut block, 1.0);
        assert_eq!(block, [500, -500]);
    }

    #[test]
    fn test_mix_ramp_returns_last_contribution() {
        let input = [1000i32; 8];
        let mut output = [10i32; 8];
        let last = apply_mix_ramp(&mut output, &input, 1.0, 1.0);
        assert_eq!(last, 1000);
        assert!(output.iter().all(|&s| s == 1010));
    }

    #[test]
    fn test_mix_ramp_from_silence() {
        let input = [800i32; 4];
        let mut output = [0i32; 4];
        apply_mix_ramp(&mut output, &input, 0.0, 1.0);
        assert_eq!(output, [0, 200, 400, 600]);
    }

    #[test]
    fn test_depop_strictly_decays() {
        let mut block = [0i32; 240];
        let remaining = apply_depop(&mut block, 20000, DEPOP_DELTA_48K);
        let mut previous = 20000;
        for &sample in block.iter() {
            assert!(sample >= 0);
            if previous > 0 {
                assert!(sample < previous);
            }
            previous = sample;
        }
        assert_eq!(remaining, block[239]);
    }

    #[test]
    fn test_depop_negative_seed() {
        let mut block = [0i32; 4];
        let remaining = apply_depop(&mut block, -1000, DEPOP_DELTA_48K);
        assert!(block.iter().all(|&s| s < 0));
        assert_eq!(remaining, block[3]);
    }

    #[test]
    fn test_depop_delta_by_rate() {
        assert_eq!(depop_delta(48000), 0x7B29);
        assert_eq!(depop_delta(32000), 0x78CB);
    }
}
