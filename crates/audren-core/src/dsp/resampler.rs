//! 4-tap ratio resampler
//!
//! The phase is a 15-bit fraction. Each call consumes
//! `(sample_count * ratio + fraction) >> 15` new input samples and carries the
//! last [`MAX_SAMPLE_HISTORY`] of them into the next call, so consecutive
//! frames interpolate across the boundary.

use crate::types::MAX_SAMPLE_HISTORY;

/// Fixed-point one (ratio of exactly 1.0)
pub const FRACTION_ONE: u32 = 1 << 15;
const FRACTION_MASK: u64 = (FRACTION_ONE as u64) - 1;

/// Q15 step through the input for one output sample
pub fn pitch_ratio(source_rate: u32, target_rate: u32, pitch: f32) -> u32 {
    if target_rate == 0 || !pitch.is_finite() || pitch <= 0.0 {
        return 0;
    }
    let ratio = (source_rate as f32 / target_rate as f32) * pitch * FRACTION_ONE as f32;
    ratio.min(u32::MAX as f32 / 2.0) as u32
}

/// New input samples needed to produce `sample_count` outputs
pub fn samples_to_read(ratio: u32, fraction: u32, sample_count: usize) -> usize {
    ((sample_count as u64 * ratio as u64 + fraction as u64) >> 15) as usize
}

/// Catmull-Rom weights in Q15 for phase `t` (Q15)
#[inline]
fn weights(t: i64) -> [i64; 4] {
    let t2 = (t * t) >> 15;
    let t3 = (t2 * t) >> 15;
    let two = 2 << 15;
    [
        (-t3 + 2 * t2 - t) / 2,
        (3 * t3 - 5 * t2 + two) / 2,
        (-3 * t3 + 4 * t2 + t) / 2,
        (t3 - t2) / 2,
    ]
}

/// Resample into `out`
///
/// `input` must hold the carried history in its first [`MAX_SAMPLE_HISTORY`]
/// entries followed by exactly `samples_to_read(ratio, *fraction, out.len())`
/// new samples. Updates `fraction` and `history` for the next call.
pub fn resample(
    input: &[i32],
    ratio: u32,
    fraction: &mut u32,
    history: &mut [i32; MAX_SAMPLE_HISTORY],
    out: &mut [i32],
) {
    let to_read = samples_to_read(ratio, *fraction, out.len());
    debug_assert!(input.len() >= to_read + MAX_SAMPLE_HISTORY);

    let mut position = *fraction as u64;
    for slot in out.iter_mut() {
        let index = (position >> 15) as usize;
        let taps = weights((position & FRACTION_MASK) as i64);
        let mut acc: i64 = 0x4000;
        for (tap, weight) in taps.iter().enumerate() {
            let sample = input.get(index + tap).copied().unwrap_or(0) as i64;
            acc += sample * weight;
        }
        *slot = (acc >> 15).clamp(i16::MIN as i64, i16::MAX as i64) as i32;
        position += ratio as u64;
    }

    *fraction = (position - ((to_read as u64) << 15)) as u32;
    for (i, slot) in history.iter_mut().enumerate() {
        *slot = input.get(to_read + i).copied().unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_ratio() {
        assert_eq!(pitch_ratio(48000, 48000, 1.0), FRACTION_ONE);
        assert_eq!(pitch_ratio(24000, 48000, 1.0), FRACTION_ONE / 2);
        assert_eq!(pitch_ratio(48000, 48000, 2.0), FRACTION_ONE * 2);
        assert_eq!(pitch_ratio(48000, 0, 1.0), 0);
    }

    #[test]
    fn test_unity_ratio_is_delayed_copy() {
        let mut input = vec![0i32; MAX_SAMPLE_HISTORY];
        input.extend((1..=16).map(|v| v * 100));
        let mut fraction = 0;
        let mut history = [0; MAX_SAMPLE_HISTORY];
        let mut out = [0i32; 16];

        resample(&input, FRACTION_ONE, &mut fraction, &mut history, &mut out);

        // zero phase lands exactly on the second tap
        assert_eq!(out[0], 0);
        assert_eq!(out[3], 100);
        assert_eq!(out[15], 1300);
        assert_eq!(fraction, 0);
        assert_eq!(history, [1300, 1400, 1500, 1600]);
    }

    #[test]
    fn test_fraction_carries() {
        let ratio = FRACTION_ONE + FRACTION_ONE / 4;
        assert_eq!(samples_to_read(ratio, 0, 8), 10);
        let input = vec![7i32; MAX_SAMPLE_HISTORY + 10];
        let mut fraction = 0;
        let mut history = [7; MAX_SAMPLE_HISTORY];
        let mut out = [0i32; 8];
        resample(&input, ratio, &mut fraction, &mut history, &mut out);
        assert_eq!(fraction, 0);
        assert!(out.iter().all(|&s| s == 7));

        assert_eq!(samples_to_read(ratio, 0, 6), 7);
        let mut fraction = 0;
        resample(&input[..MAX_SAMPLE_HISTORY + 7], ratio, &mut fraction, &mut history, &mut out[..6]);
        assert_eq!(fraction, FRACTION_ONE / 2);
    }

    #[test]
    fn test_deterministic() {
        let input: Vec<i32> = (0..40).map(|i| ((i * 7919) % 2001) - 1000).collect();
        let ratio = pitch_ratio(32000, 48000, 1.3);
        let run = || {
            let mut fraction = 1234;
            let mut history = [5, -5, 10, -10];
            let mut out = [0i32; 24];
            let needed = samples_to_read(ratio, fraction, out.len());
            resample(&input[..needed + MAX_SAMPLE_HISTORY], ratio, &mut fraction, &mut history, &mut out);
            (out, fraction, history)
        };
        assert_eq!(run(), run());
    }
}
