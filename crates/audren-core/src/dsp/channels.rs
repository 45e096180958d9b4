//! Channel adaptation from final-mix buffers to the stream layout
//!
//! Six-channel order is front-left, front-right, center, LFE, back-left,
//! back-right.

use crate::types::clamp_i16;

/// Front, center, LFE and back weights used by the 6 to 2 downmix
pub const DEFAULT_DOWNMIX_COEFFICIENTS: [f32; 4] = [1.0, 0.707, 0.0, 0.707];

const LFE: usize = 3;

#[inline]
fn downmix_side(front: i16, center: i16, lfe: i16, back: i16, coefficients: &[f32; 4]) -> i16 {
    let value = front as f32 * coefficients[0]
        + center as f32 * coefficients[1]
        + lfe as f32 * coefficients[2]
        + back as f32 * coefficients[3];
    clamp_i16(value as i32)
}

/// Map one frame of `source` channels onto `dest`
fn adapt_frame(source: &[i16], dest: &mut [i16], coefficients: &[f32; 4]) {
    let average = |a: i16, b: i16| ((a as i32 + b as i32) / 2) as i16;

    match (source.len(), dest.len()) {
        (0, _) => dest.fill(0),
        (1, _) => {
            dest.fill(source[0]);
            if dest.len() == 6 {
                dest[LFE] = 0;
            }
        }
        (6, 6) => dest.copy_from_slice(source),
        (6, 2) => {
            dest[0] = downmix_side(source[0], source[2], source[3], source[4], coefficients);
            dest[1] = downmix_side(source[1], source[2], source[3], source[5], coefficients);
        }
        (_, 1) => dest[0] = average(source[0], source[1]),
        (_, 2) => dest.copy_from_slice(&source[..2]),
        (_, 6) => {
            let (left, right) = (source[0], source[1]);
            dest.copy_from_slice(&[left, right, average(left, right), 0, left, right]);
        }
        (_, n) => {
            let shared = n.min(source.len());
            dest[..shared].copy_from_slice(&source[..shared]);
            dest[shared..].fill(0);
        }
    }
}

/// Clamp final-mix buffers to 16 bits and interleave them for the stream
///
/// `inputs` holds 1, 2 or 6 buffers of equal length; `out` receives
/// `len * output_channels` samples.
pub fn adapt_channels(
    inputs: &[&[i32]],
    output_channels: usize,
    coefficients: &[f32; 4],
    out: &mut [i16],
) {
    if output_channels == 0 {
        return;
    }
    let source_channels = inputs.len().min(6);
    let mut source = [0i16; 6];

    for (frame_index, frame) in out.chunks_exact_mut(output_channels).enumerate() {
        for (channel, input) in inputs.iter().take(source_channels).enumerate() {
            source[channel] = clamp_i16(input.get(frame_index).copied().unwrap_or(0));
        }
        adapt_frame(&source[..source_channels], frame, coefficients);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(inputs: &[&[i32]], channels: usize) -> Vec<i16> {
        let mut out = vec![0i16; inputs[0].len() * channels];
        adapt_channels(inputs, channels, &DEFAULT_DOWNMIX_COEFFICIENTS, &mut out);
        out
    }

    #[test]
    fn test_identity_layouts() {
        let left = [1i32, 2, 3];
        let right = [-1i32, -2, -3];
        assert_eq!(run(&[&left, &right], 2), vec![1, -1, 2, -2, 3, -3]);

        let channels: Vec<[i32; 1]> = (0..6).map(|c| [c * 10 + 1]).collect();
        let refs: Vec<&[i32]> = channels.iter().map(|c| &c[..]).collect();
        assert_eq!(run(&refs, 6), vec![1, 11, 21, 31, 41, 51]);
    }

    #[test]
    fn test_stereo_to_six_keeps_sides() {
        let out = run(&[&[100], &[300]], 6);
        assert_eq!(out, vec![100, 300, 200, 0, 100, 300]);
    }

    #[test]
    fn test_mono_replicates_without_lfe() {
        assert_eq!(run(&[&[7]], 2), vec![7, 7]);
        assert_eq!(run(&[&[7]], 6), vec![7, 7, 7, 0, 7, 7]);
        assert_eq!(run(&[&[7]], 1), vec![7]);
    }

    #[test]
    fn test_to_mono_averages() {
        assert_eq!(run(&[&[100], &[300]], 1), vec![200]);
        let six: Vec<[i32; 1]> = vec![[100], [300], [5000], [5000], [5000], [5000]];
        let refs: Vec<&[i32]> = six.iter().map(|c| &c[..]).collect();
        assert_eq!(run(&refs, 1), vec![200]);
    }

    #[test]
    fn test_six_to_stereo_downmix() {
        let six: Vec<[i32; 1]> = vec![[1000], [2000], [1000], [9999], [1000], [0]];
        let refs: Vec<&[i32]> = six.iter().map(|c| &c[..]).collect();
        let out = run(&refs, 2);
        assert!((out[0] as i32 - 2414).abs() <= 1, "left {}", out[0]);
        assert!((out[1] as i32 - 2707).abs() <= 1, "right {}", out[1]);
    }

    #[test]
    fn test_clamps_to_16_bit() {
        assert_eq!(run(&[&[100_000], &[-100_000]], 2), vec![i16::MAX, i16::MIN]);
    }
}
