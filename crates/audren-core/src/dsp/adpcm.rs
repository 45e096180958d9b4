//! Block-wise ADPCM decoder
//!
//! A frame is 8 bytes holding 14 samples. Byte 0 is the frame header: scale in
//! the low nibble, coefficient pair index in the high nibble. The remaining 7
//! bytes carry one 4-bit residual per sample, high nibble first.

use crate::types::clamp_i16;

/// Bytes per ADPCM frame
pub const ADPCM_FRAME_SIZE: usize = 8;
/// Samples per ADPCM frame
pub const ADPCM_SAMPLES_PER_FRAME: usize = 14;
/// Entries in a coefficient table (8 pairs of 11-bit fractional values)
pub const ADPCM_COEFFICIENT_COUNT: usize = 16;

/// Coefficient table read from the voice's additional parameters
pub type AdpcmCoefficients = [i16; ADPCM_COEFFICIENT_COUNT];

const SIGNED_NIBBLE: [i32; 16] = [0, 1, 2, 3, 4, 5, 6, 7, -8, -7, -6, -5, -4, -3, -2, -1];

/// Decoder state carried across calls and wave-buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AdpcmContext {
    /// Header byte of the frame currently being decoded
    pub header: u16,
    pub yn1: i16,
    pub yn2: i16,
}

/// Byte window `(offset, len)` covering samples `[start, start + count)`
pub fn frame_range(start: usize, count: usize) -> (usize, usize) {
    if count == 0 {
        return (0, 0);
    }
    let first_frame = start / ADPCM_SAMPLES_PER_FRAME;
    let last_frame = (start + count - 1) / ADPCM_SAMPLES_PER_FRAME;
    (
        first_frame * ADPCM_FRAME_SIZE,
        (last_frame - first_frame + 1) * ADPCM_FRAME_SIZE,
    )
}

/// Decode up to `out.len()` samples
///
/// `frames` starts at a frame boundary and `skip` is the sample position within
/// it (as produced by [`frame_range`]). Decoding mid-frame takes the header
/// from `context`. Returns the number of samples produced, which is short only
/// when `frames` runs out.
pub fn decode(
    frames: &[u8],
    skip: usize,
    coefficients: &AdpcmCoefficients,
    context: &mut AdpcmContext,
    out: &mut [i16],
) -> usize {
    let mut position = skip;
    let mut produced = 0;

    while produced < out.len() {
        let frame = position / ADPCM_SAMPLES_PER_FRAME;
        let index = position % ADPCM_SAMPLES_PER_FRAME;
        let base = frame * ADPCM_FRAME_SIZE;

        if index == 0 {
            match frames.get(base) {
                Some(&header) => context.header = header as u16,
                None => break,
            }
        }

        let Some(&byte) = frames.get(base + 1 + index / 2) else {
            break;
        };
        let nibble = if index % 2 == 0 { byte >> 4 } else { byte & 0x0F };

        let scale = (context.header & 0x0F) as u32;
        let pair = ((context.header >> 4) & 0x07) as usize;
        let c1 = coefficients[pair * 2] as i64;
        let c2 = coefficients[pair * 2 + 1] as i64;

        let xn = (SIGNED_NIBBLE[nibble as usize] as i64) << scale;
        let yn1 = context.yn1 as i64;
        let yn2 = context.yn2 as i64;
        let predicted = ((xn << 11) + 0x400 + c1 * yn1 + c2 * yn2) >> 11;
        let sample = clamp_i16(predicted.clamp(i32::MIN as i64, i32::MAX as i64) as i32);

        context.yn2 = context.yn1;
        context.yn1 = sample;
        out[produced] = sample;

        produced += 1;
        position += 1;
    }

    produced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_frame_decodes_to_silence() {
        let frame = [0u8; 8];
        let coefficients = [0i16; 16];
        let mut context = AdpcmContext::default();
        let mut out = [123i16; 14];

        assert_eq!(decode(&frame, 0, &coefficients, &mut context, &mut out), 14);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_unit_nibbles_with_zero_coefficients() {
        let frame = [0x10, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11];
        let coefficients = [0i16; 16];
        let mut context = AdpcmContext::default();
        let mut out = [0i16; 14];

        decode(&frame, 0, &coefficients, &mut context, &mut out);

        // ((1 << 11) + 0x400) >> 11
        assert_eq!(out[0], 1);
        assert_eq!(out[1], 1);
        assert_eq!(context.yn1, 1);
        assert_eq!(context.yn2, 1);
        assert_eq!(context.header, 0x10);
    }

    #[test]
    fn test_output_stays_in_range_for_noise() {
        // xorshift noise with the largest scale and aggressive coefficients
        let mut state = 0x1234_5678u32;
        let mut frames = vec![0u8; 8 * 64];
        for byte in frames.iter_mut() {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            *byte = state as u8;
        }
        let coefficients = [
            4096, -2048, 2047, 0, -4096, 4095, 1024, 1024, 0, 0, 3000, -1500, -2048, 2047, 4095, -4096,
        ];
        let mut context = AdpcmContext::default();
        let mut out = vec![0i16; 64 * 14];
        assert_eq!(decode(&frames, 0, &coefficients, &mut context, &mut out), out.len());
        assert_eq!(context.yn1, out[out.len() - 1]);
        assert_eq!(context.yn2, out[out.len() - 2]);
    }

    #[test]
    fn test_split_decode_matches_single_pass() {
        let frames: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(37).wrapping_add(0x21)).collect();
        let coefficients = [1200, -300, 800, 200, -400, 100, 0, 0, 900, -900, 50, 50, 0, 0, 0, 0];

        let mut whole_context = AdpcmContext::default();
        let mut whole = [0i16; 56];
        decode(&frames, 0, &coefficients, &mut whole_context, &mut whole);

        let mut context = AdpcmContext::default();
        let mut first = [0i16; 20];
        decode(&frames, 0, &coefficients, &mut context, &mut first);
        let (offset, _) = frame_range(20, 36);
        let mut second = [0i16; 36];
        decode(&frames[offset..], 20 - 14, &coefficients, &mut context, &mut second);

        assert_eq!(&whole[..20], &first[..]);
        assert_eq!(&whole[20..], &second[..]);
        assert_eq!(context, whole_context);
    }

    #[test]
    fn test_frame_range() {
        assert_eq!(frame_range(0, 14), (0, 8));
        assert_eq!(frame_range(13, 2), (0, 16));
        assert_eq!(frame_range(14, 1), (8, 8));
        assert_eq!(frame_range(5, 0), (0, 0));
    }

    #[test]
    fn test_truncated_input_stops_early() {
        let frames = [0x00u8, 0x11, 0x11];
        let mut context = AdpcmContext::default();
        let mut out = [0i16; 14];
        assert_eq!(decode(&frames, 0, &[0; 16], &mut context, &mut out), 4);
    }
}
