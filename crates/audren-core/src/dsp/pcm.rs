//! PCM and float sample decoding
//!
//! Samples are interleaved with a stride of `channel_count`; one call extracts
//! a single channel and scales it to the signed 16-bit range.

use crate::types::{clamp_i16, SampleFormat};

/// Decode one channel of interleaved PCM
///
/// `bytes` starts at the first frame to decode. Returns the number of samples
/// written to `out`, short when `bytes` runs out. ADPCM and invalid formats
/// produce nothing.
pub fn decode(
    bytes: &[u8],
    format: SampleFormat,
    channel: usize,
    channel_count: usize,
    out: &mut [i16],
) -> usize {
    let width = format.bytes_per_sample();
    if width == 0 || channel >= channel_count {
        return 0;
    }
    let stride = width * channel_count;

    let mut produced = 0;
    for (slot, frame) in out.iter_mut().zip(bytes.chunks_exact(stride)) {
        let raw = &frame[channel * width..(channel + 1) * width];
        *slot = match format {
            SampleFormat::Pcm8 => {
                let value = raw[0] as i8 as i32;
                clamp_i16(value * i16::MAX as i32 / i8::MAX as i32)
            }
            SampleFormat::Pcm16 => i16::from_le_bytes([raw[0], raw[1]]),
            SampleFormat::Pcm32 => {
                let value = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
                (value * i16::MAX as i64 / i32::MAX as i64).clamp(i16::MIN as i64, i16::MAX as i64)
                    as i16
            }
            SampleFormat::PcmFloat => {
                let value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                clamp_i16((value * i16::MAX as f32) as i32)
            }
            SampleFormat::Adpcm | SampleFormat::Invalid => 0,
        };
        produced += 1;
    }
    produced
}
