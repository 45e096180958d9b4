//! Wave-buffer reader
//!
//! Pulls samples for one voice channel across the voice's wave-buffer ring,
//! honoring loop regions and loop counts, then resamples to the renderer rate.

use super::{VoiceInfo, VoiceState};
use crate::dsp::adpcm::{self, AdpcmContext, ADPCM_SAMPLES_PER_FRAME};
use crate::dsp::{pcm, resampler};
use crate::memory::{read_pod, HostMemory};
use crate::types::{SampleFormat, MAX_SAMPLE_HISTORY, MAX_WAVE_BUFFERS};

/// Samples decoded per host-memory read
const CHUNK_SAMPLES: usize = 0x80;
/// Bytes covering one chunk in the widest layout (6 channels of 32-bit)
const CHUNK_BYTES: usize = CHUNK_SAMPLES * 4 * 6;

/// Produce exactly `out.len()` samples for `channel` of `voice`
///
/// `input` is scratch space for the history plus freshly decoded samples; it
/// bounds how far a single frame may step through the source. Missing data
/// (no valid wave-buffer, unreadable memory) is silence.
pub fn decode_for(
    voice: &VoiceInfo,
    state: &mut VoiceState,
    channel: usize,
    memory: &dyn HostMemory,
    target_rate: u32,
    input: &mut [i32],
    out: &mut [i32],
) {
    let count = out.len();
    if count == 0 {
        return;
    }

    if voice.pitch_and_src_skipped {
        let produced = read_samples(voice, state, channel, memory, out);
        out[produced..].fill(0);
        return;
    }

    let capacity = input.len().saturating_sub(MAX_SAMPLE_HISTORY + 1);
    let mut ratio = resampler::pitch_ratio(voice.sample_rate, target_rate, voice.pitch);
    if resampler::samples_to_read(ratio, state.fraction, count) > capacity {
        let limit = (((capacity as u64) << 15).saturating_sub(state.fraction as u64) / count as u64) as u32;
        log::debug!("Voice {}: pitch ratio {:#x} clamped to {:#x}", voice.id, ratio, limit);
        ratio = limit;
    }
    let to_read = resampler::samples_to_read(ratio, state.fraction, count);

    let input = &mut input[..MAX_SAMPLE_HISTORY + to_read];
    input[..MAX_SAMPLE_HISTORY].copy_from_slice(&state.sample_history);
    let fresh = &mut input[MAX_SAMPLE_HISTORY..];
    let produced = read_samples(voice, state, channel, memory, fresh);
    fresh[produced..].fill(0);

    resampler::resample(input, ratio, &mut state.fraction, &mut state.sample_history, out);
}

/// Fill `out` from the wave-buffer ring; returns the samples produced
fn read_samples(
    voice: &VoiceInfo,
    state: &mut VoiceState,
    channel: usize,
    memory: &dyn HostMemory,
    out: &mut [i32],
) -> usize {
    let mut filled = 0;
    // A ring of zero-length looping buffers would never make progress
    let mut idle_steps = 0;

    while filled < out.len() && idle_steps <= MAX_WAVE_BUFFERS {
        let index = state.wave_buffer_index;
        if !state.is_wave_buffer_valid[index] {
            break;
        }
        let buffer = &voice.wave_buffers[index];
        let (start, end) = buffer.sample_range(state.loop_count);
        // Never read past the bytes the guest handed over
        let capacity = voice.sample_format.samples_in(buffer.size, voice.channel_count);
        let end = end.min(capacity.min(u32::MAX as u64) as u32);
        let length = end.saturating_sub(start);

        if state.offset == 0 && voice.sample_format == SampleFormat::Adpcm {
            load_adpcm_context(voice, state, index, memory);
        }

        if state.offset >= length {
            idle_steps += 1;
            complete_pass(voice, state, length == 0);
            continue;
        }

        let wanted = ((length - state.offset) as usize).min(out.len() - filled);
        let position = (start + state.offset) as usize;
        let decoded = decode_range(voice, state, channel, memory, position, &mut out[filled..filled + wanted]);
        if decoded < wanted {
            log::warn!(
                "Voice {}: wave-buffer {} at {:#x} is unreadable",
                voice.id,
                index,
                buffer.address
            );
            filled += decoded;
            break;
        }

        idle_steps = 0;
        filled += decoded;
        state.offset += decoded as u32;
        state.played_samples += decoded as u64;

        if state.offset >= length {
            complete_pass(voice, state, false);
        }
    }
    filled
}

/// End of one pass over the current wave-buffer: loop again or retire it
fn complete_pass(voice: &VoiceInfo, state: &mut VoiceState, empty: bool) {
    let buffer = &voice.wave_buffers[state.wave_buffer_index];
    let loops_left = buffer.loop_count == 0 || state.loop_count < buffer.loop_count;
    if buffer.is_looping && loops_left && !empty {
        state.offset = 0;
        state.loop_count += 1;
        if voice.played_samples_reset_at_loop {
            state.played_samples = 0;
        }
    } else {
        state.finish_wave_buffer(buffer.end_of_stream);
    }
}

fn load_adpcm_context(voice: &VoiceInfo, state: &mut VoiceState, index: usize, memory: &dyn HostMemory) {
    let buffer = &voice.wave_buffers[index];
    if buffer.context_address == 0 || (buffer.context_size as usize) < std::mem::size_of::<AdpcmContext>() {
        return;
    }
    match read_pod::<AdpcmContext>(memory, buffer.context_address) {
        Some(context) => state.adpcm_context = context,
        None => log::warn!(
            "Voice {}: ADPCM context at {:#x} is unreadable",
            voice.id,
            buffer.context_address
        ),
    }
}

/// Decode samples `[position, position + out.len())` of the current buffer
fn decode_range(
    voice: &VoiceInfo,
    state: &mut VoiceState,
    channel: usize,
    memory: &dyn HostMemory,
    position: usize,
    out: &mut [i32],
) -> usize {
    let buffer = voice.wave_buffers[state.wave_buffer_index];
    let mut bytes = [0u8; CHUNK_BYTES];
    let mut samples = [0i16; CHUNK_SAMPLES];
    let mut done = 0;

    while done < out.len() {
        let count = (out.len() - done).min(CHUNK_SAMPLES);
        let start = position + done;

        let produced = match voice.sample_format {
            SampleFormat::Adpcm if channel > 0 => {
                samples[..count].fill(0);
                count
            }
            SampleFormat::Adpcm => {
                let (offset, len) = adpcm::frame_range(start, count);
                if !memory.read(buffer.address + offset as u64, &mut bytes[..len]) {
                    return done;
                }
                adpcm::decode(
                    &bytes[..len],
                    start % ADPCM_SAMPLES_PER_FRAME,
                    &voice.adpcm_coefficients,
                    &mut state.adpcm_context,
                    &mut samples[..count],
                )
            }
            SampleFormat::Invalid => return done,
            format => {
                let stride = format.bytes_per_sample() * voice.channel_count;
                let len = count * stride;
                if !memory.read(buffer.address + (start * stride) as u64, &mut bytes[..len]) {
                    return done;
                }
                pcm::decode(&bytes[..len], format, channel, voice.channel_count, &mut samples[..count])
            }
        };

        for (slot, &sample) in out[done..done + produced].iter_mut().zip(&samples[..produced]) {
            *slot = sample as i32;
        }
        done += produced;
        if produced < count {
            break;
        }
    }
    done
}
