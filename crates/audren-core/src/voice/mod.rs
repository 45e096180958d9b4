//! Voices: server-side parameters, channel resources and per-channel DSP state

mod context;
pub mod decode;

pub use context::VoiceContext;

use crate::behavior::BehaviorInfo;
use crate::dsp::adpcm::{AdpcmCoefficients, AdpcmContext, ADPCM_COEFFICIENT_COUNT};
use crate::dsp::biquad::{BiquadCoefficients, BiquadState};
use crate::error::ERR_INVALID_ADDRESS_INFO;
use crate::memory::{read_pod, HostMemory};
use crate::memory_pool::{is_mapped, MemoryPoolInfo};
use crate::protocol::{
    BiquadFilterParams, VoiceChannelResourceInParams, VoiceInParams, VoiceOutParams,
    WaveBufferInParams, VOICE_FLAG_PITCH_AND_SRC_SKIPPED, VOICE_FLAG_PLAYED_SAMPLES_RESET_AT_LOOP,
};
use crate::types::{
    PlayState, SampleFormat, MAX_BIQUAD_FILTERS, MAX_CHANNEL_COUNT, MAX_MIX_BUFFERS,
    MAX_SAMPLE_HISTORY, MAX_WAVE_BUFFERS, NO_MIX, NO_SPLITTER,
};

// ─────────────────────────────────────────────────────────────────────────────
// Wave-buffers
// ─────────────────────────────────────────────────────────────────────────────

/// Server copy of one wave-buffer descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WaveBuffer {
    pub address: u64,
    pub size: u64,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub is_looping: bool,
    pub end_of_stream: bool,
    /// Cleared when copied from an update, set once the DSP has taken it
    pub sent_to_dsp: bool,
    /// Extra passes over the loop region; 0 loops until stopped
    pub loop_count: i32,
    pub context_address: u64,
    pub context_size: u64,
    pub loop_start: u32,
    pub loop_end: u32,
}

impl WaveBuffer {
    fn from_params(params: &WaveBufferInParams) -> Self {
        Self {
            address: params.address,
            size: params.size,
            start_sample_offset: params.start_sample_offset,
            end_sample_offset: params.end_sample_offset,
            is_looping: params.is_looping != 0,
            end_of_stream: params.end_of_stream != 0,
            sent_to_dsp: false,
            loop_count: params.loop_count,
            context_address: params.context_address,
            context_size: params.context_size,
            loop_start: params.loop_start,
            loop_end: params.loop_end,
        }
    }

    /// Sample range `[start, end)` for the current pass
    ///
    /// Passes after the first use the loop region when one is set.
    pub fn sample_range(&self, loop_pass: i32) -> (u32, u32) {
        if loop_pass > 0 && self.loop_end > self.loop_start {
            (self.loop_start, self.loop_end)
        } else {
            let start = self.start_sample_offset.max(0) as u32;
            let end = self.end_sample_offset.max(0) as u32;
            (start, end.max(start))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DSP state
// ─────────────────────────────────────────────────────────────────────────────

/// Streaming state of one voice channel, written by the command generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceState {
    pub played_samples: u64,
    /// Sample position within the current wave-buffer pass
    pub offset: u32,
    pub wave_buffer_index: usize,
    pub is_wave_buffer_valid: [bool; MAX_WAVE_BUFFERS],
    pub wave_buffer_consumed: u32,
    pub sample_history: [i32; MAX_SAMPLE_HISTORY],
    /// Resampler phase (Q15)
    pub fraction: u32,
    pub adpcm_context: AdpcmContext,
    pub biquad_states: [BiquadState; MAX_BIQUAD_FILTERS],
    /// Last contribution per destination buffer, seeds the depop tail
    pub previous_samples: [i32; MAX_MIX_BUFFERS],
    /// Loop passes completed on the current wave-buffer
    pub loop_count: i32,
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            played_samples: 0,
            offset: 0,
            wave_buffer_index: 0,
            is_wave_buffer_valid: [false; MAX_WAVE_BUFFERS],
            wave_buffer_consumed: 0,
            sample_history: [0; MAX_SAMPLE_HISTORY],
            fraction: 0,
            adpcm_context: AdpcmContext::default(),
            biquad_states: [BiquadState::default(); MAX_BIQUAD_FILTERS],
            previous_samples: [0; MAX_MIX_BUFFERS],
            loop_count: 0,
        }
    }
}

impl VoiceState {
    /// Retire the current wave-buffer and move to the next slot
    pub fn finish_wave_buffer(&mut self, end_of_stream: bool) {
        self.is_wave_buffer_valid[self.wave_buffer_index] = false;
        self.wave_buffer_consumed += 1;
        self.wave_buffer_index = (self.wave_buffer_index + 1) % MAX_WAVE_BUFFERS;
        self.offset = 0;
        self.loop_count = 0;
        if end_of_stream {
            self.played_samples = 0;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel resources
// ─────────────────────────────────────────────────────────────────────────────

/// Per-channel mix volumes toward the voice's destination mix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceChannelResource {
    pub id: u32,
    pub mix_volume: [f32; MAX_MIX_BUFFERS],
    pub last_mix_volume: [f32; MAX_MIX_BUFFERS],
    pub in_use: bool,
}

impl Default for VoiceChannelResource {
    fn default() -> Self {
        Self {
            id: 0,
            mix_volume: [0.0; MAX_MIX_BUFFERS],
            last_mix_volume: [0.0; MAX_MIX_BUFFERS],
            in_use: false,
        }
    }
}

impl VoiceChannelResource {
    /// Copy the volume vector when the resource is in use
    ///
    /// The first update after the resource comes into use also latches the
    /// last volumes so the first ramp starts flat.
    pub fn update(&mut self, params: &VoiceChannelResourceInParams) {
        let first_use = !self.in_use;
        self.id = params.id;
        self.in_use = params.in_use != 0;
        if self.in_use {
            self.mix_volume = params.mix_volume;
            if first_use {
                self.last_mix_volume = self.mix_volume;
            }
        }
    }

    pub fn commit_mix_volumes(&mut self) {
        self.last_mix_volume = self.mix_volume;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Voice parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadFilter {
    pub enabled: bool,
    pub coefficients: BiquadCoefficients,
}

impl BiquadFilter {
    fn from_params(params: &BiquadFilterParams) -> Self {
        Self {
            enabled: params.enabled != 0,
            coefficients: BiquadCoefficients {
                numerator: params.numerator,
                denominator: params.denominator,
            },
        }
    }
}

/// Server-side record of one voice
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    pub id: u32,
    pub node_id: u32,
    pub in_use: bool,
    pub is_new: bool,
    pub play_state: PlayState,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub priority: i32,
    pub sorting_order: i32,
    pub channel_count: usize,
    pub channel_resource_ids: [i32; MAX_CHANNEL_COUNT],
    pub pitch: f32,
    pub volume: f32,
    pub last_volume: f32,
    pub biquads: [BiquadFilter; MAX_BIQUAD_FILTERS],
    pub was_biquad_enabled: [bool; MAX_BIQUAD_FILTERS],
    pub wave_buffers: [WaveBuffer; MAX_WAVE_BUFFERS],
    pub wave_buffer_head: usize,
    pub mix_id: i32,
    pub splitter_info_id: i32,
    pub adpcm_coefficients: AdpcmCoefficients,
    pub pitch_and_src_skipped: bool,
    pub played_samples_reset_at_loop: bool,
    /// One-frame depop tail pending after leaving `Play`
    pub should_depop: bool,
    pub voice_drop_flag: bool,
    /// Every pending wave-buffer lies in an attached memory pool
    pub buffer_mapped: bool,
    /// Wave-buffers to drop at the next frame without decoding
    pub flush_wave_buffer_count: u8,
}

impl Default for VoiceInfo {
    fn default() -> Self {
        Self {
            id: 0,
            node_id: 0,
            in_use: false,
            is_new: false,
            play_state: PlayState::Stop,
            sample_format: SampleFormat::Invalid,
            sample_rate: 0,
            priority: 0,
            sorting_order: 0,
            channel_count: 0,
            channel_resource_ids: [0; MAX_CHANNEL_COUNT],
            pitch: 0.0,
            volume: 0.0,
            last_volume: 0.0,
            biquads: [BiquadFilter::default(); MAX_BIQUAD_FILTERS],
            was_biquad_enabled: [false; MAX_BIQUAD_FILTERS],
            wave_buffers: [WaveBuffer::default(); MAX_WAVE_BUFFERS],
            wave_buffer_head: 0,
            mix_id: NO_MIX,
            splitter_info_id: NO_SPLITTER,
            adpcm_coefficients: [0; ADPCM_COEFFICIENT_COUNT],
            pitch_and_src_skipped: false,
            played_samples_reset_at_loop: false,
            should_depop: false,
            voice_drop_flag: false,
            buffer_mapped: true,
            flush_wave_buffer_count: 0,
        }
    }
}

impl VoiceInfo {
    /// Apply a guest play-state request
    ///
    /// Stopping a playing or paused voice goes through `RequestStop` so its DSP
    /// state is cleared at the end of the next frame. Leaving `Play` latches
    /// the depop tail.
    pub fn update_play_state(&mut self, requested: PlayState) {
        let previous = self.play_state;
        self.play_state = match requested {
            PlayState::Play => PlayState::Play,
            PlayState::Paused => PlayState::Paused,
            PlayState::Stop | PlayState::RequestStop => match previous {
                PlayState::Play | PlayState::Paused => PlayState::RequestStop,
                other => other,
            },
        };
        if previous == PlayState::Play && self.play_state != PlayState::Play {
            self.should_depop = true;
        }
    }

    /// Copy one voice record from an update
    pub fn update(
        &mut self,
        params: &VoiceInParams,
        behavior: &mut BehaviorInfo,
        pools: &[MemoryPoolInfo],
        memory: &dyn HostMemory,
    ) {
        if params.is_new != 0 {
            *self = VoiceInfo {
                last_volume: params.last_volume,
                ..VoiceInfo::default()
            };
        }

        self.id = params.id;
        self.node_id = params.node_id;
        self.in_use = params.in_use != 0;
        self.is_new = params.is_new != 0;
        self.update_play_state(PlayState::from_raw(params.play_state));
        self.sample_format = SampleFormat::from_raw(params.sample_format);
        self.sample_rate = params.sample_rate;
        self.priority = params.priority;
        self.sorting_order = params.sorting_order;
        self.channel_count = (params.channel_count as usize).min(MAX_CHANNEL_COUNT);
        self.channel_resource_ids = params.channel_resource_ids;
        self.pitch = params.pitch;
        self.volume = params.volume;
        for (filter, in_filter) in self.biquads.iter_mut().zip(&params.biquads) {
            *filter = BiquadFilter::from_params(in_filter);
        }
        self.wave_buffer_head = params.wave_buffer_head as usize % MAX_WAVE_BUFFERS;
        self.mix_id = params.mix_id;
        self.splitter_info_id = params.splitter_info_id;
        self.pitch_and_src_skipped = params.behavior_flags & VOICE_FLAG_PITCH_AND_SRC_SKIPPED != 0;
        self.played_samples_reset_at_loop = behavior.is_played_samples_reset_at_loop_supported()
            && params.behavior_flags & VOICE_FLAG_PLAYED_SAMPLES_RESET_AT_LOOP != 0;
        self.flush_wave_buffer_count = self
            .flush_wave_buffer_count
            .saturating_add(params.flush_wave_buffer_count)
            .min(MAX_WAVE_BUFFERS as u8);
        if params.voice_drop_flag_clear != 0 {
            self.voice_drop_flag = false;
        }

        if self.sample_format == SampleFormat::Adpcm
            && params.additional_params_address != 0
            && params.additional_params_size as usize >= ADPCM_COEFFICIENT_COUNT * 2
        {
            match read_pod::<AdpcmCoefficients>(memory, params.additional_params_address) {
                Some(coefficients) => self.adpcm_coefficients = coefficients,
                None => {
                    log::warn!(
                        "Voice {}: ADPCM coefficients at {:#x} are unreadable",
                        self.id,
                        params.additional_params_address
                    );
                    behavior.append_error(ERR_INVALID_ADDRESS_INFO, params.additional_params_address);
                }
            }
        }

        self.update_wave_buffers(params, behavior, pools);
    }

    fn update_wave_buffers(
        &mut self,
        params: &VoiceInParams,
        behavior: &mut BehaviorInfo,
        pools: &[MemoryPoolInfo],
    ) {
        let force_mapped = behavior.is_memory_pool_force_mapping_enabled();
        let is_new = params.is_new != 0;

        for (buffer, in_buffer) in self.wave_buffers.iter_mut().zip(&params.wave_buffers) {
            if !is_new && in_buffer.sent_to_server != 0 {
                continue;
            }
            *buffer = WaveBuffer::from_params(in_buffer);
            if buffer.size > 0 && !force_mapped && !is_mapped(pools, buffer.address, buffer.size) {
                log::warn!(
                    "Voice {}: wave-buffer {:#x}+{:#x} is outside every attached pool",
                    self.id,
                    buffer.address,
                    buffer.size
                );
                behavior.append_error(ERR_INVALID_ADDRESS_INFO, buffer.address);
            }
        }

        self.buffer_mapped = force_mapped
            || self
                .wave_buffers
                .iter()
                .filter(|buffer| buffer.size > 0)
                .all(|buffer| is_mapped(pools, buffer.address, buffer.size));
    }

    /// Output record built from the first channel's DSP state
    pub fn output(&self, first_state: Option<&VoiceState>) -> VoiceOutParams {
        let mut out = VoiceOutParams {
            voice_drop_flag: self.voice_drop_flag as u8,
            ..Default::default()
        };
        if let Some(state) = first_state {
            out.played_sample_count = state.played_samples;
            out.wave_buffer_consumed = state.wave_buffer_consumed;
        }
        out
    }

    /// Whether the command generator should visit this voice
    pub fn should_render(&self) -> bool {
        self.in_use && self.buffer_mapped && !self.voice_drop_flag && self.channel_count > 0
    }

    /// Resource ids of the voice's channels
    pub fn channel_resources(&self) -> impl Iterator<Item = usize> + '_ {
        self.channel_resource_ids[..self.channel_count]
            .iter()
            .map(|&id| usize::try_from(id).unwrap_or(usize::MAX))
    }
}
