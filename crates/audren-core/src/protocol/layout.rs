//! Fixed-size wire records of the update protocol
//!
//! Every record is `#[repr(C)]` plain old data with explicit padding, so a
//! section can be read with `bytemuck::pod_read_unaligned` and written with
//! `bytemuck::bytes_of`. Sizes are checked at compile time.

use bytemuck::{Pod, Zeroable};

use crate::types::{MAX_CHANNEL_COUNT, MAX_ERROR_INFOS, MAX_MIX_BUFFERS, MAX_WAVE_BUFFERS};

/// Build a four-character magic
pub const fn magic(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub const SPLITTER_HEADER_MAGIC: u32 = magic(b"SNDH");
pub const SPLITTER_INFO_MAGIC: u32 = magic(b"SNDI");
pub const SPLITTER_DESTINATION_MAGIC: u32 = magic(b"SNDD");

/// Size of the effect-specific parameter block
pub const EFFECT_PARAM_SIZE: usize = 0xA0;

macro_rules! assert_size {
    ($ty:ty, $size:expr) => {
        const _: () = assert!(std::mem::size_of::<$ty>() == $size);
    };
}

/// Section sizes in the order they appear in the header
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SectionSizes {
    pub behavior: u32,
    pub memory_pool: u32,
    pub voice: u32,
    pub voice_channel_resource: u32,
    pub effect: u32,
    pub mixer: u32,
    pub sink: u32,
    pub performance: u32,
    pub splitter: u32,
    pub render_info: u32,
}

/// Header shared by request and response blobs
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UpdateDataHeader {
    pub revision: u32,
    pub sizes: SectionSizes,
    pub padding: [u32; 4],
    pub total_size: u32,
}
assert_size!(UpdateDataHeader, 0x40);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BehaviorInParams {
    pub revision: u32,
    pub padding: u32,
    pub flags: u64,
}
assert_size!(BehaviorInParams, 0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryPoolInParams {
    pub address: u64,
    pub size: u64,
    pub state: u32,
    pub padding: [u32; 3],
}
assert_size!(MemoryPoolInParams, 0x20);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MemoryPoolOutParams {
    pub state: u32,
    pub padding: [u32; 3],
}
assert_size!(MemoryPoolOutParams, 0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceChannelResourceInParams {
    pub id: u32,
    pub mix_volume: [f32; MAX_MIX_BUFFERS],
    pub in_use: u8,
    pub padding: [u8; 11],
}
assert_size!(VoiceChannelResourceInParams, 0x70);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BiquadFilterParams {
    pub enabled: u8,
    pub padding: u8,
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
}
assert_size!(BiquadFilterParams, 0xC);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WaveBufferInParams {
    pub address: u64,
    pub size: u64,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub is_looping: u8,
    pub end_of_stream: u8,
    pub sent_to_server: u8,
    pub padding: u8,
    /// Extra passes through the buffer; 0 loops forever
    pub loop_count: i32,
    pub context_address: u64,
    pub context_size: u64,
    pub loop_start: u32,
    pub loop_end: u32,
}
assert_size!(WaveBufferInParams, 0x38);

/// Voice behavior flag: reset `played_samples` when a loop restarts
pub const VOICE_FLAG_PLAYED_SAMPLES_RESET_AT_LOOP: u32 = 1 << 0;
/// Voice behavior flag: bypass pitch and sample-rate conversion
pub const VOICE_FLAG_PITCH_AND_SRC_SKIPPED: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceInParams {
    pub id: u32,
    pub node_id: u32,
    pub is_new: u8,
    pub in_use: u8,
    pub play_state: u8,
    pub sample_format: u8,
    pub sample_rate: u32,
    pub priority: i32,
    pub sorting_order: i32,
    pub channel_count: u32,
    pub pitch: f32,
    pub volume: f32,
    pub biquads: [BiquadFilterParams; 2],
    pub wave_buffer_count: u32,
    pub wave_buffer_head: u16,
    pub padding0: u16,
    pub last_volume: f32,
    pub additional_params_address: u64,
    pub additional_params_size: u64,
    pub mix_id: i32,
    pub splitter_info_id: i32,
    pub wave_buffers: [WaveBufferInParams; MAX_WAVE_BUFFERS],
    pub channel_resource_ids: [i32; MAX_CHANNEL_COUNT],
    pub voice_drop_flag_clear: u8,
    pub flush_wave_buffer_count: u8,
    pub padding1: [u8; 2],
    pub behavior_flags: u32,
    pub padding2: [u8; 16],
}
assert_size!(VoiceInParams, 0x170);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VoiceOutParams {
    pub played_sample_count: u64,
    pub wave_buffer_consumed: u32,
    pub voice_drop_flag: u8,
    pub padding: [u8; 3],
}
assert_size!(VoiceOutParams, 0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct EffectInParams {
    pub effect_type: u8,
    pub is_new: u8,
    pub enabled: u8,
    pub padding0: u8,
    pub mix_id: i32,
    pub buffer_address: u64,
    pub buffer_size: u64,
    pub processing_order: i32,
    pub padding1: u32,
    pub params: [u8; EFFECT_PARAM_SIZE],
}
assert_size!(EffectInParams, 0xC0);

impl Default for EffectInParams {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl EffectInParams {
    /// Decode the type-specific parameter block
    pub fn params_as<T: Pod>(&self) -> T {
        let size = std::mem::size_of::<T>().min(EFFECT_PARAM_SIZE);
        let mut value = T::zeroed();
        bytemuck::bytes_of_mut(&mut value)[..size].copy_from_slice(&self.params[..size]);
        value
    }

    /// Encode a type-specific parameter block
    pub fn set_params<T: Pod>(&mut self, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let size = bytes.len().min(EFFECT_PARAM_SIZE);
        self.params = [0; EFFECT_PARAM_SIZE];
        self.params[..size].copy_from_slice(&bytes[..size]);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EffectOutParams {
    pub status: u8,
    pub padding: [u8; 15],
}
assert_size!(EffectOutParams, 0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BufferMixerParams {
    pub input: [i8; MAX_MIX_BUFFERS],
    pub output: [i8; MAX_MIX_BUFFERS],
    pub volume: [f32; MAX_MIX_BUFFERS],
    pub count: u32,
}
assert_size!(BufferMixerParams, 148);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AuxParams {
    pub input: [i8; MAX_MIX_BUFFERS],
    pub output: [i8; MAX_MIX_BUFFERS],
    pub count: u32,
    pub sample_rate: u32,
    /// Length of each ring buffer in samples
    pub sample_count: u32,
    pub mix_buffer_count: u32,
    pub send_info_address: u64,
    pub send_buffer_address: u64,
    pub recv_info_address: u64,
    pub recv_buffer_address: u64,
}
assert_size!(AuxParams, 96);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DelayParams {
    pub input: [i8; MAX_CHANNEL_COUNT],
    pub output: [i8; MAX_CHANNEL_COUNT],
    pub max_channels: u16,
    pub channel_count: u16,
    pub max_delay_ms: u32,
    pub delay_ms: u32,
    pub sample_rate: u32,
    pub in_gain: f32,
    pub feedback_gain: f32,
    pub wet_gain: f32,
    pub dry_gain: f32,
    pub channel_spread: f32,
    pub lowpass_amount: f32,
    pub status: u8,
    pub padding: [u8; 3],
}
assert_size!(DelayParams, 56);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ReverbParams {
    pub input: [i8; MAX_CHANNEL_COUNT],
    pub output: [i8; MAX_CHANNEL_COUNT],
    pub max_channels: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub dry_gain: f32,
    pub status: u8,
    pub padding: [u8; 3],
}
assert_size!(ReverbParams, 28);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct I3dl2ReverbParams {
    pub input: [i8; MAX_CHANNEL_COUNT],
    pub output: [i8; MAX_CHANNEL_COUNT],
    pub max_channels: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub room_hf: f32,
    pub hf_reference: f32,
    pub decay_time: f32,
    pub hf_decay_ratio: f32,
    pub room: f32,
    pub reflection: f32,
    pub reverb: f32,
    pub diffusion: f32,
    pub reflection_delay: f32,
    pub reverb_delay: f32,
    pub density: f32,
    pub dry_gain: f32,
    pub status: u8,
    pub padding: [u8; 3],
}
assert_size!(I3dl2ReverbParams, 72);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BiquadEffectParams {
    pub input: [i8; MAX_CHANNEL_COUNT],
    pub output: [i8; MAX_CHANNEL_COUNT],
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
    pub channel_count: u8,
    pub status: u8,
}
assert_size!(BiquadEffectParams, 24);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SplitterHeader {
    pub magic: u32,
    pub info_count: u32,
    pub data_count: u32,
    pub padding: [u32; 5],
}
assert_size!(SplitterHeader, 0x20);

/// Followed on the wire by `length` little-endian i32 destination ids
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SplitterInfoInParams {
    pub magic: u32,
    pub id: i32,
    pub sample_rate: u32,
    pub length: u32,
    pub node_id: u32,
}
assert_size!(SplitterInfoInParams, 0x14);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SplitterDestinationInParams {
    pub magic: u32,
    pub id: i32,
    pub mix_volumes: [f32; MAX_MIX_BUFFERS],
    pub mix_id: i32,
    pub in_use: u8,
    pub padding: [u8; 3],
}
assert_size!(SplitterDestinationInParams, 0x70);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MixInParams {
    pub volume: f32,
    pub sample_rate: u32,
    pub buffer_count: u32,
    pub in_use: u8,
    pub padding0: [u8; 3],
    pub mix_id: i32,
    pub effect_count: u32,
    pub node_id: u32,
    pub padding1: [u8; 8],
    pub mix_volume: [[f32; MAX_MIX_BUFFERS]; MAX_MIX_BUFFERS],
    pub dest_mix_id: i32,
    pub splitter_id: i32,
    pub padding2: u32,
}
assert_size!(MixInParams, 0x930);

impl Default for MixInParams {
    fn default() -> Self {
        Self {
            dest_mix_id: crate::types::NO_MIX,
            splitter_id: crate::types::NO_SPLITTER,
            ..Self::zeroed()
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MixDirtyHeader {
    pub mix_count: u32,
    pub padding: [u32; 7],
}
assert_size!(MixDirtyHeader, 0x20);

/// Sink type: hardware device
pub const SINK_TYPE_DEVICE: u8 = 1;
/// Sink type: circular buffer in guest memory
pub const SINK_TYPE_CIRCULAR_BUFFER: u8 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SinkInParams {
    pub sink_type: u8,
    pub in_use: u8,
    pub padding0: [u8; 2],
    pub node_id: u32,
    pub padding1: [u8; 24],
    pub name: [u8; 0x100],
    pub input_count: u32,
    pub input: [i8; MAX_CHANNEL_COUNT],
    pub padding2: [u8; 2],
    pub downmix_enabled: u8,
    pub padding3: [u8; 3],
    pub downmix_coefficients: [f32; 4],
}
assert_size!(SinkInParams, 0x140);

impl Default for SinkInParams {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SinkOutParams {
    pub last_written_offset: u32,
    pub padding: [u32; 7],
}
assert_size!(SinkOutParams, 0x20);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PerformanceOutParams {
    pub history_size: u32,
    pub padding: [u32; 3],
}
assert_size!(PerformanceOutParams, 0x10);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ErrorEntry {
    pub result_code: u32,
    pub padding: u32,
    pub address: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ErrorInfoOutParams {
    pub errors: [ErrorEntry; MAX_ERROR_INFOS],
    pub error_count: u32,
    pub padding: [u32; 3],
}
assert_size!(ErrorInfoOutParams, 0xB0);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RendererInfoOutParams {
    pub elapsed_frame_count: u64,
    pub padding: u64,
}
assert_size!(RendererInfoOutParams, 0x10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magics() {
        assert_eq!(&SPLITTER_HEADER_MAGIC.to_le_bytes(), b"SNDH");
        assert_eq!(&SPLITTER_INFO_MAGIC.to_le_bytes(), b"SNDI");
        assert_eq!(&SPLITTER_DESTINATION_MAGIC.to_le_bytes(), b"SNDD");
    }

    #[test]
    fn test_effect_params_block() {
        let mut effect = EffectInParams::default();
        let aux = AuxParams {
            count: 2,
            sample_count: 960,
            send_info_address: 0x8000,
            ..Default::default()
        };
        effect.set_params(&aux);
        assert_eq!(effect.params_as::<AuxParams>(), aux);
    }

    #[test]
    fn test_voice_field_offsets() {
        use std::mem::offset_of;
        assert_eq!(offset_of!(VoiceInParams, wave_buffers), 0x60);
        assert_eq!(offset_of!(VoiceInParams, channel_resource_ids), 0x140);
        assert_eq!(offset_of!(VoiceInParams, behavior_flags), 0x15C);
        assert_eq!(offset_of!(MixInParams, mix_volume), 0x24);
        assert_eq!(offset_of!(SinkInParams, input_count), 0x120);
    }
}
