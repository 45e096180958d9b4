//! Shared constants, sentinels and small enums used across the renderer

/// Rate the output stream runs at (Hz)
pub const STREAM_SAMPLE_RATE: u32 = 48000;
/// Channel count of the output stream unless configured otherwise
pub const STREAM_NUM_CHANNELS: usize = 2;

/// Maximum number of mix buffers a single mix (or voice destination) addresses
pub const MAX_MIX_BUFFERS: usize = 24;
/// Biquad filters per voice
pub const MAX_BIQUAD_FILTERS: usize = 2;
/// Maximum channels per voice, effect or sink
pub const MAX_CHANNEL_COUNT: usize = 6;
/// Wave-buffers queued per voice
pub const MAX_WAVE_BUFFERS: usize = 4;
/// Samples carried between resampler calls
pub const MAX_SAMPLE_HISTORY: usize = 4;
/// Entries in the behavior error list
pub const MAX_ERROR_INFOS: usize = 10;
/// Scratch region for decoded samples before resampling
pub const SAMPLE_BUFFER_SIZE: usize = 0x3f00;

/// Voice or mix is not routed to a splitter
pub const NO_SPLITTER: i32 = -1;
/// Voice or mix has no destination mix
pub const NO_MIX: i32 = 0x7FFF_FFFF;
/// Distance of a mix that cannot reach the final mix
pub const NO_FINAL_MIX: i32 = i32::MIN;
/// Id of the mix whose buffers feed the sink
pub const FINAL_MIX: i32 = 0;
/// Empty slot in a mix's effect processing order
pub const NO_EFFECT_ORDER: i32 = -1;

/// Host memory page size; memory pools must be aligned to it
pub const PAGE_SIZE: u64 = 0x1000;

/// Encoding of the samples a wave-buffer points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    Invalid,
    Pcm8,
    Pcm16,
    Pcm32,
    PcmFloat,
    Adpcm,
}

impl SampleFormat {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SampleFormat::Pcm8,
            2 => SampleFormat::Pcm16,
            4 => SampleFormat::Pcm32,
            5 => SampleFormat::PcmFloat,
            6 => SampleFormat::Adpcm,
            _ => SampleFormat::Invalid,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            SampleFormat::Invalid => 0,
            SampleFormat::Pcm8 => 1,
            SampleFormat::Pcm16 => 2,
            SampleFormat::Pcm32 => 4,
            SampleFormat::PcmFloat => 5,
            SampleFormat::Adpcm => 6,
        }
    }

    /// Bytes per sample for the PCM formats (ADPCM packs 14 samples in 8 bytes)
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm8 => 1,
            SampleFormat::Pcm16 => 2,
            SampleFormat::Pcm32 | SampleFormat::PcmFloat => 4,
            SampleFormat::Adpcm | SampleFormat::Invalid => 0,
        }
    }

    /// Number of samples per channel a buffer of `size` bytes can hold
    pub fn samples_in(self, size: u64, channel_count: usize) -> u64 {
        match self {
            SampleFormat::Adpcm => (size / 8) * 14 + (size % 8).saturating_sub(1) * 2,
            SampleFormat::Invalid => 0,
            other => size / (other.bytes_per_sample() * channel_count.max(1)) as u64,
        }
    }
}

/// Play state requested by the guest for a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    Play,
    #[default]
    Stop,
    /// Transitional: DSP state is cleared at the end of the frame, then `Stop`
    RequestStop,
    Paused,
}

impl PlayState {
    /// Decode the guest-facing play state (0 = play, 1 = stop, 2 = pause)
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => PlayState::Play,
            2 => PlayState::Paused,
            _ => PlayState::Stop,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            PlayState::Play => 0,
            PlayState::Stop | PlayState::RequestStop => 1,
            PlayState::Paused => 2,
        }
    }
}

/// Stream layout requested from the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Mono16,
    Stereo16,
    Multi51Channel16,
}

impl StreamFormat {
    /// Pick the layout for a channel count, falling back to stereo
    pub fn from_channels(channels: usize) -> Self {
        match channels {
            1 => StreamFormat::Mono16,
            6 => StreamFormat::Multi51Channel16,
            _ => StreamFormat::Stereo16,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            StreamFormat::Mono16 => 1,
            StreamFormat::Stereo16 => 2,
            StreamFormat::Multi51Channel16 => 6,
        }
    }
}

/// Clamp a 32-bit intermediate to the signed 16-bit range
#[inline]
pub fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
