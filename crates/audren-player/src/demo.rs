//! Demo scene: a looping tone through a sub-mix into a reverberant final mix
//!
//! Everything the renderer reads lives in an in-process guest memory window,
//! and the scene is submitted the same way a guest would: as an update blob.

use std::sync::Arc;

use audren_core::config::RendererParams;
use audren_core::effect::EffectType;
use audren_core::memory::{HostMemory, VecMemory};
use audren_core::memory_pool::MemoryPoolState;
use audren_core::protocol::{
    EffectInParams, I3dl2ReverbParams, MemoryPoolInParams, UpdateRequest, SINK_TYPE_DEVICE,
    VOICE_FLAG_PITCH_AND_SRC_SKIPPED,
};
use audren_core::{PlayState, SampleFormat, FINAL_MIX, NO_MIX, NO_SPLITTER, PAGE_SIZE};

/// Guest address of the tone's wave data
pub const TONE_ADDRESS: u64 = 0x10_0000;

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 12000.0;
const SUB_MIX: usize = 1;

fn page_align(size: u64) -> u64 {
    size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

pub struct DemoScene {
    memory: Arc<VecMemory>,
    request: UpdateRequest,
}

impl DemoScene {
    /// One second of a sine tone at the renderer rate, looped forever
    pub fn new(params: &RendererParams) -> Self {
        let samples: Vec<i16> = (0..params.sample_rate)
            .map(|n| {
                let phase = 2.0 * std::f32::consts::PI * TONE_HZ * n as f32 / params.sample_rate as f32;
                (phase.sin() * TONE_AMPLITUDE) as i16
            })
            .collect();
        let wave_bytes: &[u8] = bytemuck::cast_slice(&samples);
        let pool_size = page_align(wave_bytes.len() as u64);

        let memory = VecMemory::new(TONE_ADDRESS, pool_size as usize);
        if !memory.write(TONE_ADDRESS, wave_bytes) {
            log::warn!("Demo tone did not fit its memory window");
        }

        let mut request = UpdateRequest::new(params);
        request.memory_pools[0] = MemoryPoolInParams {
            address: TONE_ADDRESS,
            size: pool_size,
            state: MemoryPoolState::RequestAttach.to_raw(),
            ..Default::default()
        };

        // Final mix: stereo, reverb in place
        let final_mix = &mut request.mixes_mut()[FINAL_MIX as usize];
        final_mix.in_use = 1;
        final_mix.volume = 1.0;
        final_mix.sample_rate = params.sample_rate;
        final_mix.buffer_count = 2;
        final_mix.effect_count = 1;
        final_mix.dest_mix_id = NO_MIX;
        final_mix.splitter_id = NO_SPLITTER;

        // Sub-mix: stereo, straight into the final mix
        let sub_mix = &mut request.mixes_mut()[SUB_MIX];
        sub_mix.in_use = 1;
        sub_mix.volume = 1.0;
        sub_mix.sample_rate = params.sample_rate;
        sub_mix.buffer_count = 2;
        sub_mix.dest_mix_id = FINAL_MIX;
        sub_mix.splitter_id = NO_SPLITTER;
        sub_mix.mix_volume[0][0] = 1.0;
        sub_mix.mix_volume[1][1] = 1.0;

        let mut reverb = I3dl2ReverbParams {
            channel_count: 2,
            max_channels: 2,
            sample_rate: params.sample_rate,
            room_hf: -100.0,
            hf_reference: 5000.0,
            decay_time: 1.49,
            hf_decay_ratio: 0.83,
            room: -1000.0,
            reflection: -2602.0,
            reverb: 200.0,
            diffusion: 100.0,
            reflection_delay: 0.007,
            reverb_delay: 0.011,
            density: 100.0,
            dry_gain: 1.0,
            ..Default::default()
        };
        reverb.input[1] = 1;
        reverb.output[1] = 1;
        let mut effect = EffectInParams {
            effect_type: EffectType::I3dl2Reverb.to_raw(),
            is_new: 1,
            enabled: 1,
            mix_id: FINAL_MIX,
            processing_order: 0,
            ..Default::default()
        };
        effect.set_params(&reverb);
        request.effects[0] = effect;

        let resource = &mut request.voice_channel_resources[0];
        resource.in_use = 1;
        resource.mix_volume[0] = 0.7;
        resource.mix_volume[1] = 0.7;

        let voice = &mut request.voices[0];
        voice.in_use = 1;
        voice.is_new = 1;
        voice.play_state = PlayState::Play.to_raw();
        voice.sample_format = SampleFormat::Pcm16.to_raw();
        voice.sample_rate = params.sample_rate;
        voice.channel_count = 1;
        voice.pitch = 1.0;
        voice.volume = 1.0;
        voice.last_volume = 0.0;
        voice.mix_id = SUB_MIX as i32;
        voice.splitter_info_id = NO_SPLITTER;
        voice.behavior_flags = VOICE_FLAG_PITCH_AND_SRC_SKIPPED;
        voice.wave_buffer_count = 1;
        let wave = &mut voice.wave_buffers[0];
        wave.address = TONE_ADDRESS;
        wave.size = wave_bytes.len() as u64;
        wave.end_sample_offset = samples.len() as i32;
        wave.is_looping = 1;

        let sink = &mut request.sinks[0];
        sink.sink_type = SINK_TYPE_DEVICE;
        sink.in_use = 1;
        sink.input_count = 2;
        sink.input[1] = 1;

        Self {
            memory: Arc::new(memory),
            request,
        }
    }

    /// Guest memory the renderer reads the scene from
    pub fn memory(&self) -> Arc<dyn HostMemory> {
        self.memory.clone()
    }

    /// Blob that starts the scene
    pub fn start_update(&self) -> Vec<u8> {
        self.request.encode()
    }

    /// Blob that stops the tone; the reverb tail keeps ringing
    pub fn stop_update(&mut self) -> Vec<u8> {
        let voice = &mut self.request.voices[0];
        voice.is_new = 0;
        voice.play_state = PlayState::Stop.to_raw();
        voice.wave_buffers[0].sent_to_server = 1;
        self.request.effects[0].is_new = 0;
        self.request.encode()
    }
}
