//! Command generator
//!
//! Renders one audio frame from the renderer contexts: voices are decoded,
//! filtered and ramped into per-channel scratch buffers, routed into mixes,
//! sub-mixes run their effects and feed their destinations in sorted order,
//! and the final mix is adapted to the stream layout as interleaved PCM16.
//!
//! The mix-buffer pool holds `mix_buffer_count` mix buffers followed by one
//! scratch buffer per voice channel. The depop buffer carries decay tails
//! across frames and is never cleared.

mod buffers;

pub use buffers::MixBufferPool;

use crate::dsp::channels::adapt_channels;
use crate::dsp::mix::{apply_depop, apply_gain, apply_mix, apply_mix_ramp, apply_volume_ramp, depop_delta};
use crate::effect::{EffectContext, ProcessContext};
use crate::memory::HostMemory;
use crate::mix::{MixContext, MixInfo};
use crate::sink::SinkContext;
use crate::splitter::SplitterContext;
use crate::types::{
    PlayState, FINAL_MIX, MAX_CHANNEL_COUNT, MAX_MIX_BUFFERS, NO_EFFECT_ORDER, NO_MIX, NO_SPLITTER,
    SAMPLE_BUFFER_SIZE,
};
use crate::voice::decode::decode_for;
use crate::voice::{VoiceContext, VoiceInfo, VoiceState};

/// Contexts a frame reads and advances
pub struct FrameContexts<'a> {
    pub voices: &'a mut VoiceContext,
    pub mixes: &'a MixContext,
    pub effects: &'a mut EffectContext,
    pub splitters: &'a mut SplitterContext,
    pub sinks: &'a SinkContext,
    pub memory: &'a dyn HostMemory,
}

/// One destination of a voice channel
struct VoiceRoute {
    offset: usize,
    count: usize,
    volumes: [f32; MAX_MIX_BUFFERS],
    last_volumes: [f32; MAX_MIX_BUFFERS],
    /// Splitter destination to mark dirty after mixing
    destination: Option<usize>,
}

/// Direct mix or splitter destinations of one voice channel
fn voice_routes(
    voice: &VoiceInfo,
    channel: usize,
    volumes: &[f32; MAX_MIX_BUFFERS],
    last_volumes: &[f32; MAX_MIX_BUFFERS],
    mixes: &MixContext,
    splitters: &SplitterContext,
) -> Vec<VoiceRoute> {
    let mut routes = Vec::new();
    if voice.mix_id != NO_MIX {
        if let Some(mix) = mixes.info(voice.mix_id).filter(|mix| mix.in_use) {
            routes.push(VoiceRoute {
                offset: mix.buffer_offset,
                count: mix.buffer_count,
                volumes: *volumes,
                last_volumes: *last_volumes,
                destination: None,
            });
        }
    } else if voice.splitter_info_id != NO_SPLITTER {
        let stride = voice.channel_count.max(1);
        let mut n = channel;
        while let Some(index) = splitters.destination_index(voice.splitter_info_id, n) {
            n += stride;
            let Some(destination) = splitters.destination(index).filter(|d| d.is_configured()) else {
                continue;
            };
            if let Some(mix) = mixes.info(destination.mix_id).filter(|mix| mix.in_use) {
                routes.push(VoiceRoute {
                    offset: mix.buffer_offset,
                    count: mix.buffer_count,
                    volumes: destination.mix_volumes,
                    last_volumes: destination.last_mix_volumes,
                    destination: Some(index),
                });
            }
        }
    }
    routes
}

pub struct CommandGenerator {
    pool: MixBufferPool,
    depop: Vec<i32>,
    scratch: Vec<i32>,
    silence: Vec<i32>,
    mix_buffer_count: usize,
    sample_rate: u32,
    trace: bool,
}

impl CommandGenerator {
    pub fn new(mix_buffer_count: usize, sample_count: usize, sample_rate: u32) -> Self {
        let buffer_count = mix_buffer_count + MAX_CHANNEL_COUNT;
        Self {
            pool: MixBufferPool::new(buffer_count, sample_count),
            depop: vec![0; buffer_count],
            scratch: vec![0; SAMPLE_BUFFER_SIZE],
            silence: vec![0; sample_count],
            mix_buffer_count,
            sample_rate,
            trace: false,
        }
    }

    /// Log the mix graph and every routing decision at trace level
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn pool(&self) -> &MixBufferPool {
        &self.pool
    }

    pub fn depop(&self) -> &[i32] {
        &self.depop
    }

    pub fn sample_count(&self) -> usize {
        self.pool.sample_count()
    }

    /// Render one frame into `out` (`sample_count × channels` interleaved)
    pub fn generate(&mut self, contexts: FrameContexts<'_>, channels: usize, out: &mut [i16]) {
        let FrameContexts {
            voices,
            mixes,
            effects,
            splitters,
            sinks,
            memory,
        } = contexts;

        if self.trace {
            splitters.log_graph();
            mixes.log_graph();
        }

        voices.update_for_command_generation();
        voices.sort();
        effects.update_for_command_generation();

        self.pool.clear();
        self.scratch.fill(0);

        self.process_voices(voices, mixes, splitters, memory);
        splitters.update_internal_state();

        let process_context = ProcessContext {
            sample_rate: self.sample_rate,
            sample_count: self.pool.sample_count(),
            memory,
        };
        for &index in mixes.sorted() {
            let mix = &mixes.infos()[index];
            if !mix.in_use || mix.is_final() {
                continue;
            }
            self.apply_mix_depop(mix);
            self.process_effects(mix, effects, &process_context);
            self.route_sub_mix(mix, mixes, splitters);
        }

        if let Some(final_mix) = mixes.info(FINAL_MIX).filter(|mix| mix.in_use) {
            self.apply_mix_depop(final_mix);
            self.process_effects(final_mix, effects, &process_context);
            for buffer in final_mix.buffers() {
                if let Some(samples) = self.pool.get_mut(buffer) {
                    apply_gain(samples, final_mix.volume);
                }
            }
        }

        self.adapt_output(mixes, sinks, channels, out);
        voices.end_frame();
    }

    fn process_voices(
        &mut self,
        context: &mut VoiceContext,
        mixes: &MixContext,
        splitters: &mut SplitterContext,
        memory: &dyn HostMemory,
    ) {
        let order = context.sorted().to_vec();
        let VoiceContext {
            voices,
            channel_resources,
            states,
            ..
        } = context;

        for index in order {
            let voice = &voices[index];
            if !voice.should_render() {
                continue;
            }
            for channel in 0..voice.channel_count {
                let Some(id) = usize::try_from(voice.channel_resource_ids[channel])
                    .ok()
                    .filter(|&id| id < states.len() && id < channel_resources.len())
                else {
                    continue;
                };
                let resource = &mut channel_resources[id];
                let routes = voice_routes(
                    voice,
                    channel,
                    &resource.mix_volume,
                    &resource.last_mix_volume,
                    mixes,
                    splitters,
                );
                let state = &mut states[id];

                if voice.should_depop {
                    self.prepare_depop(state, &routes);
                }
                if voice.play_state == PlayState::Play {
                    self.render_voice_channel(voice, state, channel, memory, &routes);
                    for route in routes.iter().filter_map(|route| route.destination) {
                        splitters.mark_dirty(route);
                    }
                }
                resource.commit_mix_volumes();
            }
        }
    }

    /// Move the last contributions of a stopping voice into the depop buffer
    fn prepare_depop(&mut self, state: &mut VoiceState, routes: &[VoiceRoute]) {
        for route in routes {
            for (i, &sample) in state.previous_samples[..route.count].iter().enumerate() {
                if sample != 0 {
                    if let Some(cell) = self.depop.get_mut(route.offset + i) {
                        *cell = cell.wrapping_add(sample);
                    }
                }
            }
        }
        state.previous_samples = [0; MAX_MIX_BUFFERS];
    }

    fn render_voice_channel(
        &mut self,
        voice: &VoiceInfo,
        state: &mut VoiceState,
        channel: usize,
        memory: &dyn HostMemory,
        routes: &[VoiceRoute],
    ) {
        let voice_buffer = self.mix_buffer_count + channel;
        let Some(samples) = self.pool.get_mut(voice_buffer) else {
            return;
        };

        decode_for(voice, state, channel, memory, self.sample_rate, &mut self.scratch, samples);

        for (filter, biquad) in voice.biquads.iter().enumerate() {
            if !biquad.enabled {
                continue;
            }
            if !voice.was_biquad_enabled[filter] {
                state.biquad_states[filter].reset();
            }
            state.biquad_states[filter].process_block(&biquad.coefficients, samples);
        }

        apply_volume_ramp(samples, voice.last_volume, voice.volume);

        for route in routes {
            if self.trace {
                log::trace!(
                    "voice {} channel {} -> buffers {}..{}",
                    voice.id,
                    channel,
                    route.offset,
                    route.offset + route.count
                );
            }
            for i in 0..route.count {
                let (volume, last) = (route.volumes[i], route.last_volumes[i]);
                if volume == 0.0 && last == 0.0 {
                    state.previous_samples[i] = 0;
                    continue;
                }
                if let Some((source, destination)) = self.pool.pair_mut(voice_buffer, route.offset + i) {
                    state.previous_samples[i] = apply_mix_ramp(destination, source, last, volume);
                }
            }
        }
    }

    fn apply_mix_depop(&mut self, mix: &MixInfo) {
        let delta = depop_delta(self.sample_rate);
        for buffer in mix.buffers() {
            let Some(&seed) = self.depop.get(buffer) else {
                continue;
            };
            if seed == 0 {
                continue;
            }
            if let Some(samples) = self.pool.get_mut(buffer) {
                self.depop[buffer] = apply_depop(samples, seed, delta);
            }
        }
    }

    fn process_effects(&mut self, mix: &MixInfo, effects: &mut EffectContext, context: &ProcessContext<'_>) {
        for &slot in &mix.effect_processing_order {
            if slot == NO_EFFECT_ORDER {
                continue;
            }
            let Some(effect) = usize::try_from(slot).ok().and_then(|slot| effects.info_mut(slot)) else {
                continue;
            };
            if self.trace {
                log::trace!("mix {} effect {} ({:?})", mix.mix_id, slot, effect.effect_type());
            }
            effect.process(&mut self.pool, mix.buffer_offset, context);
        }
    }

    fn route_sub_mix(&mut self, mix: &MixInfo, mixes: &MixContext, splitters: &SplitterContext) {
        if mix.dest_mix_id != NO_MIX {
            let Some(destination) = mixes.info(mix.dest_mix_id).filter(|mix| mix.in_use) else {
                return;
            };
            for i in 0..mix.buffer_count {
                for j in 0..destination.buffer_count {
                    let volume = mix.volume * mix.mix_volume[i][j];
                    self.mix_buffer(mix.buffer_offset + i, destination.buffer_offset + j, volume);
                }
            }
        } else if mix.splitter_id != NO_SPLITTER {
            for i in 0..mix.buffer_count {
                let Some(index) = splitters.destination_index(mix.splitter_id, i) else {
                    break;
                };
                let Some(destination) = splitters.destination(index).filter(|d| d.is_configured()) else {
                    continue;
                };
                let Some(target) = mixes.info(destination.mix_id).filter(|mix| mix.in_use) else {
                    continue;
                };
                for j in 0..target.buffer_count {
                    let volume = mix.volume * destination.mix_volumes[j];
                    self.mix_buffer(mix.buffer_offset + i, target.buffer_offset + j, volume);
                }
            }
        }
    }

    fn mix_buffer(&mut self, input: usize, output: usize, volume: f32) {
        if volume == 0.0 {
            return;
        }
        if self.trace {
            log::trace!("mix buffer {} -> {} x{}", input, output, volume);
        }
        if let Some((source, destination)) = self.pool.pair_mut(input, output) {
            apply_mix(destination, source, volume);
        }
    }

    /// Clamp and interleave the sink's final-mix buffers
    fn adapt_output(&self, mixes: &MixContext, sinks: &SinkContext, channels: usize, out: &mut [i16]) {
        let (Some(device), Some(final_mix)) = (sinks.device(), mixes.final_mix()) else {
            out.fill(0);
            return;
        };
        let inputs: Vec<&[i32]> = device
            .buffer_indices(final_mix.buffer_offset)
            .map(|index| index.and_then(|index| self.pool.get(index)).unwrap_or(self.silence.as_slice()))
            .collect();
        if inputs.is_empty() {
            out.fill(0);
            return;
        }
        adapt_channels(&inputs, channels, &device.downmix_coefficients, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemory;
    use crate::protocol::{MixInParams, SinkInParams, SINK_TYPE_DEVICE};
    use crate::types::SampleFormat;
    use crate::voice::WaveBuffer;

    const SAMPLES: usize = 240;
    const WAVE_ADDRESS: u64 = 0x10000;

    struct Fixture {
        voices: VoiceContext,
        mixes: MixContext,
        effects: EffectContext,
        splitters: SplitterContext,
        sinks: SinkContext,
        memory: VecMemory,
        generator: CommandGenerator,
    }

    impl Fixture {
        fn new(sample_value: i16) -> Self {
            let memory = VecMemory::new(WAVE_ADDRESS, SAMPLES * 2);
            let samples = vec![sample_value; SAMPLES];
            assert!(memory.write(WAVE_ADDRESS, bytemuck::cast_slice(&samples)));

            let mut mixes = MixContext::new(1, 1);
            mixes.info_mut(FINAL_MIX).unwrap().update(&MixInParams {
                in_use: 1,
                buffer_count: 2,
                volume: 1.0,
                sample_rate: 48000,
                ..Default::default()
            });
            mixes.sort_info();
            mixes.assign_buffer_offsets(MAX_MIX_BUFFERS);

            let mut sinks = SinkContext::new(1);
            let mut sink = SinkInParams {
                sink_type: SINK_TYPE_DEVICE,
                in_use: 1,
                input_count: 2,
                ..Default::default()
            };
            sink.input[1] = 1;
            sinks.info_mut(0).unwrap().update(&sink);

            let mut voices = VoiceContext::new(1);
            let voice = &mut voices.voices[0];
            voice.in_use = true;
            voice.play_state = PlayState::Play;
            voice.sample_format = SampleFormat::Pcm16;
            voice.sample_rate = 48000;
            voice.channel_count = 1;
            voice.pitch = 1.0;
            voice.volume = 1.0;
            voice.last_volume = 1.0;
            voice.mix_id = FINAL_MIX;
            voice.splitter_info_id = NO_SPLITTER;
            voice.pitch_and_src_skipped = true;
            voice.wave_buffers[0] = WaveBuffer {
                address: WAVE_ADDRESS,
                size: (SAMPLES * 2) as u64,
                end_sample_offset: SAMPLES as i32,
                ..Default::default()
            };
            let resource = &mut voices.channel_resources[0];
            resource.in_use = true;
            resource.mix_volume[..2].fill(1.0);
            resource.last_mix_volume[..2].fill(1.0);

            Self {
                voices,
                mixes,
                effects: EffectContext::new(1),
                splitters: SplitterContext::new(0, 0),
                sinks,
                memory,
                generator: CommandGenerator::new(MAX_MIX_BUFFERS, SAMPLES, 48000),
            }
        }

        fn render(&mut self) -> Vec<i16> {
            let mut out = vec![0i16; SAMPLES * 2];
            let contexts = FrameContexts {
                voices: &mut self.voices,
                mixes: &self.mixes,
                effects: &mut self.effects,
                splitters: &mut self.splitters,
                sinks: &self.sinks,
                memory: &self.memory,
            };
            self.generator.generate(contexts, 2, &mut out);
            out
        }
    }

    #[test]
    fn test_stopped_voice_is_silent() {
        let mut fixture = Fixture::new(1000);
        fixture.voices.voices[0].play_state = PlayState::Stop;
        assert!(fixture.render().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_direct_route_to_final_mix() {
        let mut fixture = Fixture::new(1000);
        let out = fixture.render();
        assert!(out.iter().all(|&s| s == 1000));
        let state = fixture.voices.state(0).unwrap();
        assert_eq!(state.played_samples, SAMPLES as u64);
        assert_eq!(state.previous_samples[0], 1000);
    }

    #[test]
    fn test_no_device_sink_outputs_silence() {
        let mut fixture = Fixture::new(1000);
        fixture.sinks = SinkContext::new(1);
        assert!(fixture.render().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stop_emits_decaying_depop_tail() {
        let mut fixture = Fixture::new(1000);
        fixture.render();

        fixture.voices.voices[0].update_play_state(PlayState::Stop);
        assert_eq!(fixture.voices.voices[0].play_state, PlayState::RequestStop);
        let out = fixture.render();

        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        assert_eq!(left[0], ((1000i64 * 0x7B29) >> 15) as i16);
        for pair in left.windows(2) {
            if pair[0] > 0 {
                assert!(pair[1] < pair[0]);
            }
        }
        assert_eq!(fixture.voices.voices[0].play_state, PlayState::Stop);
        assert_eq!(fixture.voices.state(0).unwrap().played_samples, 0);
    }

    #[test]
    fn test_sub_mix_routes_into_final_mix() {
        let mut fixture = Fixture::new(500);
        let mut mixes = MixContext::new(2, 1);
        mixes.info_mut(FINAL_MIX).unwrap().update(&MixInParams {
            in_use: 1,
            buffer_count: 2,
            volume: 1.0,
            ..Default::default()
        });
        let mut sub = MixInParams {
            in_use: 1,
            buffer_count: 1,
            volume: 1.0,
            dest_mix_id: FINAL_MIX,
            ..Default::default()
        };
        sub.mix_volume[0][0] = 1.0;
        sub.mix_volume[0][1] = 2.0;
        mixes.info_mut(1).unwrap().update(&sub);
        mixes.sort_info();
        mixes.assign_buffer_offsets(MAX_MIX_BUFFERS);
        fixture.mixes = mixes;
        fixture.voices.voices[0].mix_id = 1;

        let out = fixture.render();
        assert_eq!(&out[..4], &[500, 1000, 500, 1000]);
    }
}
