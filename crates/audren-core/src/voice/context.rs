use super::{VoiceChannelResource, VoiceInfo, VoiceState};
use crate::types::{PlayState, MAX_WAVE_BUFFERS};

/// Voice table, channel resources and their DSP states
///
/// DSP states are indexed by channel resource id, so a voice owns one state per
/// channel through its `channel_resource_ids`.
#[derive(Debug, Clone)]
pub struct VoiceContext {
    pub(crate) voices: Vec<VoiceInfo>,
    pub(crate) channel_resources: Vec<VoiceChannelResource>,
    pub(crate) states: Vec<VoiceState>,
    sorted: Vec<usize>,
}

impl VoiceContext {
    pub fn new(count: usize) -> Self {
        Self {
            voices: vec![VoiceInfo::default(); count],
            channel_resources: vec![VoiceChannelResource::default(); count],
            states: vec![VoiceState::default(); count],
            sorted: Vec::with_capacity(count),
        }
    }

    pub fn count(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, index: usize) -> Option<&VoiceInfo> {
        self.voices.get(index)
    }

    pub fn voice_mut(&mut self, index: usize) -> Option<&mut VoiceInfo> {
        self.voices.get_mut(index)
    }

    pub fn channel_resource(&self, id: usize) -> Option<&VoiceChannelResource> {
        self.channel_resources.get(id)
    }

    pub fn channel_resource_mut(&mut self, id: usize) -> Option<&mut VoiceChannelResource> {
        self.channel_resources.get_mut(id)
    }

    pub fn state(&self, id: usize) -> Option<&VoiceState> {
        self.states.get(id)
    }

    /// Whether every channel of the voice names a valid resource
    pub fn has_valid_channels(&self, voice: &VoiceInfo) -> bool {
        voice.channel_resources().all(|id| id < self.states.len())
    }

    /// Zero the DSP state of every channel of a voice
    pub fn reset_states(&mut self, index: usize) {
        let Some(voice) = self.voices.get(index) else {
            return;
        };
        for id in voice.channel_resources() {
            if let Some(state) = self.states.get_mut(id) {
                *state = VoiceState::default();
            }
        }
    }

    /// Order in-use voices by priority, then sorting order, both descending
    pub fn sort(&mut self) {
        self.sorted.clear();
        self.sorted
            .extend((0..self.voices.len()).filter(|&i| self.voices[i].in_use));
        let voices = &self.voices;
        self.sorted.sort_by(|&a, &b| {
            voices[b]
                .priority
                .cmp(&voices[a].priority)
                .then(voices[b].sorting_order.cmp(&voices[a].sorting_order))
        });
    }

    /// Voice indices in processing order, valid after [`VoiceContext::sort`]
    pub fn sorted(&self) -> &[usize] {
        &self.sorted
    }

    /// Hand newly received wave-buffers to the DSP and apply pending flushes
    ///
    /// Runs once per frame before any voice is decoded.
    pub fn update_for_command_generation(&mut self) {
        for voice in self.voices.iter_mut().filter(|voice| voice.in_use) {
            let ids: Vec<usize> = voice.channel_resources().collect();

            let flush = std::mem::take(&mut voice.flush_wave_buffer_count);
            for &id in &ids {
                let Some(state) = self.states.get_mut(id) else {
                    continue;
                };
                for _ in 0..flush {
                    let index = state.wave_buffer_index;
                    let end_of_stream = voice.wave_buffers[index].end_of_stream;
                    state.finish_wave_buffer(end_of_stream);
                }
            }

            for (index, buffer) in voice.wave_buffers.iter_mut().enumerate() {
                if buffer.sent_to_dsp {
                    continue;
                }
                for &id in &ids {
                    if let Some(state) = self.states.get_mut(id) {
                        state.is_wave_buffer_valid[index % MAX_WAVE_BUFFERS] = true;
                    }
                }
                buffer.sent_to_dsp = true;
            }

            if !ids.iter().all(|&id| id < self.states.len()) {
                if !voice.voice_drop_flag {
                    log::warn!("Voice {} names an invalid channel resource, dropping", voice.id);
                }
                voice.voice_drop_flag = true;
            }
        }
    }

    /// End-of-frame bookkeeping
    ///
    /// Commits the voice volume, clears the depop latch and finishes pending
    /// stops by zeroing the DSP state.
    pub fn end_frame(&mut self) {
        for index in 0..self.voices.len() {
            let voice = &mut self.voices[index];
            if !voice.in_use {
                continue;
            }
            voice.last_volume = voice.volume;
            voice.should_depop = false;
            for filter in 0..voice.biquads.len() {
                voice.was_biquad_enabled[filter] = voice.biquads[filter].enabled;
            }
            if voice.play_state == PlayState::RequestStop {
                voice.play_state = PlayState::Stop;
                for buffer in voice.wave_buffers.iter_mut() {
                    buffer.sent_to_dsp = true;
                }
                self.reset_states(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::WaveBuffer;

    fn in_use_voice(priority: i32, sorting_order: i32) -> VoiceInfo {
        VoiceInfo {
            in_use: true,
            priority,
            sorting_order,
            channel_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_sort_by_priority_then_order() {
        let mut context = VoiceContext::new(4);
        context.voices[0] = in_use_voice(1, 0);
        context.voices[1] = in_use_voice(5, 1);
        context.voices[2] = in_use_voice(5, 7);
        context.sort();
        assert_eq!(context.sorted(), &[2, 1, 0]);
    }

    #[test]
    fn test_new_wave_buffers_become_valid() {
        let mut context = VoiceContext::new(2);
        let mut voice = in_use_voice(0, 0);
        voice.channel_resource_ids[0] = 1;
        voice.wave_buffers[2] = WaveBuffer {
            size: 16,
            ..Default::default()
        };
        for (index, buffer) in voice.wave_buffers.iter_mut().enumerate() {
            buffer.sent_to_dsp = index != 2;
        }
        context.voices[0] = voice;

        context.update_for_command_generation();
        assert_eq!(context.states[1].is_wave_buffer_valid, [false, false, true, false]);
        assert!(context.voices[0].wave_buffers[2].sent_to_dsp);
    }

    #[test]
    fn test_flush_advances_without_decoding() {
        let mut context = VoiceContext::new(1);
        let mut voice = in_use_voice(0, 0);
        voice.flush_wave_buffer_count = 2;
        for buffer in voice.wave_buffers.iter_mut() {
            buffer.sent_to_dsp = true;
        }
        context.voices[0] = voice;
        context.states[0].is_wave_buffer_valid = [true; MAX_WAVE_BUFFERS];

        context.update_for_command_generation();
        let state = &context.states[0];
        assert_eq!(state.wave_buffer_index, 2);
        assert_eq!(state.wave_buffer_consumed, 2);
        assert_eq!(state.is_wave_buffer_valid, [false, false, true, true]);
        assert_eq!(context.voices[0].flush_wave_buffer_count, 0);
    }

    #[test]
    fn test_request_stop_clears_state_at_end_of_frame() {
        let mut context = VoiceContext::new(1);
        let mut voice = in_use_voice(0, 0);
        voice.play_state = PlayState::RequestStop;
        voice.should_depop = true;
        context.voices[0] = voice;
        context.states[0].played_samples = 480;

        context.end_frame();
        assert_eq!(context.voices[0].play_state, PlayState::Stop);
        assert!(!context.voices[0].should_depop);
        assert_eq!(context.states[0], VoiceState::default());
    }

    #[test]
    fn test_invalid_channel_resource_drops_voice() {
        let mut context = VoiceContext::new(1);
        let mut voice = in_use_voice(0, 0);
        voice.channel_resource_ids[0] = 3;
        context.voices[0] = voice;

        context.update_for_command_generation();
        assert!(context.voices[0].voice_drop_flag);
        assert!(!context.voices[0].should_render());
    }
}
