//! Buffer mixer: accumulate scaled inputs into outputs

use crate::command::MixBufferPool;
use crate::dsp::mix::apply_mix;
use crate::protocol::BufferMixerParams;
use crate::types::MAX_MIX_BUFFERS;

#[derive(Debug, Clone, Default)]
pub struct BufferMixerEffect {
    params: BufferMixerParams,
}

impl BufferMixerEffect {
    pub fn update(&mut self, params: &BufferMixerParams) {
        self.params = *params;
    }

    /// `out[i] += in[i] * volume[i]`; disabled mixers leave the buffers alone
    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool) {
        if !enabled {
            return;
        }
        let count = (self.params.count as usize).min(MAX_MIX_BUFFERS);
        for i in 0..count {
            let (Ok(input), Ok(output)) = (
                usize::try_from(self.params.input[i]),
                usize::try_from(self.params.output[i]),
            ) else {
                continue;
            };
            let volume = self.params.volume[i];
            if input == output {
                if let Some(buffer) = pool.get_mut(base + input) {
                    let source = buffer.to_vec();
                    apply_mix(buffer, &source, volume);
                }
            } else if let Some((source, destination)) = pool.pair_mut(base + input, base + output) {
                apply_mix(destination, source, volume);
            }
        }
    }
}
