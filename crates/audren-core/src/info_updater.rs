//! Binary update protocol: one pass per section
//!
//! An [`InfoUpdater`] walks one request blob with a bounds-checked reader and
//! fills one response blob with a bounds-checked writer. Each `update_*`
//! method consumes exactly the bytes its section declares in the request
//! header and appends its output records; any size, magic or range violation
//! aborts the whole update with `InvalidParameters`.

use crate::behavior::{revision_digit, BehaviorInfo};
use crate::config::RendererParams;
use crate::effect::EffectContext;
use crate::error::{RendererError, RendererResult};
use crate::memory::HostMemory;
use crate::memory_pool::MemoryPoolInfo;
use crate::mix::MixContext;
use crate::protocol::{
    align_up, BehaviorInParams, EffectInParams, EffectOutParams, ErrorInfoOutParams, MemoryPoolInParams,
    MemoryPoolOutParams, MixDirtyHeader, MixInParams, PerformanceOutParams, RendererInfoOutParams,
    SectionReader, SectionSizes, SectionWriter, SinkInParams, SinkOutParams, UpdateDataHeader,
    VoiceChannelResourceInParams, VoiceInParams, VoiceOutParams, HEADER_SIZE,
};
use crate::sink::SinkContext;
use crate::splitter::SplitterContext;
use crate::types::NO_MIX;
use crate::voice::VoiceContext;

const fn record_size<T>() -> usize {
    std::mem::size_of::<T>()
}

/// Exact size of the response for a renderer built from `params`
pub fn output_buffer_size(params: &RendererParams) -> usize {
    let mut size = HEADER_SIZE
        + params.memory_pool_count() as usize * record_size::<MemoryPoolOutParams>()
        + params.voice_count as usize * record_size::<VoiceOutParams>()
        + params.effect_count as usize * record_size::<EffectOutParams>()
        + params.sink_count as usize * record_size::<SinkOutParams>()
        + record_size::<PerformanceOutParams>()
        + record_size::<ErrorInfoOutParams>();
    if BehaviorInfo::new(params.revision).is_elapsed_frame_count_supported() {
        size += record_size::<RendererInfoOutParams>();
    }
    size
}

/// Reject a section whose declared size is not `count` records
fn expect_size(section: &str, declared: u32, count: usize, record: usize) -> RendererResult<()> {
    let expected = count * record;
    if declared as usize != expected {
        return Err(RendererError::invalid(format!(
            "{} section is {:#x} bytes, expected {:#x}",
            section, declared, expected
        )));
    }
    Ok(())
}

pub struct InfoUpdater<'a> {
    input: SectionReader<'a>,
    output: SectionWriter<'a>,
    sizes: SectionSizes,
    out_sizes: SectionSizes,
    revision: u32,
    sample_rate: u32,
    mix_buffer_count: usize,
}

impl<'a> InfoUpdater<'a> {
    /// Validate the request header and position both cursors after it
    pub fn new(input: &'a [u8], output: &'a mut [u8], params: &RendererParams) -> RendererResult<Self> {
        let mut reader = SectionReader::new(input, 0);
        let header: UpdateDataHeader = reader.read()?;
        if revision_digit(header.revision) != Some(params.revision) {
            return Err(RendererError::invalid(format!(
                "request revision {:#010x} does not match REV{}",
                header.revision, params.revision
            )));
        }
        if header.total_size as usize > input.len() {
            return Err(RendererError::invalid(format!(
                "request declares {:#x} bytes but holds {:#x}",
                header.total_size,
                input.len()
            )));
        }
        if output.len() < HEADER_SIZE {
            return Err(RendererError::invalid("response buffer smaller than its header"));
        }
        Ok(Self {
            input: reader,
            output: SectionWriter::new(output, HEADER_SIZE),
            sizes: header.sizes,
            out_sizes: SectionSizes::default(),
            revision: header.revision,
            sample_rate: params.sample_rate,
            mix_buffer_count: params.mix_buffer_count as usize,
        })
    }

    pub fn update_behavior(&mut self, behavior: &mut BehaviorInfo) -> RendererResult<()> {
        expect_size("behavior", self.sizes.behavior, 1, record_size::<BehaviorInParams>())?;
        let params: BehaviorInParams = self.input.read()?;
        behavior.update(&params)
    }

    pub fn update_memory_pools(&mut self, pools: &mut [MemoryPoolInfo]) -> RendererResult<()> {
        expect_size(
            "memory pool",
            self.sizes.memory_pool,
            pools.len(),
            record_size::<MemoryPoolInParams>(),
        )?;
        for pool in pools.iter_mut() {
            let params: MemoryPoolInParams = self.input.read()?;
            let out = pool.update(&params)?;
            self.output.write(&out)?;
        }
        self.out_sizes.memory_pool = (pools.len() * record_size::<MemoryPoolOutParams>()) as u32;
        Ok(())
    }

    pub fn update_voice_channel_resources(&mut self, voices: &mut VoiceContext) -> RendererResult<()> {
        let count = voices.count();
        expect_size(
            "voice channel resource",
            self.sizes.voice_channel_resource,
            count,
            record_size::<VoiceChannelResourceInParams>(),
        )?;
        for index in 0..count {
            let params: VoiceChannelResourceInParams = self.input.read()?;
            if let Some(resource) = voices.channel_resource_mut(index) {
                resource.update(&params);
            }
        }
        Ok(())
    }

    /// Voices arrive in slot order; a record addresses the voice named by its id
    pub fn update_voices(
        &mut self,
        voices: &mut VoiceContext,
        pools: &[MemoryPoolInfo],
        behavior: &mut BehaviorInfo,
        memory: &dyn HostMemory,
    ) -> RendererResult<()> {
        let count = voices.count();
        expect_size("voice", self.sizes.voice, count, record_size::<VoiceInParams>())?;

        for voice in voices.voices.iter_mut() {
            voice.in_use = false;
        }

        for _ in 0..count {
            let params: VoiceInParams = self.input.read()?;
            if params.in_use == 0 {
                continue;
            }
            let index = params.id as usize;
            let Some(voice) = voices.voice_mut(index) else {
                return Err(RendererError::invalid(format!("voice id {} out of range", params.id)));
            };
            voice.update(&params, behavior, pools, memory);
            if params.is_new != 0 {
                voices.reset_states(index);
            }
        }

        for voice in voices.voices.iter() {
            let first_state = voice
                .channel_resources()
                .next()
                .and_then(|id| voices.state(id));
            self.output.write(&voice.output(first_state))?;
        }
        self.out_sizes.voice = (count * record_size::<VoiceOutParams>()) as u32;
        Ok(())
    }

    pub fn update_effects(&mut self, effects: &mut EffectContext, renderer_active: bool) -> RendererResult<()> {
        let count = effects.count();
        expect_size("effect", self.sizes.effect, count, record_size::<EffectInParams>())?;
        for index in 0..count {
            let params: EffectInParams = self.input.read()?;
            let Some(effect) = effects.info_mut(index) else {
                continue;
            };
            effect.update(&params, self.sample_rate);
            self.output.write(&effect.output(renderer_active))?;
        }
        self.out_sizes.effect = (count * record_size::<EffectOutParams>()) as u32;
        Ok(())
    }

    /// Splitter section; skipped when the client revision predates splitters
    pub fn update_splitters(&mut self, splitters: &mut SplitterContext, behavior: &BehaviorInfo) -> RendererResult<()> {
        let size = self.sizes.splitter as usize;
        if size == 0 {
            return Ok(());
        }
        if !behavior.is_splitter_supported() {
            log::debug!("Skipping {:#x}-byte splitter section for REV{}", size, behavior.user_revision());
            self.input.bytes(size)?;
            return Ok(());
        }
        if size != align_up(size, 16) {
            return Err(RendererError::invalid(format!("splitter section size {:#x} is not aligned", size)));
        }
        splitters.update(&mut self.input, size, behavior)
    }

    /// Mix section, then connection rebuild, sort and buffer packing
    pub fn update_mixes(
        &mut self,
        mixes: &mut MixContext,
        splitters: &mut SplitterContext,
        effects: &EffectContext,
        behavior: &BehaviorInfo,
    ) -> RendererResult<()> {
        let mix_count = mixes.count();
        let dirty_only = behavior.is_mix_in_parameter_dirty_only_update_supported();

        let records: Vec<(usize, MixInParams)> = if dirty_only {
            let header: MixDirtyHeader = self.input.read()?;
            let count = header.mix_count as usize;
            expect_size(
                "mix",
                self.sizes.mixer,
                1,
                record_size::<MixDirtyHeader>() + count * record_size::<MixInParams>(),
            )?;
            let mut records = Vec::with_capacity(count.min(mix_count));
            for _ in 0..count {
                let params: MixInParams = self.input.read()?;
                let index = usize::try_from(params.mix_id)
                    .ok()
                    .filter(|&id| id < mix_count)
                    .ok_or_else(|| RendererError::invalid(format!("mix id {} out of range", params.mix_id)))?;
                records.push((index, params));
            }
            records
        } else {
            expect_size("mix", self.sizes.mixer, mix_count, record_size::<MixInParams>())?;
            let records = (0..mix_count)
                .map(|index| Ok((index, self.input.read::<MixInParams>()?)))
                .collect::<RendererResult<Vec<_>>>()?;
            self.validate_mixes(&records, mix_count)?;
            records
        };

        for (index, params) in &records {
            if let Some(info) = mixes.info_mut(*index as i32) {
                info.update(params);
            }
        }

        mixes.update_connections(splitters);
        if behavior.is_splitter_supported() {
            mixes.tsort_info()?;
        } else {
            mixes.sort_info();
        }
        mixes.assign_buffer_offsets(self.mix_buffer_count);
        mixes.rebuild_effect_order(effects.orders());
        splitters.clear_new_connections();
        Ok(())
    }

    fn validate_mixes(&self, records: &[(usize, MixInParams)], mix_count: usize) -> RendererResult<()> {
        let mut total_buffers = 0usize;
        for (index, params) in records.iter().filter(|(_, params)| params.in_use != 0) {
            let dest_valid = params.dest_mix_id == NO_MIX
                || usize::try_from(params.dest_mix_id).is_ok_and(|dest| dest < mix_count);
            if !dest_valid {
                return Err(RendererError::invalid(format!(
                    "mix {} routes to missing mix {}",
                    index, params.dest_mix_id
                )));
            }
            total_buffers += params.buffer_count as usize;
        }
        if total_buffers > self.mix_buffer_count {
            return Err(RendererError::invalid(format!(
                "mixes use {} buffers of {}",
                total_buffers, self.mix_buffer_count
            )));
        }
        Ok(())
    }

    pub fn update_sinks(&mut self, sinks: &mut SinkContext) -> RendererResult<()> {
        let count = sinks.count();
        expect_size("sink", self.sizes.sink, count, record_size::<SinkInParams>())?;
        for index in 0..count {
            let params: SinkInParams = self.input.read()?;
            let out = sinks
                .info_mut(index)
                .map(|info| info.update(&params))
                .unwrap_or_default();
            self.output.write(&out)?;
        }
        self.out_sizes.sink = (count * record_size::<SinkOutParams>()) as u32;
        Ok(())
    }

    /// Performance metrics are not collected; the input is skipped
    pub fn update_performance(&mut self) -> RendererResult<()> {
        self.input.bytes(self.sizes.performance as usize)?;
        self.output.write(&PerformanceOutParams::default())?;
        self.out_sizes.performance = record_size::<PerformanceOutParams>() as u32;
        Ok(())
    }

    pub fn update_error_info(&mut self, behavior: &BehaviorInfo) -> RendererResult<()> {
        self.output.write(&behavior.error_info())?;
        self.out_sizes.behavior = record_size::<ErrorInfoOutParams>() as u32;
        Ok(())
    }

    pub fn update_renderer_info(&mut self, behavior: &BehaviorInfo, elapsed_frame_count: u64) -> RendererResult<()> {
        if !behavior.is_elapsed_frame_count_supported() {
            return Ok(());
        }
        self.output.write(&RendererInfoOutParams {
            elapsed_frame_count,
            padding: 0,
        })?;
        self.out_sizes.render_info = record_size::<RendererInfoOutParams>() as u32;
        Ok(())
    }

    /// Write the response header and require the response to be filled exactly
    pub fn finish(mut self) -> RendererResult<()> {
        let total = self.output.offset();
        if total != self.output.capacity() {
            return Err(RendererError::invalid(format!(
                "response filled {:#x} of {:#x} bytes",
                total,
                self.output.capacity()
            )));
        }
        let header = UpdateDataHeader {
            revision: self.revision,
            sizes: self.out_sizes,
            padding: [0; 4],
            total_size: total as u32,
        };
        self.output.write_at(0, &header)
    }
}
