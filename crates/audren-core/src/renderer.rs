//! Audio renderer instance
//!
//! Owns the renderer contexts and the command generator behind one mutex, so
//! a client update and a rendered frame never interleave. Updates run against
//! a clone of the contexts and are committed only when every pass succeeds;
//! a rejected update leaves the last accepted configuration in place. Effect
//! delay networks are shared copy-on-write between the two, so only an effect
//! whose parameters changed is duplicated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::behavior::BehaviorInfo;
use crate::command::{CommandGenerator, FrameContexts};
use crate::config::RendererParams;
use crate::effect::EffectContext;
use crate::error::RendererResult;
use crate::info_updater::{output_buffer_size, InfoUpdater};
use crate::memory::HostMemory;
use crate::memory_pool::MemoryPoolInfo;
use crate::mix::MixContext;
use crate::sink::SinkContext;
use crate::splitter::SplitterContext;
use crate::voice::VoiceContext;

/// Everything an update may change
#[derive(Debug, Clone)]
struct RendererState {
    behavior: BehaviorInfo,
    memory_pools: Vec<MemoryPoolInfo>,
    voices: VoiceContext,
    mixes: MixContext,
    effects: EffectContext,
    splitters: SplitterContext,
    sinks: SinkContext,
}

impl RendererState {
    fn new(params: &RendererParams) -> Self {
        Self {
            behavior: BehaviorInfo::new(params.revision),
            memory_pools: vec![MemoryPoolInfo::default(); params.memory_pool_count() as usize],
            voices: VoiceContext::new(params.voice_count as usize),
            mixes: MixContext::new(params.mix_count() as usize, params.effect_count as usize),
            effects: EffectContext::new(params.effect_count as usize),
            splitters: SplitterContext::new(
                params.splitter_count as usize,
                params.splitter_destination_count as usize,
            ),
            sinks: SinkContext::new(params.sink_count as usize),
        }
    }
}

struct Inner {
    state: RendererState,
    generator: CommandGenerator,
}

pub struct AudioRenderer {
    params: RendererParams,
    memory: Arc<dyn HostMemory>,
    inner: Mutex<Inner>,
    active: AtomicBool,
    elapsed_frame_count: AtomicU64,
}

impl AudioRenderer {
    /// Build a stopped renderer reading guest memory through `memory`
    pub fn new(params: RendererParams, memory: Arc<dyn HostMemory>) -> RendererResult<Self> {
        params.validate()?;
        let generator = CommandGenerator::new(
            params.mix_buffer_count as usize,
            params.sample_count as usize,
            params.sample_rate,
        );
        log::info!(
            "Audio renderer created: REV{}, {}Hz, {} samples/frame, {} voices, {} mixes, {} effects",
            params.revision,
            params.sample_rate,
            params.sample_count,
            params.voice_count,
            params.mix_count(),
            params.effect_count
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                state: RendererState::new(&params),
                generator,
            }),
            params,
            memory,
            active: AtomicBool::new(false),
            elapsed_frame_count: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn params(&self) -> &RendererParams {
        &self.params
    }

    /// Exact size of every update response
    pub fn output_buffer_size(&self) -> usize {
        output_buffer_size(&self.params)
    }

    /// Interleaved samples in one frame of `channels` channels
    pub fn frame_len(&self, channels: usize) -> usize {
        self.params.sample_count as usize * channels
    }

    pub fn set_trace_commands(&self, trace: bool) {
        self.lock().generator.set_trace(trace);
    }

    pub fn start(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            log::info!("Audio renderer started");
        }
    }

    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            log::info!("Audio renderer stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn elapsed_frame_count(&self) -> u64 {
        self.elapsed_frame_count.load(Ordering::Acquire)
    }

    /// Apply one update blob and return the response blob
    pub fn update(&self, input: &[u8]) -> RendererResult<Vec<u8>> {
        let mut inner = self.lock();
        let mut next = inner.state.clone();
        let mut output = vec![0u8; self.output_buffer_size()];

        match self.apply_update(&mut next, input, &mut output) {
            Ok(()) => {
                inner.state = next;
                log::debug!("Update accepted ({:#x} bytes in)", input.len());
                Ok(output)
            }
            Err(e) => {
                log::warn!("Update rejected: {}", e);
                Err(e)
            }
        }
    }

    fn apply_update(&self, state: &mut RendererState, input: &[u8], output: &mut [u8]) -> RendererResult<()> {
        let RendererState {
            behavior,
            memory_pools,
            voices,
            mixes,
            effects,
            splitters,
            sinks,
        } = state;

        let mut updater = InfoUpdater::new(input, output, &self.params)?;
        updater.update_behavior(behavior)?;
        updater.update_memory_pools(memory_pools)?;
        updater.update_voice_channel_resources(voices)?;
        updater.update_voices(voices, memory_pools, behavior, self.memory.as_ref())?;
        updater.update_effects(effects, self.is_active())?;
        updater.update_splitters(splitters, behavior)?;
        updater.update_mixes(mixes, splitters, effects, behavior)?;
        updater.update_sinks(sinks)?;
        updater.update_performance()?;
        updater.update_error_info(behavior)?;
        updater.update_renderer_info(behavior, self.elapsed_frame_count())?;
        updater.finish()
    }

    /// Render one frame into `out` (`frame_len(channels)` interleaved samples)
    pub fn render_frame(&self, channels: usize, out: &mut [i16]) {
        let mut inner = self.lock();
        let Inner { state, generator } = &mut *inner;
        generator.generate(
            FrameContexts {
                voices: &mut state.voices,
                mixes: &state.mixes,
                effects: &mut state.effects,
                splitters: &mut state.splitters,
                sinks: &state.sinks,
                memory: self.memory.as_ref(),
            },
            channels,
            out,
        );
        self.elapsed_frame_count.fetch_add(1, Ordering::AcqRel);
    }
}
