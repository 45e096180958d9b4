//! Effect slots
//!
//! Each slot holds a tagged effect variant owning its own state. The info
//! updater writes parameters into slots; the command generator dispatches the
//! slots listed in a mix's processing order against that mix's buffers.

mod aux;
mod biquad;
mod buffer_mixer;
mod delay;
mod i3dl2;

pub use aux::{AuxEffect, AuxInfoDsp};
pub use biquad::BiquadEffect;
pub use buffer_mixer::BufferMixerEffect;
pub use delay::DelayEffect;
pub use i3dl2::{I3dl2Effect, I3dl2State};

use crate::command::MixBufferPool;
use crate::memory::HostMemory;
use crate::protocol::{EffectInParams, EffectOutParams, ReverbParams};
use crate::types::{MAX_MIX_BUFFERS, NO_MIX};

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectType {
    #[default]
    Stub,
    BufferMixer,
    Aux,
    Delay,
    Reverb,
    I3dl2Reverb,
    Biquad,
}

impl EffectType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => EffectType::BufferMixer,
            2 => EffectType::Aux,
            3 => EffectType::Delay,
            4 => EffectType::Reverb,
            5 => EffectType::I3dl2Reverb,
            6 => EffectType::Biquad,
            _ => EffectType::Stub,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            EffectType::Stub => 0,
            EffectType::BufferMixer => 1,
            EffectType::Aux => 2,
            EffectType::Delay => 3,
            EffectType::Reverb => 4,
            EffectType::I3dl2Reverb => 5,
            EffectType::Biquad => 6,
        }
    }
}

/// Server-side lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsageState {
    #[default]
    Initialized,
    Running,
    Stopped,
}

/// Status reported back to the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectStatus {
    Used,
    Removed,
}

impl EffectStatus {
    pub fn to_raw(self) -> u8 {
        match self {
            EffectStatus::Used => 3,
            EffectStatus::Removed => 4,
        }
    }
}

/// Parameter block state carried in the `status` byte of variant parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterStatus {
    /// Guest asks for the effect state to be rebuilt
    Initialized,
    Updating,
    Updated,
}

impl ParameterStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ParameterStatus::Initialized,
            1 => ParameterStatus::Updating,
            _ => ParameterStatus::Updated,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Per-frame collaborators handed to every effect
pub struct ProcessContext<'a> {
    pub sample_rate: u32,
    pub sample_count: usize,
    pub memory: &'a dyn HostMemory,
}

/// Resolved `(input, output)` pool indices of an effect, kept on the stack
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelPairs {
    pairs: [(usize, usize); MAX_MIX_BUFFERS],
    len: usize,
}

impl std::ops::Deref for ChannelPairs {
    type Target = [(usize, usize)];

    fn deref(&self) -> &Self::Target {
        &self.pairs[..self.len]
    }
}

/// Resolve relative `(input, output)` buffer indices against a mix base
///
/// Negative or out-of-pool indices are skipped.
pub(crate) fn channel_pairs(
    input: &[i8],
    output: &[i8],
    count: usize,
    base: usize,
    pool: &MixBufferPool,
) -> ChannelPairs {
    let mut pairs = ChannelPairs {
        pairs: [(0, 0); MAX_MIX_BUFFERS],
        len: 0,
    };
    for (&input, &output) in input.iter().zip(output).take(count.min(MAX_MIX_BUFFERS)) {
        let (Ok(input), Ok(output)) = (usize::try_from(input), usize::try_from(output)) else {
            continue;
        };
        let (input, output) = (base + input, base + output);
        if input < pool.count() && output < pool.count() {
            pairs.pairs[pairs.len] = (input, output);
            pairs.len += 1;
        }
    }
    pairs
}

/// Copy each input to its output, used by disabled and pass-through effects
pub(crate) fn pass_through(pool: &mut MixBufferPool, pairs: &[(usize, usize)]) {
    for &(input, output) in pairs {
        pool.copy(input, output);
    }
}

/// Variant state of one slot
#[derive(Debug, Clone)]
pub enum EffectState {
    Stub,
    BufferMixer(BufferMixerEffect),
    Aux(AuxEffect),
    Delay(DelayEffect),
    /// Plain reverb is passed through unprocessed
    Reverb(ReverbParams),
    I3dl2Reverb(I3dl2Effect),
    Biquad(BiquadEffect),
}

impl EffectState {
    fn fresh(effect_type: EffectType) -> Self {
        match effect_type {
            EffectType::Stub => EffectState::Stub,
            EffectType::BufferMixer => EffectState::BufferMixer(BufferMixerEffect::default()),
            EffectType::Aux => EffectState::Aux(AuxEffect::default()),
            EffectType::Delay => EffectState::Delay(DelayEffect::default()),
            EffectType::Reverb => EffectState::Reverb(ReverbParams::default()),
            EffectType::I3dl2Reverb => EffectState::I3dl2Reverb(I3dl2Effect::default()),
            EffectType::Biquad => EffectState::Biquad(BiquadEffect::default()),
        }
    }

    pub fn effect_type(&self) -> EffectType {
        match self {
            EffectState::Stub => EffectType::Stub,
            EffectState::BufferMixer(_) => EffectType::BufferMixer,
            EffectState::Aux(_) => EffectType::Aux,
            EffectState::Delay(_) => EffectType::Delay,
            EffectState::Reverb(_) => EffectType::Reverb,
            EffectState::I3dl2Reverb(_) => EffectType::I3dl2Reverb,
            EffectState::Biquad(_) => EffectType::Biquad,
        }
    }

    fn update_params(&mut self, params: &EffectInParams, sample_rate: u32) {
        match self {
            EffectState::Stub => {}
            EffectState::BufferMixer(effect) => effect.update(&params.params_as()),
            EffectState::Aux(effect) => effect.update(&params.params_as()),
            EffectState::Delay(effect) => effect.update(&params.params_as(), sample_rate),
            EffectState::Reverb(reverb) => *reverb = params.params_as(),
            EffectState::I3dl2Reverb(effect) => effect.update(&params.params_as(), sample_rate),
            EffectState::Biquad(effect) => effect.update(&params.params_as()),
        }
    }

    fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool, context: &ProcessContext<'_>) {
        match self {
            EffectState::Stub => {}
            EffectState::BufferMixer(effect) => effect.process(pool, base, enabled),
            EffectState::Aux(effect) => effect.process(pool, base, enabled, context),
            EffectState::Delay(effect) => effect.process(pool, base, enabled),
            EffectState::Reverb(reverb) => {
                let pairs = channel_pairs(&reverb.input, &reverb.output, reverb.channel_count as usize, base, pool);
                pass_through(pool, &pairs);
            }
            EffectState::I3dl2Reverb(effect) => effect.process(pool, base, enabled),
            EffectState::Biquad(effect) => effect.process(pool, base, enabled),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slots
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EffectInfo {
    pub enabled: bool,
    pub mix_id: i32,
    pub processing_order: i32,
    pub buffer_address: u64,
    pub buffer_size: u64,
    pub usage: UsageState,
    pub state: EffectState,
}

impl Default for EffectInfo {
    fn default() -> Self {
        Self {
            enabled: false,
            mix_id: NO_MIX,
            processing_order: -1,
            buffer_address: 0,
            buffer_size: 0,
            usage: UsageState::Initialized,
            state: EffectState::Stub,
        }
    }
}

impl EffectInfo {
    pub fn effect_type(&self) -> EffectType {
        self.state.effect_type()
    }

    /// Apply one effect record
    ///
    /// A type change replaces the variant and loses its state.
    pub fn update(&mut self, params: &EffectInParams, sample_rate: u32) {
        let requested = EffectType::from_raw(params.effect_type);
        if requested != self.effect_type() {
            log::debug!("Effect slot retargeted {:?} -> {:?}", self.effect_type(), requested);
            *self = EffectInfo {
                state: EffectState::fresh(requested),
                ..EffectInfo::default()
            };
        } else if params.is_new != 0 {
            self.usage = UsageState::Initialized;
        }

        self.enabled = params.enabled != 0;
        self.mix_id = params.mix_id;
        self.processing_order = params.processing_order;
        self.buffer_address = params.buffer_address;
        self.buffer_size = params.buffer_size;
        self.state.update_params(params, sample_rate);
    }

    /// Frame-start transition of the usage state
    pub fn update_for_command_generation(&mut self) {
        self.usage = if self.enabled {
            UsageState::Running
        } else {
            UsageState::Stopped
        };
    }

    pub fn status(&self, renderer_active: bool) -> EffectStatus {
        if (!renderer_active && self.usage != UsageState::Initialized) || self.usage == UsageState::Stopped {
            EffectStatus::Removed
        } else {
            EffectStatus::Used
        }
    }

    pub fn output(&self, renderer_active: bool) -> EffectOutParams {
        EffectOutParams {
            status: self.status(renderer_active).to_raw(),
            ..Default::default()
        }
    }

    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, context: &ProcessContext<'_>) {
        self.state.process(pool, base, self.enabled, context);
    }
}

#[derive(Debug, Clone, Default)]
pub struct EffectContext {
    infos: Vec<EffectInfo>,
}

impl EffectContext {
    pub fn new(count: usize) -> Self {
        Self {
            infos: vec![EffectInfo::default(); count],
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, index: usize) -> Option<&EffectInfo> {
        self.infos.get(index)
    }

    pub fn info_mut(&mut self, index: usize) -> Option<&mut EffectInfo> {
        self.infos.get_mut(index)
    }

    /// `(index, mix_id, processing_order)` of every slot
    pub fn orders(&self) -> impl Iterator<Item = (usize, i32, i32)> + '_ {
        self.infos
            .iter()
            .enumerate()
            .map(|(index, info)| (index, info.mix_id, info.processing_order))
    }

    pub fn update_for_command_generation(&mut self) {
        for info in self.infos.iter_mut() {
            info.update_for_command_generation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BufferMixerParams;

    fn params(effect_type: EffectType, enabled: bool) -> EffectInParams {
        EffectInParams {
            effect_type: effect_type.to_raw(),
            enabled: enabled as u8,
            mix_id: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_type_change_retargets_slot() {
        let mut info = EffectInfo::default();
        info.update(&params(EffectType::Delay, true), 48000);
        assert_eq!(info.effect_type(), EffectType::Delay);
        info.update_for_command_generation();
        assert_eq!(info.usage, UsageState::Running);

        info.update(&params(EffectType::BufferMixer, true), 48000);
        assert_eq!(info.effect_type(), EffectType::BufferMixer);
        assert_eq!(info.usage, UsageState::Initialized);
    }

    #[test]
    fn test_status_rules() {
        let mut info = EffectInfo::default();
        info.update(&params(EffectType::BufferMixer, true), 48000);
        assert_eq!(info.status(true), EffectStatus::Used);
        assert_eq!(info.status(false), EffectStatus::Used);

        info.update_for_command_generation();
        assert_eq!(info.status(true), EffectStatus::Used);
        assert_eq!(info.status(false), EffectStatus::Removed);

        info.update(&params(EffectType::BufferMixer, false), 48000);
        info.update_for_command_generation();
        assert_eq!(info.status(true), EffectStatus::Removed);
    }

    #[test]
    fn test_channel_pairs_skip_invalid() {
        let pool = MixBufferPool::new(4, 1);
        let input = [0i8, -1, 1, 3];
        let output = [1i8, 0, 5, 0];
        let pairs = channel_pairs(&input, &output, 4, 1, &pool);
        assert_eq!(&*pairs, &[(1, 2)]);
    }

    #[test]
    fn test_buffer_mixer_dispatch() {
        let mut pool = MixBufferPool::new(2, 2);
        pool.get_mut(0).unwrap().copy_from_slice(&[100, -100]);

        let mut mixer = BufferMixerParams {
            count: 1,
            ..Default::default()
        };
        mixer.output[0] = 1;
        mixer.volume[0] = 0.5;
        let mut in_params = params(EffectType::BufferMixer, true);
        in_params.set_params(&mixer);

        let mut info = EffectInfo::default();
        info.update(&in_params, 48000);
        let memory = crate::memory::VecMemory::new(0, 0);
        let context = ProcessContext {
            sample_rate: 48000,
            sample_count: 2,
            memory: &memory,
        };
        info.process(&mut pool, 0, &context);
        assert_eq!(pool.get(1).unwrap(), &[50, -50]);
    }
}
