//! Server-side sink records
//!
//! Only the first in-use device sink feeds the output stream; its input
//! permutation selects which final-mix buffers are adapted into the frame.

use crate::dsp::channels::DEFAULT_DOWNMIX_COEFFICIENTS;
use crate::protocol::{SinkInParams, SinkOutParams, SINK_TYPE_CIRCULAR_BUFFER, SINK_TYPE_DEVICE};
use crate::types::MAX_CHANNEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkType {
    #[default]
    Invalid,
    Device,
    CircularBuffer,
}

impl SinkType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            SINK_TYPE_DEVICE => SinkType::Device,
            SINK_TYPE_CIRCULAR_BUFFER => SinkType::CircularBuffer,
            _ => SinkType::Invalid,
        }
    }
}

/// Device path configuration taken from a device sink record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSinkInfo {
    /// Final-mix buffer (relative to the final mix offset) per stream input
    pub inputs: [i8; MAX_CHANNEL_COUNT],
    pub input_count: usize,
    pub downmix_coefficients: [f32; 4],
}

impl Default for DeviceSinkInfo {
    fn default() -> Self {
        Self {
            inputs: [0, 1, 2, 3, 4, 5],
            input_count: 0,
            downmix_coefficients: DEFAULT_DOWNMIX_COEFFICIENTS,
        }
    }
}

impl DeviceSinkInfo {
    fn from_params(params: &SinkInParams) -> Self {
        Self {
            inputs: params.input,
            input_count: (params.input_count as usize).min(MAX_CHANNEL_COUNT),
            downmix_coefficients: if params.downmix_enabled != 0 {
                params.downmix_coefficients
            } else {
                DEFAULT_DOWNMIX_COEFFICIENTS
            },
        }
    }

    /// Absolute mix-buffer indices consumed by the stream
    pub fn buffer_indices(&self, final_mix_offset: usize) -> impl Iterator<Item = Option<usize>> + '_ {
        self.inputs[..self.input_count]
            .iter()
            .map(move |&input| usize::try_from(input).ok().map(|input| final_mix_offset + input))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkInfo {
    pub sink_type: SinkType,
    pub in_use: bool,
    pub node_id: u32,
    pub device: DeviceSinkInfo,
}

impl SinkInfo {
    pub fn update(&mut self, params: &SinkInParams) -> SinkOutParams {
        self.sink_type = SinkType::from_raw(params.sink_type);
        self.in_use = params.in_use != 0;
        self.node_id = params.node_id;
        if self.sink_type == SinkType::Device {
            self.device = DeviceSinkInfo::from_params(params);
        }
        SinkOutParams::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SinkContext {
    infos: Vec<SinkInfo>,
}

impl SinkContext {
    pub fn new(count: usize) -> Self {
        Self {
            infos: vec![SinkInfo::default(); count],
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info_mut(&mut self, index: usize) -> Option<&mut SinkInfo> {
        self.infos.get_mut(index)
    }

    /// The device sink that drives the output stream
    pub fn device(&self) -> Option<&DeviceSinkInfo> {
        self.infos
            .iter()
            .find(|info| info.in_use && info.sink_type == SinkType::Device)
            .map(|info| &info.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_params(inputs: &[i8]) -> SinkInParams {
        let mut params = SinkInParams {
            sink_type: SINK_TYPE_DEVICE,
            in_use: 1,
            input_count: inputs.len() as u32,
            ..Default::default()
        };
        params.input[..inputs.len()].copy_from_slice(inputs);
        params
    }

    #[test]
    fn test_first_device_sink_drives_output() {
        let mut context = SinkContext::new(2);
        assert!(context.device().is_none());

        context.info_mut(1).unwrap().update(&device_params(&[1, 0]));
        let device = context.device().unwrap();
        let indices: Vec<_> = device.buffer_indices(4).collect();
        assert_eq!(indices, vec![Some(5), Some(4)]);
        assert_eq!(device.downmix_coefficients, DEFAULT_DOWNMIX_COEFFICIENTS);
    }

    #[test]
    fn test_downmix_coefficients_when_enabled() {
        let mut params = device_params(&[0, 1, 2, 3, 4, 5]);
        params.downmix_enabled = 1;
        params.downmix_coefficients = [0.5, 0.5, 0.0, 0.5];
        let mut info = SinkInfo::default();
        info.update(&params);
        assert_eq!(info.device.downmix_coefficients, [0.5, 0.5, 0.0, 0.5]);
        assert_eq!(info.device.input_count, 6);
    }
}
