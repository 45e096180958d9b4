//! I3DL2 reverb
//!
//! Early reflections come from 20 taps on a 400ms delay line fed by a
//! low-passed mono downmix. The late tail is a four-line feedback delay network
//! whose lines each pass through two cascaded all-pass decay stages and a
//! shelving filter. Channel layouts of 1, 2, 4 and 6 are supported.

use std::sync::Arc;

use super::{channel_pairs, pass_through, ParameterStatus};
use crate::command::MixBufferPool;
use crate::dsp::delay::{calculate_delay_samples, DelayLine};
use crate::protocol::I3dl2ReverbParams;
use crate::types::MAX_CHANNEL_COUNT;

const DELAY_LINES: usize = 4;
const EARLY_TAPS: usize = 20;

const FDN_MIN_DELAY_MS: [f32; DELAY_LINES] = [5.0, 6.0, 13.0, 14.0];
const FDN_MAX_DELAY_MS: [f32; DELAY_LINES] = [45.704, 82.782, 149.94, 271.58];
const DECAY0_MAX_DELAY_MS: [f32; DELAY_LINES] = [17.0, 13.0, 9.0, 7.0];
const DECAY1_MAX_DELAY_MS: [f32; DELAY_LINES] = [19.0, 11.0, 10.0, 6.0];
const CENTER_DELAY_MS: f32 = 5.0;
const EARLY_MAX_DELAY_MS: f32 = 400.0;
const MAX_LOWPASS_COEFFICIENT: f32 = 0.99723;

const EARLY_TAP_TIMES: [f32; EARLY_TAPS] = [
    0.017136, 0.059154, 0.161733, 0.390186, 0.425262, 0.455411, 0.689737, 0.745910, 0.833844,
    0.859502, 0.0, 0.075024, 0.168788, 0.299901, 0.337443, 0.371903, 0.599011, 0.716741,
    0.817859, 0.851664,
];

const EARLY_GAIN: [f32; EARLY_TAPS] = [
    0.67096, 0.61027, 1.0, 0.35680, 0.68361, 0.65978, 0.51939, 0.24712, 0.45945, 0.45021, 0.64196,
    0.54879, 0.92925, 0.38270, 0.72867, 0.69794, 0.5464, 0.24563, 0.45214, 0.44042,
];

const TAP_LUT_1CH: [usize; EARLY_TAPS] = [0; EARLY_TAPS];
const TAP_LUT_2CH: [usize; EARLY_TAPS] = [0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
const TAP_LUT_4CH: [usize; EARLY_TAPS] = [0, 0, 1, 1, 0, 1, 2, 2, 3, 3, 0, 1, 2, 3, 0, 1, 2, 3, 2, 3];
const TAP_LUT_6CH: [usize; EARLY_TAPS] = [4, 0, 0, 1, 1, 1, 1, 2, 2, 2, 3, 3, 3, 0, 0, 1, 1, 2, 2, 3];

/// Index of the LFE channel in the 6-channel reverb layout
const LFE: usize = 5;
/// Index of the center channel in the 6-channel reverb layout
const CENTER: usize = 4;

#[inline]
fn to_float(sample: i32) -> f32 {
    sample as f32 / 65536.0
}

#[inline]
fn to_s32(value: f32) -> i32 {
    (value * 65536.0).clamp(-8_388_608.0, 8_388_607.0) as i32
}

fn tap_lut(channels: usize) -> &'static [usize; EARLY_TAPS] {
    match channels {
        2 => &TAP_LUT_2CH,
        4 => &TAP_LUT_4CH,
        6 => &TAP_LUT_6CH,
        _ => &TAP_LUT_1CH,
    }
}

/// Delay network and filter state
#[derive(Debug, Clone)]
pub struct I3dl2State {
    pub lowpass: [f32; 3],
    early_delay_line: DelayLine,
    early_max_delay: usize,
    pub early_tap_steps: [usize; EARLY_TAPS],
    pub early_gain: f32,
    pub late_gain: f32,
    pub early_to_late_taps: usize,
    fdn_delay_lines: [DelayLine; DELAY_LINES],
    decay_delay_lines0: [DelayLine; DELAY_LINES],
    decay_delay_lines1: [DelayLine; DELAY_LINES],
    center_delay_line: DelayLine,
    /// Shelf coefficients per line: `[c0, c1, c2]`
    pub lpf_coefficients: [[f32; DELAY_LINES]; 3],
    shelf_filter: [f32; DELAY_LINES],
    pub dry_gain: f32,
    pub last_reverb_echo: f32,
}

impl I3dl2State {
    /// Allocate every line at its maximum length for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        let rate_khz = sample_rate as f32 / 1000.0;
        let line = |ms: f32| DelayLine::new(calculate_delay_samples(rate_khz, ms));
        let early_max_delay = calculate_delay_samples(rate_khz, EARLY_MAX_DELAY_MS);
        Self {
            lowpass: [0.0; 3],
            early_delay_line: DelayLine::new(early_max_delay),
            early_max_delay,
            early_tap_steps: [0; EARLY_TAPS],
            early_gain: 0.0,
            late_gain: 0.0,
            early_to_late_taps: 0,
            fdn_delay_lines: FDN_MAX_DELAY_MS.map(line),
            decay_delay_lines0: DECAY0_MAX_DELAY_MS.map(line),
            decay_delay_lines1: DECAY1_MAX_DELAY_MS.map(line),
            center_delay_line: line(CENTER_DELAY_MS),
            lpf_coefficients: [[0.0; DELAY_LINES]; 3],
            shelf_filter: [0.0; DELAY_LINES],
            dry_gain: 0.0,
            last_reverb_echo: 0.0,
        }
    }

    /// Derive gains, filter coefficients and delay lengths from parameters
    pub fn update(&mut self, params: &I3dl2ReverbParams, sample_rate: u32) {
        let rate = sample_rate as f32;
        let rate_khz = rate / 1000.0;

        self.dry_gain = params.dry_gain;
        self.early_gain = 10f32.powf((params.room + params.reflection).min(5000.0) / 2000.0);
        self.late_gain = 10f32.powf((params.room + params.reverb).min(5000.0) / 2000.0);

        let hf_gain = 10f32.powf(params.room_hf / 2000.0);
        if hf_gain >= 1.0 {
            self.lowpass[1] = 0.0;
            self.lowpass[2] = 1.0;
        } else {
            let cosine = (256.0 * std::f32::consts::PI * params.hf_reference / rate).cos();
            let a = 1.0 - hf_gain;
            let b = 2.0 * (2.0 - hf_gain * cosine);
            let c = (b * b - 4.0 * a * a).max(0.0).sqrt();
            self.lowpass[1] = ((b - c) / (2.0 * a)).min(MAX_LOWPASS_COEFFICIENT);
            self.lowpass[2] = 1.0 - self.lowpass[1];
        }

        self.early_to_late_taps =
            calculate_delay_samples(rate_khz, 1000.0 * (params.reflection_delay + params.reverb_delay));
        self.last_reverb_echo = 0.6 * params.diffusion / 100.0;

        let density = params.density / 100.0;
        for i in 0..DELAY_LINES {
            let length_ms = FDN_MIN_DELAY_MS[i] + density * (FDN_MAX_DELAY_MS[i] - FDN_MIN_DELAY_MS[i]);
            self.fdn_delay_lines[i].set_delay(calculate_delay_samples(rate_khz, length_ms));

            let total_delay = (self.fdn_delay_lines[i].delay()
                + self.decay_delay_lines0[i].delay()
                + self.decay_delay_lines1[i].delay()) as f32;
            let a = (-60.0 * total_delay) / (params.decay_time * rate);
            let b = a / params.hf_decay_ratio;
            let angle = params.hf_reference * 64.0 / rate;
            let c = angle.cos() / angle.sin();
            let d = 10f32.powf((b - a) / 40.0);
            let e = 10f32.powf((b + a) / 40.0) * 0.7071;

            let coefficients = [
                e * (d * c + 1.0) / (c + d),
                e * (1.0 - d * c) / (c + d),
                (c - d) / (c + d),
            ];
            for (row, value) in self.lpf_coefficients.iter_mut().zip(coefficients) {
                row[i] = if value.is_finite() { value } else { 0.0 };
            }

            self.decay_delay_lines0[i].wet_gain = 0.9 * self.last_reverb_echo;
            self.decay_delay_lines1[i].wet_gain = -0.9 * self.last_reverb_echo;
        }

        let reflection_time = (params.reverb_delay * 0.9998 + 0.02) * 1000.0;
        let reflection_delay = params.reflection_delay * 1000.0;
        for (step, &time) in self.early_tap_steps.iter_mut().zip(&EARLY_TAP_TIMES) {
            let samples = calculate_delay_samples(rate_khz, reflection_delay + reflection_time * time);
            *step = samples.min(self.early_max_delay);
        }
    }

    /// One sample frame: `inputs` and `outputs` hold `channels` entries
    fn tick(&mut self, channels: usize, inputs: &[i32], outputs: &mut [i32]) {
        let mut early = [0.0f32; MAX_CHANNEL_COUNT];
        let mono: f32 = inputs.iter().map(|&s| to_float(s)).sum();

        let lut = tap_lut(channels);
        for tap in 0..EARLY_TAPS {
            let sample = self.early_delay_line.tap_out(self.early_tap_steps[tap]) * EARLY_GAIN[tap];
            early[lut[tap]] += sample;
            if channels == 6 {
                early[LFE] += sample;
            }
        }

        self.lowpass[0] = mono * self.lowpass[2] + self.lowpass[0] * self.lowpass[1];
        self.early_delay_line.tick(self.lowpass[0]);
        for sample in early[..channels].iter_mut() {
            *sample *= self.early_gain;
        }

        let late_input = self.early_delay_line.tap_out(self.early_to_late_taps) * self.late_gain;
        let mut filtered = [0.0f32; DELAY_LINES];
        for (i, value) in filtered.iter_mut().enumerate() {
            let x = self.fdn_delay_lines[i].read();
            let y = x * self.lpf_coefficients[0][i] + self.shelf_filter[i];
            self.shelf_filter[i] = x * self.lpf_coefficients[1][i] + y * self.lpf_coefficients[2][i];
            *value = y;
        }
        let mixed = [
            filtered[1] + filtered[2],
            -filtered[0] - filtered[3],
            filtered[0] - filtered[3],
            filtered[1] - filtered[2],
        ];

        let mut all_pass = [0.0f32; DELAY_LINES];
        for i in 0..DELAY_LINES {
            let stage0 = self.decay_delay_lines0[i].all_pass_tick(late_input + mixed[i]);
            let stage1 = self.decay_delay_lines1[i].all_pass_tick(stage0);
            self.fdn_delay_lines[i].tick(stage1);
            all_pass[i] = stage1;
        }

        let mut late = [0.0f32; MAX_CHANNEL_COUNT];
        match channels {
            1 => late[0] = all_pass[0] + all_pass[1],
            2 => late[..2].copy_from_slice(&all_pass[..2]),
            4 => late[..4].copy_from_slice(&all_pass),
            6 => {
                late[..4].copy_from_slice(&all_pass);
                late[CENTER] = self.center_delay_line.read();
                self.center_delay_line.tick(0.5 * (all_pass[2] - all_pass[3]));
                late[LFE] = all_pass[3];
            }
            _ => {}
        }

        for channel in 0..channels {
            let dry = self.dry_gain * to_float(inputs[channel]);
            outputs[channel] = to_s32(dry + early[channel] + late[channel]);
        }
    }
}

/// Clones share the delay network until one of them runs or retunes it
#[derive(Debug, Clone, Default)]
pub struct I3dl2Effect {
    params: I3dl2ReverbParams,
    state: Option<Arc<I3dl2State>>,
    sample_rate: u32,
    scratch: Vec<i32>,
}

impl I3dl2Effect {
    pub fn state(&self) -> Option<&I3dl2State> {
        self.state.as_deref()
    }

    pub fn update(&mut self, params: &I3dl2ReverbParams, renderer_rate: u32) {
        let rate = if params.sample_rate != 0 {
            params.sample_rate
        } else {
            renderer_rate
        };
        let reinitialize = ParameterStatus::from_raw(params.status) == ParameterStatus::Initialized
            || self.state.is_none()
            || rate != self.sample_rate;
        if reinitialize {
            let mut state = I3dl2State::new(rate);
            state.update(params, rate);
            self.state = Some(Arc::new(state));
            self.sample_rate = rate;
        } else if bytemuck::bytes_of(params) != bytemuck::bytes_of(&self.params) {
            if let Some(state) = self.state.as_mut() {
                Arc::make_mut(state).update(params, rate);
            }
        }
        self.params = *params;
    }

    pub fn process(&mut self, pool: &mut MixBufferPool, base: usize, enabled: bool) {
        let channels = (self.params.channel_count as usize).min(MAX_CHANNEL_COUNT);
        let pairs = channel_pairs(&self.params.input, &self.params.output, channels, base, pool);
        let supported = matches!(channels, 1 | 2 | 4 | 6) && pairs.len() == channels;
        let Some(state) = self.state.as_mut().filter(|_| enabled && supported) else {
            pass_through(pool, &pairs);
            return;
        };
        let state = Arc::make_mut(state);

        let sample_count = pool.sample_count();
        if sample_count == 0 {
            return;
        }
        // Planar outputs; inputs stay readable while an output aliases one
        self.scratch.resize(channels * sample_count, 0);

        let mut frame_in = [0i32; MAX_CHANNEL_COUNT];
        let mut frame_out = [0i32; MAX_CHANNEL_COUNT];
        for i in 0..sample_count {
            for (channel, &(input, _)) in pairs.iter().enumerate() {
                frame_in[channel] = pool.get(input).map_or(0, |samples| samples[i]);
            }
            state.tick(channels, &frame_in[..channels], &mut frame_out[..channels]);
            for (channel, &sample) in frame_out[..channels].iter().enumerate() {
                self.scratch[channel * sample_count + i] = sample;
            }
        }

        for (&(_, output), samples) in pairs.iter().zip(self.scratch.chunks_exact(sample_count)) {
            if let Some(buffer) = pool.get_mut(output) {
                buffer.copy_from_slice(samples);
            }
        }
    }
}
