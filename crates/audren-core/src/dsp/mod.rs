//! Sample-level DSP building blocks
//!
//! Everything here is stateless or owns only its own small state block, so the
//! command generator can drive it without allocating on the frame path.
//!
//! - [`adpcm`], [`pcm`]: decode guest sample formats to signed 16-bit
//! - [`resampler`]: 4-tap ratio resampler with carried history
//! - [`biquad`]: fixed-point direct-form-II transposed filter
//! - [`delay`]: float delay lines and all-pass sections for the reverb
//! - [`mix`]: volume ramps, mix accumulation, gain and depop decay
//! - [`channels`]: final-mix to stream channel adaptation

pub mod adpcm;
pub mod biquad;
pub mod channels;
pub mod delay;
pub mod mix;
pub mod pcm;
pub mod resampler;
