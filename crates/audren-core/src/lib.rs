//! Audren Core - emulated console audio renderer
//!
//! Consumes wave-buffers from host memory, runs them through the voice
//! pipeline, the mix graph and the effects stage, and produces interleaved
//! PCM16 frames for a sink. Configuration arrives as binary update blobs.

pub mod behavior;
pub mod command;
pub mod config;
pub mod driver;
pub mod dsp;
pub mod effect;
pub mod error;
pub mod info_updater;
pub mod memory;
pub mod memory_pool;
pub mod mix;
pub mod protocol;
pub mod renderer;
pub mod sink;
pub mod splitter;
pub mod types;
pub mod voice;

pub use error::{RendererError, RendererResult};
pub use renderer::AudioRenderer;
pub use types::*;
