//! Sink that discards every buffer

use super::{drain_tags, release_queue, release_tag, Sink};
use crate::error::{SinkError, SinkResult};
use crate::types::StreamFormat;

pub struct NullSink {
    format: Option<StreamFormat>,
    producer: rtrb::Producer<u64>,
    consumer: rtrb::Consumer<u64>,
    frames_written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        let (producer, consumer) = release_queue();
        Self {
            format: None,
            producer,
            consumer,
            frames_written: 0,
        }
    }

    /// Frames accepted since the stream was opened
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for NullSink {
    fn open_stream(&mut self, sample_rate: u32, format: StreamFormat) -> SinkResult<()> {
        log::info!("Null sink open: {} channels at {}Hz", format.channels(), sample_rate);
        self.format = Some(format);
        Ok(())
    }

    fn enqueue(&mut self, tag: u64, samples: &[i16]) -> SinkResult<()> {
        let format = self.format.ok_or(SinkError::NotOpen)?;
        self.frames_written += (samples.len() / format.channels()) as u64;
        release_tag(&mut self.producer, tag);
        Ok(())
    }

    fn drain_released(&mut self, out: &mut Vec<u64>) {
        drain_tags(&mut self.consumer, out);
    }

    fn queued_frames(&self) -> usize {
        0
    }

    fn flush(&mut self) {}

    fn format(&self) -> Option<StreamFormat> {
        self.format
    }
}
