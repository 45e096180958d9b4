//! Output sinks
//!
//! A sink consumes tagged PCM16 buffers and hands the tags back once the
//! samples have been played (or written). The frame driver keeps a fixed
//! number of buffers in flight and refills one for every released tag.
//!
//! ```text
//! ┌──────────────┐  enqueue(tag, pcm)  ┌──────────────┐
//! │ Frame driver │────────────────────►│     Sink     │
//! │ (timer tick) │◄────────────────────│ (own thread) │
//! └──────────────┘  released tags      └──────────────┘
//!                   (lock-free SPSC)
//! ```
//!
//! - [`NullSink`]: discards samples, releases immediately
//! - [`WavSink`]: writes a PCM16 WAV file through `hound`
//! - `CpalSink`: OS audio device (feature `cpal-backend`)

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
mod info;
mod null;
mod wav;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalSink;
pub use info::{DeviceSinkInfo, SinkContext, SinkInfo, SinkType};
pub use null::NullSink;
pub use wav::WavSink;

use crate::config::SinkBackend;
use crate::error::{SinkError, SinkResult};
use crate::types::StreamFormat;

/// Capacity of the released-tag queue; far above the buffers in flight
pub const RELEASE_QUEUE_CAPACITY: usize = 64;

/// Consumer side of a sink stream
pub trait Sink: Send {
    /// Open the stream; must be called before `enqueue`
    fn open_stream(&mut self, sample_rate: u32, format: StreamFormat) -> SinkResult<()>;

    /// Queue one interleaved buffer identified by `tag`
    fn enqueue(&mut self, tag: u64, samples: &[i16]) -> SinkResult<()>;

    /// Move the tags of finished buffers into `out`
    fn drain_released(&mut self, out: &mut Vec<u64>);

    /// Frames queued but not yet played
    fn queued_frames(&self) -> usize;

    /// Drop queued buffers; their tags are not released
    fn flush(&mut self);

    /// Stream layout, once open
    fn format(&self) -> Option<StreamFormat>;
}

/// Producer/consumer pair carrying released buffer tags
pub fn release_queue() -> (rtrb::Producer<u64>, rtrb::Consumer<u64>) {
    rtrb::RingBuffer::new(RELEASE_QUEUE_CAPACITY)
}

/// Push a released tag, logging if the driver has fallen far behind
pub(crate) fn release_tag(producer: &mut rtrb::Producer<u64>, tag: u64) {
    if producer.push(tag).is_err() {
        log::warn!("Release queue full, dropping buffer tag {}", tag);
    }
}

pub(crate) fn drain_tags(consumer: &mut rtrb::Consumer<u64>, out: &mut Vec<u64>) {
    while let Ok(tag) = consumer.pop() {
        out.push(tag);
    }
}

/// Build the sink selected in the configuration
pub fn create_sink(backend: &SinkBackend) -> SinkResult<Box<dyn Sink>> {
    match backend {
        SinkBackend::Null => Ok(Box::new(NullSink::new())),
        SinkBackend::Wav { path } => Ok(Box::new(WavSink::new(path))),
        #[cfg(feature = "cpal-backend")]
        SinkBackend::Cpal => Ok(Box::new(CpalSink::new())),
        #[cfg(not(feature = "cpal-backend"))]
        SinkBackend::Cpal => Err(SinkError::NoDevice(
            "built without the cpal-backend feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_queue_round_trip() {
        let (mut producer, mut consumer) = release_queue();
        release_tag(&mut producer, 7);
        release_tag(&mut producer, 9);
        let mut tags = Vec::new();
        drain_tags(&mut consumer, &mut tags);
        assert_eq!(tags, vec![7, 9]);
    }

    #[test]
    fn test_create_null_sink() {
        let sink = create_sink(&SinkBackend::Null).unwrap();
        assert!(sink.format().is_none());
    }
}
