//! Sink playing through the default CPAL output device
//!
//! `cpal::Stream` cannot cross threads on every platform, so the stream lives
//! on a named worker thread for its whole life. Buffers reach the audio
//! callback through a lock-free queue; the callback releases each tag once
//! the last sample of its buffer has been copied out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Sender};

use super::{drain_tags, release_queue, release_tag, Sink};
use crate::error::{SinkError, SinkResult};
use crate::types::StreamFormat;

/// Buffers the callback may hold before `enqueue` reports backpressure
const BUFFER_QUEUE_CAPACITY: usize = 16;

struct TaggedBuffer {
    tag: u64,
    samples: Vec<i16>,
}

/// Callback-side playback cursor
struct Playback {
    buffers: rtrb::Consumer<TaggedBuffer>,
    released: rtrb::Producer<u64>,
    current: Option<(TaggedBuffer, usize)>,
    queued_samples: Arc<AtomicUsize>,
}

impl Playback {
    fn next_sample(&mut self) -> i16 {
        loop {
            if let Some((buffer, position)) = self.current.as_mut() {
                if let Some(&sample) = buffer.samples.get(*position) {
                    *position += 1;
                    self.queued_samples.fetch_sub(1, Ordering::Relaxed);
                    return sample;
                }
                let tag = buffer.tag;
                self.current = None;
                release_tag(&mut self.released, tag);
            }
            match self.buffers.pop() {
                Ok(buffer) => self.current = Some((buffer, 0)),
                Err(_) => return 0,
            }
        }
    }
}

pub struct CpalSink {
    format: Option<StreamFormat>,
    buffers: Option<rtrb::Producer<TaggedBuffer>>,
    released: rtrb::Consumer<u64>,
    queued_samples: Arc<AtomicUsize>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn new() -> Self {
        let (_, released) = release_queue();
        Self {
            format: None,
            buffers: None,
            released,
            queued_samples: Arc::new(AtomicUsize::new(0)),
            stop_tx: None,
            worker: None,
        }
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("CPAL sink worker panicked");
            }
        }
        self.buffers = None;
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

fn build_stream(
    sample_rate: u32,
    format: StreamFormat,
    mut playback: Playback,
) -> SinkResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SinkError::NoDevice("no default output device".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let config = cpal::StreamConfig {
        channels: format.channels() as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = playback.next_sample() as f32 / 32768.0;
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SinkError::StreamBuildError(e.to_string()))
}

impl Sink for CpalSink {
    fn open_stream(&mut self, sample_rate: u32, format: StreamFormat) -> SinkResult<()> {
        self.close();

        let (buffer_tx, buffer_rx) = rtrb::RingBuffer::new(BUFFER_QUEUE_CAPACITY);
        let (released_tx, released_rx) = release_queue();
        let playback = Playback {
            buffers: buffer_rx,
            released: released_tx,
            current: None,
            queued_samples: self.queued_samples.clone(),
        };

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<SinkResult<()>>(1);
        let worker = std::thread::Builder::new()
            .name("audren-cpal-sink".to_string())
            .spawn(move || {
                let stream = match build_stream(sample_rate, format, playback) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SinkError::StreamPlayError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until asked to stop
                let _ = stop_rx.recv();
                log::debug!("CPAL sink worker stopping");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(SinkError::StreamBuildError("sink worker exited".to_string()));
            }
        }

        log::info!("CPAL sink open: {} channels at {}Hz", format.channels(), sample_rate);
        self.buffers = Some(buffer_tx);
        self.released = released_rx;
        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        self.format = Some(format);
        Ok(())
    }

    fn enqueue(&mut self, tag: u64, samples: &[i16]) -> SinkResult<()> {
        let buffers = self.buffers.as_mut().ok_or(SinkError::NotOpen)?;
        let buffer = TaggedBuffer {
            tag,
            samples: samples.to_vec(),
        };
        self.queued_samples.fetch_add(samples.len(), Ordering::Relaxed);
        if buffers.push(buffer).is_err() {
            self.queued_samples.fetch_sub(samples.len(), Ordering::Relaxed);
            log::warn!("CPAL sink queue full, dropping buffer {}", tag);
        }
        Ok(())
    }

    fn drain_released(&mut self, out: &mut Vec<u64>) {
        drain_tags(&mut self.released, out);
    }

    fn queued_frames(&self) -> usize {
        let channels = self.format.map_or(1, StreamFormat::channels);
        self.queued_samples.load(Ordering::Relaxed) / channels
    }

    fn flush(&mut self) {
        // Closing drops the callback and everything still queued in it
        if let Some(format) = self.format {
            log::debug!("Flushing CPAL sink ({} channels)", format.channels());
        }
        self.close();
        self.queued_samples.store(0, Ordering::Relaxed);
        self.format = None;
    }

    fn format(&self) -> Option<StreamFormat> {
        self.format
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}
