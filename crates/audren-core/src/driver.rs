//! Frame driver
//!
//! Keeps [`NUM_BUFFERS`] tagged buffers in flight on a sink. Every timer tick
//! pulls the tags the sink has released and refills each one with a freshly
//! rendered frame. The tick re-arms itself at a fraction of the frame period,
//! so the renderer stays just ahead of the sink's consumption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};

use crate::error::{SinkError, SinkResult};
use crate::renderer::AudioRenderer;
use crate::sink::Sink;
use crate::types::StreamFormat;

/// Buffers queued on the sink at any time
pub const NUM_BUFFERS: u64 = 2;

/// Timer callback; returns the delay until the next firing, or `None` to stop
pub type TimerCallback = Box<dyn FnMut() -> Option<Duration> + Send>;

/// Re-arming one-shot timer the driver runs its tick on
pub trait Timer: Send {
    /// Fire `callback` after `delay`, then after every delay it returns
    fn start(&mut self, delay: Duration, callback: TimerCallback) -> std::io::Result<()>;

    /// Stop firing; an in-progress callback completes first
    fn cancel(&mut self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Timers
// ─────────────────────────────────────────────────────────────────────────────

/// Timer backed by one worker thread
#[derive(Default)]
pub struct ThreadTimer {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Timer for ThreadTimer {
    fn start(&mut self, delay: Duration, mut callback: TimerCallback) -> std::io::Result<()> {
        self.cancel();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("audren-frame-timer".into())
            .spawn(move || {
                let mut delay = delay;
                loop {
                    match stop_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => match callback() {
                            Some(next) => delay = next,
                            None => break,
                        },
                        // Stop requested or timer dropped
                        _ => break,
                    }
                }
                log::debug!("Frame timer stopped");
            })?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Frame timer thread panicked");
            }
        }
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timer fired explicitly; clones share the armed callback
#[derive(Clone, Default)]
pub struct ManualTimer {
    armed: Arc<Mutex<Option<(Duration, TimerCallback)>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<(Duration, TimerCallback)>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay the armed callback is waiting for
    pub fn pending(&self) -> Option<Duration> {
        self.lock().as_ref().map(|(delay, _)| *delay)
    }

    /// Run the armed callback once; `false` if nothing is armed
    pub fn fire(&self) -> bool {
        let Some((_, mut callback)) = self.lock().take() else {
            return false;
        };
        if let Some(next) = callback() {
            let mut armed = self.lock();
            // A restart during the callback wins
            if armed.is_none() {
                *armed = Some((next, callback));
            }
        }
        true
    }
}

impl Timer for ManualTimer {
    fn start(&mut self, delay: Duration, callback: TimerCallback) -> std::io::Result<()> {
        *self.lock() = Some((delay, callback));
        Ok(())
    }

    fn cancel(&mut self) {
        self.lock().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Delay between ticks for a stream consumed at `sample_rate` in frames of
/// `sample_count`
pub fn reschedule_interval(sample_rate: u32, sample_count: u32) -> Duration {
    let frame_samples = (sample_count * (sample_count / 240).max(1)).max(1);
    let consume_rate = (sample_rate / frame_samples).max(1);
    let ms = (1000 / consume_rate / NUM_BUFFERS as u32).saturating_sub(1).max(1);
    Duration::from_millis(ms as u64)
}

/// State the timer callback shares with the driver
struct DriverCore {
    renderer: Arc<AudioRenderer>,
    sink: Mutex<Box<dyn Sink>>,
    channels: usize,
    streaming: AtomicBool,
    frame: Mutex<Vec<i16>>,
}

impl DriverCore {
    fn sink(&self) -> MutexGuard<'_, Box<dyn Sink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render one frame and hand it to the sink under `tag`
    fn queue_mixed_buffer(&self, sink: &mut dyn Sink, tag: u64) {
        let mut frame = self.frame.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.renderer.render_frame(self.channels, &mut frame);
        if let Err(e) = sink.enqueue(tag, &frame) {
            log::warn!("Sink rejected buffer {}: {}", tag, e);
        }
    }

    fn tick(&self) {
        if !self.streaming.load(Ordering::Acquire) {
            return;
        }
        let mut sink = self.sink();
        let mut released = Vec::new();
        sink.drain_released(&mut released);
        for tag in released {
            self.queue_mixed_buffer(&mut **sink, tag);
        }
    }
}

pub struct FrameDriver {
    core: Arc<DriverCore>,
    timer: Box<dyn Timer>,
    interval: Duration,
}

impl FrameDriver {
    /// Drive `renderer` into `sink` with `channels` output channels
    pub fn new(renderer: Arc<AudioRenderer>, sink: Box<dyn Sink>, channels: usize, timer: Box<dyn Timer>) -> Self {
        let params = renderer.params();
        let interval = reschedule_interval(params.sample_rate, params.sample_count);
        let frame = vec![0; renderer.frame_len(channels)];
        Self {
            core: Arc::new(DriverCore {
                renderer,
                sink: Mutex::new(sink),
                channels,
                streaming: AtomicBool::new(false),
                frame: Mutex::new(frame),
            }),
            timer,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_streaming(&self) -> bool {
        self.core.streaming.load(Ordering::Acquire)
    }

    /// Open the stream, queue both buffers and arm the tick
    pub fn start(&mut self) -> SinkResult<()> {
        if self.is_streaming() {
            return Ok(());
        }
        let core = &self.core;
        let format = StreamFormat::from_channels(core.channels);
        if format.channels() != core.channels {
            return Err(SinkError::UnsupportedFormat {
                channels: core.channels,
                sample_rate: core.renderer.params().sample_rate,
            });
        }

        {
            let mut sink = core.sink();
            if sink.format().is_none() {
                sink.open_stream(core.renderer.params().sample_rate, format)?;
            }
            core.renderer.start();
            core.streaming.store(true, Ordering::Release);
            for tag in 0..NUM_BUFFERS {
                core.queue_mixed_buffer(&mut **sink, tag);
            }
        }

        let tick_core = Arc::clone(core);
        let interval = self.interval;
        self.timer.start(
            interval,
            Box::new(move || {
                tick_core.tick();
                Some(interval)
            }),
        )?;
        log::info!(
            "Frame driver started: {} channels, tick every {:?}",
            core.channels,
            interval
        );
        Ok(())
    }

    /// Stop ticking and drop whatever the sink still holds
    pub fn stop(&mut self) {
        if !self.core.streaming.swap(false, Ordering::AcqRel) {
            return;
        }
        self.timer.cancel();
        self.core.renderer.stop();
        self.core.sink().flush();
        log::info!(
            "Frame driver stopped after {} frames",
            self.core.renderer.elapsed_frame_count()
        );
    }

    /// Run one tick on the caller's thread
    pub fn tick(&self) {
        self.core.tick();
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererParams;
    use crate::memory::VecMemory;
    use crate::sink::NullSink;
    use crossbeam::channel::unbounded;

    fn renderer() -> Arc<AudioRenderer> {
        Arc::new(AudioRenderer::new(RendererParams::default(), Arc::new(VecMemory::new(0, 0))).unwrap())
    }

    #[test]
    fn test_reschedule_interval() {
        // 48kHz / 240 samples: 200 frames/s, 5ms per frame
        assert_eq!(reschedule_interval(48000, 240), Duration::from_millis(1));
        assert_eq!(reschedule_interval(32000, 160), Duration::from_millis(1));
        // 960 samples at 4x weight: 12 frames/s
        assert_eq!(reschedule_interval(48000, 960), Duration::from_millis(40));
    }

    #[test]
    fn test_start_queues_both_buffers() {
        let renderer = renderer();
        let timer = ManualTimer::new();
        let mut driver = FrameDriver::new(Arc::clone(&renderer), Box::new(NullSink::new()), 2, Box::new(timer.clone()));

        driver.start().unwrap();
        assert!(renderer.is_active());
        assert_eq!(renderer.elapsed_frame_count(), 2);
        assert_eq!(timer.pending(), Some(driver.interval()));

        // Null sink releases both tags at once
        assert!(timer.fire());
        assert_eq!(renderer.elapsed_frame_count(), 4);

        driver.stop();
        assert!(!renderer.is_active());
        assert!(!timer.fire());
        assert_eq!(renderer.elapsed_frame_count(), 4);
    }

    #[test]
    fn test_tick_without_stream_does_nothing() {
        let renderer = renderer();
        let driver = FrameDriver::new(Arc::clone(&renderer), Box::new(NullSink::new()), 2, Box::new(ManualTimer::new()));
        driver.tick();
        assert_eq!(renderer.elapsed_frame_count(), 0);
    }

    #[test]
    fn test_rejects_unsupported_layout() {
        let mut driver = FrameDriver::new(renderer(), Box::new(NullSink::new()), 4, Box::new(ManualTimer::new()));
        assert!(matches!(driver.start(), Err(SinkError::UnsupportedFormat { channels: 4, .. })));
    }

    #[test]
    fn test_thread_timer_rearms_until_none() {
        let (tx, rx) = unbounded();
        let mut remaining = 3;
        let mut timer = ThreadTimer::new();
        timer
            .start(
                Duration::from_millis(1),
                Box::new(move || {
                    let _ = tx.send(());
                    remaining -= 1;
                    (remaining > 0).then_some(Duration::from_millis(1))
                }),
            )
            .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        timer.cancel();
        assert!(rx.try_recv().is_err());
    }
}
