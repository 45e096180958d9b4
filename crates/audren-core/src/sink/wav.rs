//! Sink writing the PCM16 stream to a WAV file

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{drain_tags, release_queue, release_tag, Sink};
use crate::error::{SinkError, SinkResult};
use crate::types::StreamFormat;

pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    format: Option<StreamFormat>,
    producer: rtrb::Producer<u64>,
    consumer: rtrb::Consumer<u64>,
}

impl WavSink {
    /// The file is created when the stream opens
    pub fn new(path: impl AsRef<Path>) -> Self {
        let (producer, consumer) = release_queue();
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            format: None,
            producer,
            consumer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header sizes and close the file
    pub fn finalize(&mut self) -> SinkResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!("WAV sink closed: {}", self.path.display());
        }
        Ok(())
    }
}

impl Sink for WavSink {
    fn open_stream(&mut self, sample_rate: u32, format: StreamFormat) -> SinkResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let spec = WavSpec {
            channels: format.channels() as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        self.writer = Some(WavWriter::create(&self.path, spec)?);
        self.format = Some(format);
        log::info!(
            "WAV sink open: {} ({} channels at {}Hz)",
            self.path.display(),
            format.channels(),
            sample_rate
        );
        Ok(())
    }

    fn enqueue(&mut self, tag: u64, samples: &[i16]) -> SinkResult<()> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotOpen)?;
        let mut samples_writer = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            samples_writer.write_sample(sample);
        }
        samples_writer.flush()?;
        release_tag(&mut self.producer, tag);
        Ok(())
    }

    fn drain_released(&mut self, out: &mut Vec<u64>) {
        drain_tags(&mut self.consumer, out);
    }

    fn queued_frames(&self) -> usize {
        0
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                log::warn!("WAV sink flush failed: {}", e);
            }
        }
    }

    fn format(&self) -> Option<StreamFormat> {
        self.format
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::warn!("Failed to finalize WAV file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_readable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("frames.wav");

        let mut sink = WavSink::new(&path);
        sink.open_stream(48000, StreamFormat::Stereo16).unwrap();
        sink.enqueue(5, &[1, -1, 2, -2]).unwrap();
        sink.finalize().unwrap();

        let mut tags = Vec::new();
        sink.drain_released(&mut tags);
        assert_eq!(tags, vec![5]);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 2, -2]);
    }
}
