//! Audio output for the playback controller.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use thiserror::Error;
use tracing::{debug, info};

use super::wav::AudioClip;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to open audio output: {0}")]
    Device(String),

    #[error("clip is not playable: {0}")]
    Decode(#[from] hound::Error),
}

/// Something that can play one clip at a time.
///
/// `start` replaces whatever was playing. Completion is observed by polling
/// `is_finished`.
pub trait AudioOutput: Send + 'static {
    fn start(&mut self, clip: &AudioClip) -> Result<(), OutputError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    /// True once the current clip has played to the end (or nothing is loaded).
    fn is_finished(&self) -> bool;
}

/// Plays clips through the default output device.
pub struct RodioOutput {
    // Kept alive for the lifetime of the output; dropping it silences sinks.
    stream: OutputStream,
    sink: Option<Sink>,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self, OutputError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        info!("Audio output opened");
        Ok(Self { stream, sink: None })
    }
}

impl AudioOutput for RodioOutput {
    fn start(&mut self, clip: &AudioClip) -> Result<(), OutputError> {
        let (channels, sample_rate, samples) = clip.samples()?;
        debug!(
            "Playing clip: {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / sample_rate as f32 / f32::from(channels)
        );

        if let Some(old) = self.sink.take() {
            old.stop();
        }
        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(SamplesBuffer::new(channels, sample_rate, samples));
        self.sink = Some(sink);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map_or(true, Sink::empty)
    }
}
