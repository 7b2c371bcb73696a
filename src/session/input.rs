//! Inputs feeding a media session and the consumers it fans out to

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::errors::{FramemuxError, ProducerError};
use crate::gpu::ColorProperties;
use crate::output::{AudioSettings, FileType, ImageOrientation, VideoTransform};
use crate::producer::FrameProducer;

/// Receives every produced frame (or the error that replaced it) with its time
pub type VideoSink = Arc<dyn Fn(Result<PixelBuffer, ProducerError>, f64) + Send + Sync>;

pub type AudioSink = Arc<dyn Fn(AudioSamples) + Send + Sync>;

/// Interleaved PCM batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSamples {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Presentation time of the first frame, seconds
    pub timestamp: f64,
}

impl AudioSamples {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp: f64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp,
        }
    }

    pub fn silence(frames: usize, sample_rate: u32, channels: u16, timestamp: f64) -> Self {
        Self::new(
            vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
            timestamp,
        )
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// What a video input produces
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub size: (u32, u32),
    pub transform: VideoTransform,
    pub orientation: ImageOrientation,
    pub color_properties: ColorProperties,
}

pub trait VideoInput: Send + Sync {
    fn start(&self) -> Result<(), FramemuxError>;

    fn stop(&self);

    /// Install or clear the sink frames are delivered to
    fn set_sink(&self, sink: Option<VideoSink>);

    fn format(&self) -> VideoFormat;
}

pub trait AudioInput: Send + Sync {
    fn start(&self) -> Result<(), FramemuxError>;

    fn stop(&self);

    fn set_sink(&self, sink: Option<AudioSink>);

    /// Settings for an audio track recorded from this input
    fn recommended_settings(&self, file_type: FileType) -> AudioSettings;
}

/// An input attached to a session
#[derive(Clone)]
pub enum Input {
    Video(Arc<dyn VideoInput>),
    Audio(Arc<dyn AudioInput>),
}

impl Input {
    pub fn start(&self) -> Result<(), FramemuxError> {
        log::info!("Starting {} input", self.kind());
        match self {
            Input::Video(input) => input.start(),
            Input::Audio(input) => input.start(),
        }
    }

    pub fn stop(&self) {
        log::info!("Stopping {} input", self.kind());
        match self {
            Input::Video(input) => input.stop(),
            Input::Audio(input) => input.stop(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Input::Video(_) => "video",
            Input::Audio(_) => "audio",
        }
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Input::{}", self.kind())
    }
}

pub trait VideoConsumer: Send + Sync {
    fn append_video_buffer(&self, buffer: PixelBuffer, time: f64);
}

pub trait AudioConsumer: Send + Sync {
    fn append_audio_samples(&self, samples: &AudioSamples);
}

/// Video input driven by a render loop through a [`FrameProducer`]
pub struct SurfaceVideoInput {
    producer: Arc<FrameProducer>,
    sink: Mutex<Option<VideoSink>>,
    started: AtomicBool,
}

impl SurfaceVideoInput {
    pub fn new(producer: Arc<FrameProducer>) -> Self {
        Self {
            producer,
            sink: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn producer(&self) -> &Arc<FrameProducer> {
        &self.producer
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Produce a frame for the surface presented at `time`
    ///
    /// Does nothing while the input is stopped. Never blocks on the GPU.
    pub fn render(&self, time: f64) {
        if !self.is_started() {
            return;
        }
        let Some(sink) = self.sink.lock().unwrap_or_else(PoisonError::into_inner).clone() else {
            return;
        };

        let completion = sink.clone();
        if let Err(e) = self
            .producer
            .produce(move |result| completion(result, time))
        {
            log::debug!("Frame at {:.3}s not produced: {}", time, e);
            sink(Err(e), time);
        }
    }
}

impl VideoInput for SurfaceVideoInput {
    fn start(&self) -> Result<(), FramemuxError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    fn set_sink(&self, sink: Option<VideoSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn format(&self) -> VideoFormat {
        let surface = self.producer.surface();
        VideoFormat {
            size: surface.drawable_size(),
            transform: surface.transform(),
            orientation: surface.orientation(),
            color_properties: self.producer.color_properties(),
        }
    }
}

impl std::fmt::Debug for SurfaceVideoInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceVideoInput")
            .field("producer", &self.producer)
            .field("started", &self.is_started())
            .finish()
    }
}
