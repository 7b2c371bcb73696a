//! Testing utilities for framemux
//!
//! Synthetic frames and surfaces, scriptable writers and muxers, and
//! manually driven inputs and clocks, so pipelines can be exercised without
//! a GPU, a display or a microphone.

mod doubles;
pub mod synthetic_data;

pub use doubles::{
    CollectingConsumer, ManualAudioInput, ManualClock, ManualVideoInput, MemoryWriter,
    MemoryWriterFactory, MuxerCall, RecordingMuxer, WriterEvent, WriterRecord,
};
pub use synthetic_data::{
    fill_gradient, synthetic_audio_samples, synthetic_video_frame, SyntheticSurface,
};
