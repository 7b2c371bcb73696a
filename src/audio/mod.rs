//! Microphone capture using cpal
//!
//! Submodules:
//! - `device`: audio input enumeration
//! - `input`: [`MicrophoneInput`], an [`AudioInput`](crate::session::AudioInput)
//!   that timestamps PCM batches with the session clock

mod device;
mod input;

pub use device::{get_default_audio_device, list_audio_devices, AudioDevice};
pub use input::MicrophoneInput;
