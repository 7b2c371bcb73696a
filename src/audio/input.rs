//! Microphone audio input
//!
//! cpal streams cannot move between threads on every host, so each start
//! builds the stream on a dedicated `framemux-audio` thread that owns it
//! until stop.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Sender};

use super::device::open_input_device;
use crate::errors::FramemuxError;
use crate::output::{AudioSettings, FileType};
use crate::session::{AudioInput, AudioSamples, AudioSink};
use crate::timing::MonotonicClock;

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Captures interleaved f32 PCM from an input device
pub struct MicrophoneInput {
    device_id: Option<String>,
    sample_rate: u32,
    channels: u16,
    clock: Arc<dyn MonotonicClock>,
    sink: Arc<Mutex<Option<AudioSink>>>,
    worker: Mutex<Option<Worker>>,
}

impl MicrophoneInput {
    /// `device_id` of `None` uses the system default input. Rates other than
    /// 44.1 and 48 kHz and channel counts other than 1 and 2 fall back to the
    /// device's defaults when the stream is built.
    pub fn new(
        device_id: Option<String>,
        sample_rate: u32,
        channels: u16,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        Self {
            device_id,
            sample_rate,
            channels,
            clock,
            sink: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn spawn(&self) -> Result<Worker, FramemuxError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), FramemuxError>>(1);
        let device_id = self.device_id.clone();
        let (sample_rate, channels) = (self.sample_rate, self.channels);
        let clock = self.clock.clone();
        let sink = self.sink.clone();

        let handle = std::thread::Builder::new()
            .name("framemux-audio".into())
            .spawn(move || {
                let stream = match build_stream(device_id.as_deref(), sample_rate, channels, clock, sink)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(FramemuxError::Audio(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Disconnect or an explicit stop both end the stream
                let _ = stop_rx.recv();
                let _ = stream.pause();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Worker {
                stop: stop_tx,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(FramemuxError::Audio("audio thread exited during start".into()))
            }
        }
    }
}

fn build_stream(
    device_id: Option<&str>,
    sample_rate: u32,
    channels: u16,
    clock: Arc<dyn MonotonicClock>,
    sink: Arc<Mutex<Option<AudioSink>>>,
) -> Result<cpal::Stream, FramemuxError> {
    let device = open_input_device(device_id)?;
    let supported = device
        .default_input_config()
        .map_err(|e| FramemuxError::Audio(format!("No supported config: {}", e)))?;

    let sample_rate = if sample_rate == 48000 || sample_rate == 44100 {
        sample_rate
    } else {
        supported.sample_rate().0
    };
    let channels = if channels == 1 || channels == 2 {
        channels
    } else {
        supported.channels()
    };
    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let sink = sink.lock().unwrap_or_else(PoisonError::into_inner).clone();
                if let Some(sink) = sink {
                    sink(AudioSamples::new(
                        data.to_vec(),
                        sample_rate,
                        channels,
                        clock.now(),
                    ));
                }
            },
            |err| log::error!("Audio capture error: {}", err),
            None,
        )
        .map_err(|e| FramemuxError::Audio(format!("Failed to build stream: {}", e)))
}

impl AudioInput for MicrophoneInput {
    fn start(&self) -> Result<(), FramemuxError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_none() {
            *worker = Some(self.spawn()?);
        }
        Ok(())
    }

    fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }

    fn set_sink(&self, sink: Option<AudioSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn recommended_settings(&self, file_type: FileType) -> AudioSettings {
        AudioSettings {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_rate: match file_type {
                FileType::Mobile3gpp => 64_000,
                _ => 128_000,
            },
        }
    }
}

impl Drop for MicrophoneInput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::PTSClock;

    #[test]
    fn test_recommended_settings() {
        let input = MicrophoneInput::new(None, 44100, 1, Arc::new(PTSClock::new()));
        let settings = input.recommended_settings(FileType::Mp4);
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.channels, 1);
        assert_eq!(input.recommended_settings(FileType::Mobile3gpp).bit_rate, 64_000);
    }

    #[test]
    fn test_start_stop_idempotent() {
        // Only exercises the stream when an input device exists
        let input = MicrophoneInput::new(None, 48000, 2, Arc::new(PTSClock::new()));
        if input.start().is_ok() {
            assert!(input.start().is_ok());
            assert!(input.is_running());
        }
        input.stop();
        input.stop();
        assert!(!input.is_running());
    }
}
