//! Audio input device enumeration
//!
//! Devices come back default first, then by name. cpal has no stable device
//! identifiers on every host, so ids are synthesized from the enumeration
//! index and a hash of the device name.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::errors::FramemuxError;

/// Audio input device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    /// Default sample rate in Hz
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

fn synthetic_id(index: usize, name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!("audio_{}_{:08x}", index, hasher.finish() & 0xFFFF_FFFF)
}

fn audio_error(context: &str, error: impl std::fmt::Display) -> FramemuxError {
    FramemuxError::Audio(format!("{}: {}", context, error))
}

/// List all available audio input devices
pub fn list_audio_devices() -> Result<Vec<AudioDevice>, FramemuxError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices: Vec<AudioDevice> = host
        .input_devices()
        .map_err(|e| audio_error("Failed to enumerate audio devices", e))?
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(AudioDevice {
                id: synthetic_id(index, &name),
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
            })
        })
        .collect();

    sort_devices(&mut devices);
    Ok(devices)
}

fn sort_devices(devices: &mut [AudioDevice]) {
    devices.sort_by(|a, b| match (a.is_default, b.is_default) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Get the default audio input device
pub fn get_default_audio_device() -> Result<AudioDevice, FramemuxError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| FramemuxError::Audio("No default audio input device".into()))?;
    let name = device
        .name()
        .map_err(|e| audio_error("Failed to get device name", e))?;
    let config = device
        .default_input_config()
        .map_err(|e| audio_error("Failed to get device config", e))?;

    Ok(AudioDevice {
        id: synthetic_id(0, &name),
        name,
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
        is_default: true,
    })
}

/// Resolve a device id or name to the cpal device
///
/// `None`, `""` and `"default"` select the system default input.
pub(crate) fn open_input_device(device_id: Option<&str>) -> Result<cpal::Device, FramemuxError> {
    let host = cpal::default_host();
    match device_id {
        None | Some("") | Some("default") => host
            .default_input_device()
            .ok_or_else(|| FramemuxError::Audio("No default audio input device".into())),
        Some(id) => host
            .input_devices()
            .map_err(|e| audio_error("Failed to enumerate audio devices", e))?
            .enumerate()
            .find(|(index, device)| {
                device
                    .name()
                    .map(|name| name == id || synthetic_id(*index, &name) == id)
                    .unwrap_or(false)
            })
            .map(|(_, device)| device)
            .ok_or_else(|| FramemuxError::Audio(format!("Audio device not found: {}", id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, is_default: bool) -> AudioDevice {
        AudioDevice {
            id: synthetic_id(0, name),
            name: name.into(),
            sample_rate: 48000,
            channels: 2,
            is_default,
        }
    }

    #[test]
    fn test_default_sorts_first() {
        let mut devices = vec![device("b", false), device("z", true), device("a", false)];
        sort_devices(&mut devices);
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["z", "a", "b"]);
    }

    #[test]
    fn test_synthetic_id_is_stable() {
        assert_eq!(synthetic_id(3, "Mic"), synthetic_id(3, "Mic"));
        assert!(synthetic_id(3, "Mic").starts_with("audio_3_"));
        assert_ne!(synthetic_id(3, "Mic"), synthetic_id(3, "Line In"));
    }

    #[test]
    fn test_list_audio_devices_no_panic() {
        // Hosts without audio hardware just return an error or an empty list
        let _ = list_audio_devices();
    }
}
