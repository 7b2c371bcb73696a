//! Configuration management for framemux
//!
//! Provides loading, saving and validation of pool, producer, recording and
//! audio settings. Files are TOML; [`FramemuxConfig::load_layered`] also
//! applies `FRAMEMUX__SECTION__KEY` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_ALLOCATION_THRESHOLD;
use crate::errors::FramemuxError;
use crate::gpu::{AlphaType, ConversionOptions};
use crate::output::{
    AudioSettings, Codec, FileType, RecordingQuality, ScalingMode, VideoSettings,
};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FramemuxConfig {
    pub pool: PoolConfig,
    pub producer: ProducerConfig,
    pub recording: RecordingConfig,
    pub audio: AudioConfig,
}

/// Pixel buffer pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Live buffers per pool before allocation fails, 0 for unlimited
    pub allocation_threshold: usize,
}

/// Frame producer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Keep extended range surfaces in a 10-bit wide gamut format
    pub allow_wide_gamut: bool,
    pub destination_alpha: AlphaType,
}

/// Video recording defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub file_type: FileType,
    pub quality: RecordingQuality,
    /// Overrides the quality preset's bit rate
    pub bit_rate: Option<u32>,
    /// Overrides the quality preset's key frame interval
    pub max_key_frame_interval: Option<u32>,
    pub expected_frame_rate: f64,
    pub scaling_mode: ScalingMode,
    /// Output size, `None` to use the surface size
    pub size: Option<[u32; 2]>,
    pub output_directory: String,
}

/// Microphone configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// Device id or name, `None` for the system default
    pub device_id: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            allocation_threshold: DEFAULT_ALLOCATION_THRESHOLD,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        let options = ConversionOptions::default();
        Self {
            allow_wide_gamut: options.allow_wide_gamut,
            destination_alpha: options.destination_alpha,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            file_type: FileType::Mp4,
            quality: RecordingQuality::Medium,
            bit_rate: None,
            max_key_frame_interval: None,
            expected_frame_rate: 30.0,
            scaling_mode: ScalingMode::ResizeAspectFill,
            size: None,
            output_directory: "./recordings".to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let audio = AudioSettings::default();
        Self {
            enabled: false,
            device_id: None,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            bit_rate: audio.bit_rate,
        }
    }
}

impl FramemuxConfig {
    /// Load configuration from a TOML file, or defaults if it does not exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FramemuxError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| FramemuxError::Config(format!("Failed to read config file: {}", e)))?;
        let config: FramemuxConfig = toml::from_str(&contents)
            .map_err(|e| FramemuxError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load `path` (optional) merged with `FRAMEMUX__SECTION__KEY` environment variables
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, FramemuxError> {
        let path = path.as_ref();
        let config = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("FRAMEMUX")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|layered| layered.try_deserialize::<FramemuxConfig>())
            .map_err(|e| FramemuxError::Config(format!("Failed to load layered config: {}", e)))?;

        config.validate().map_err(FramemuxError::Config)?;
        log::debug!("Loaded layered configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration as pretty TOML, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FramemuxError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FramemuxError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| FramemuxError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, toml_string)
            .map_err(|e| FramemuxError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("framemux.toml")
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let recording = &self.recording;
        if !(recording.expected_frame_rate > 0.0 && recording.expected_frame_rate <= 240.0) {
            return Err("Expected frame rate must be in (0, 240]".to_string());
        }
        if recording.bit_rate == Some(0) {
            return Err("Bit rate must be positive".to_string());
        }
        if recording.max_key_frame_interval == Some(0) {
            return Err("Key frame interval must be positive".to_string());
        }
        if let Some([width, height]) = recording.size {
            if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
                return Err(format!("Output size {}x{} must be non-empty and even", width, height));
            }
        }
        if recording.output_directory.is_empty() {
            return Err("Output directory must not be empty".to_string());
        }

        let audio = &self.audio;
        if audio.channels == 0 || audio.channels > 2 {
            return Err("Audio channels must be 1 or 2".to_string());
        }
        if !(8_000..=192_000).contains(&audio.sample_rate) {
            return Err("Audio sample rate must be between 8 and 192 kHz".to_string());
        }
        if audio.bit_rate == 0 {
            return Err("Audio bit rate must be positive".to_string());
        }

        Ok(())
    }

    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            allow_wide_gamut: self.producer.allow_wide_gamut,
            destination_alpha: self.producer.destination_alpha,
        }
    }

    /// Video settings from the recording section
    pub fn video_settings(&self) -> VideoSettings {
        let recording = &self.recording;
        let mut settings = VideoSettings::from_quality(recording.quality, recording.expected_frame_rate)
            .with_scaling_mode(recording.scaling_mode);
        settings.file_type = recording.file_type;
        if let Some([width, height]) = recording.size {
            settings = settings.with_size(width, height);
        }
        if let Codec::H264(properties) = &mut settings.codec {
            let compression = &mut properties.compression;
            if let Some(bit_rate) = recording.bit_rate {
                compression.average_bit_rate = Some(bit_rate);
            }
            if let Some(interval) = recording.max_key_frame_interval {
                compression.max_key_frame_interval = Some(interval);
            }
        }
        settings
    }

    /// Audio settings, if audio is enabled
    pub fn audio_settings(&self) -> Option<AudioSettings> {
        self.audio.enabled.then(|| AudioSettings {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            bit_rate: self.audio.bit_rate,
        })
    }

    /// Timestamped path for a new recording in the output directory
    pub fn output_path(&self, prefix: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(&self.recording.output_directory).join(format!(
            "{}_{}.{}",
            prefix,
            stamp,
            self.recording.file_type.extension()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FramemuxConfig::default();
        assert_eq!(config.pool.allocation_threshold, 10);
        assert!(!config.producer.allow_wide_gamut);
        assert_eq!(config.producer.destination_alpha, AlphaType::Opaque);
        assert_eq!(config.recording.file_type, FileType::Mp4);
        assert_eq!(config.audio.sample_rate, 48000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = FramemuxConfig::default();
        bad.recording.size = Some([641, 480]);
        assert!(bad.validate().is_err());

        let mut bad = FramemuxConfig::default();
        bad.audio.channels = 0;
        assert!(bad.validate().is_err());

        let mut bad = FramemuxConfig::default();
        bad.recording.expected_frame_rate = 0.0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_video_settings_apply_overrides() {
        let mut config = FramemuxConfig::default();
        config.recording.file_type = FileType::Mov;
        config.recording.bit_rate = Some(1_000_000);
        config.recording.size = Some([640, 360]);

        let settings = config.video_settings();
        assert_eq!(settings.file_type, FileType::Mov);
        assert_eq!(settings.size, Some((640, 360)));
        let Codec::H264(properties) = &settings.codec else {
            panic!("expected h264");
        };
        assert_eq!(properties.compression.average_bit_rate, Some(1_000_000));
        assert_eq!(properties.compression.max_key_frame_interval, Some(30));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FramemuxConfig = toml::from_str("[pool]\nallocation_threshold = 3\n").unwrap();
        assert_eq!(config.pool.allocation_threshold, 3);
        assert_eq!(config.recording, RecordingConfig::default());
    }

    #[test]
    fn test_toml_format() {
        let toml_string = toml::to_string_pretty(&FramemuxConfig::default()).unwrap();
        assert!(toml_string.contains("[pool]"));
        assert!(toml_string.contains("[producer]"));
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("[audio]"));
        assert!(toml_string.contains("file_type = \"mp4\""));
    }

    #[test]
    fn test_audio_settings_only_when_enabled() {
        let mut config = FramemuxConfig::default();
        assert!(config.audio_settings().is_none());
        config.audio.enabled = true;
        assert_eq!(config.audio_settings(), Some(AudioSettings::default()));
    }

    #[test]
    fn test_output_path_extension() {
        let path = FramemuxConfig::default().output_path("take");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(path.starts_with("./recordings"));
    }
}
