//! Configuration files and environment overrides

use framemux::output::{FileType, RecordingQuality};
use framemux::FramemuxConfig;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("framemux.toml");

    let mut config = FramemuxConfig::default();
    config.pool.allocation_threshold = 4;
    config.recording.file_type = FileType::Mov;
    config.recording.quality = RecordingQuality::High;
    config.recording.size = Some([1280, 720]);
    config.audio.enabled = true;
    config.audio.device_id = Some("audio_0_deadbeef".into());

    config.save_to_file(&path).unwrap();
    let loaded = FramemuxConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let loaded = FramemuxConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded, FramemuxConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[pool\nallocation_threshold = ").unwrap();
    assert!(FramemuxConfig::load_from_file(&path).is_err());
}

#[test]
fn test_layered_file_and_environment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("framemux.toml");
    std::fs::write(
        &path,
        "[recording]\nfile_type = \"mov\"\nexpected_frame_rate = 60.0\n\n[pool]\nallocation_threshold = 6\n",
    )
    .unwrap();

    let from_file = FramemuxConfig::load_layered(&path).unwrap();
    assert_eq!(from_file.recording.file_type, FileType::Mov);
    assert_eq!(from_file.recording.expected_frame_rate, 60.0);
    assert_eq!(from_file.pool.allocation_threshold, 6);
    assert_eq!(from_file.audio, FramemuxConfig::default().audio);

    std::env::set_var("FRAMEMUX__POOL__ALLOCATION_THRESHOLD", "3");
    let layered = FramemuxConfig::load_layered(&path);
    std::env::remove_var("FRAMEMUX__POOL__ALLOCATION_THRESHOLD");

    let layered = layered.unwrap();
    assert_eq!(layered.pool.allocation_threshold, 3);
    assert_eq!(layered.recording.file_type, FileType::Mov);
}

#[test]
fn test_layered_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("framemux.toml");
    std::fs::write(&path, "[audio]\nchannels = 6\n").unwrap();
    assert!(FramemuxConfig::load_layered(&path).is_err());
}
