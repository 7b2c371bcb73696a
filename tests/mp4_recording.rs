//! End-to-end MP4 recording from a synthetic surface
//!
//! Run with: cargo test --features recording --test mp4_recording

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use framemux::gpu::{SoftwareDevice, SurfaceFormat};
use framemux::output::{FileType, RecordingState, RecordingSummary, VideoSettings};
use framemux::recording::Mp4WriterFactory;
use framemux::testing::{ManualClock, SyntheticSurface};
use framemux::{RecordingHandle, SurfaceRecorder};
use tempfile::TempDir;

const FRAME: f64 = 1.0 / 30.0;

struct Rig {
    surface: Arc<SyntheticSurface>,
    device: Arc<SoftwareDevice>,
    clock: Arc<ManualClock>,
    recorder: SurfaceRecorder,
}

impl Rig {
    fn new(format: SurfaceFormat) -> Self {
        let surface = Arc::new(SyntheticSurface::new(64, 48, format).unwrap());
        let device = Arc::new(SoftwareDevice::new().unwrap());
        let clock = Arc::new(ManualClock::new());
        let recorder = SurfaceRecorder::builder(surface.clone())
            .device(device.clone())
            .clock(clock.clone())
            .writer_factory(Arc::new(Mp4WriterFactory::new().with_title("framemux test")))
            .build()
            .unwrap();
        Self {
            surface,
            device,
            clock,
            recorder,
        }
    }

    /// Render, convert and deliver one frame before returning
    fn frame(&self, time: f64) {
        self.surface.render_next().unwrap();
        self.clock.set(time);
        self.recorder.render(time);
        self.device.wait_idle();
        self.recorder.session().queue().barrier();
    }
}

fn finish(handle: &RecordingHandle) -> RecordingSummary {
    let (tx, rx) = mpsc::channel();
    handle.finish(move |summary| {
        let _ = tx.send(summary);
    });
    rx.recv_timeout(Duration::from_secs(30)).unwrap()
}

#[test]
fn test_record_mp4_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("take.mp4");
    let rig = Rig::new(SurfaceFormat::Bgra8Unorm);

    let handle = rig
        .recorder
        .start_video_recording(&path, VideoSettings::new(FileType::Mp4), None)
        .unwrap();
    handle.resume();
    for i in 0..15 {
        rig.frame(i as f64 * FRAME);
    }

    let summary = finish(&handle);
    assert_eq!(summary.state, RecordingState::Finished);
    assert_eq!(summary.video_frames, 15);
    assert_eq!(rig.recorder.error().get(), None);

    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.len() > 100);
    assert_eq!(&bytes[4..8], b"ftyp");
}

#[test]
fn test_paused_frames_are_not_written() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("paused.mp4");
    let rig = Rig::new(SurfaceFormat::Bgr10Xr);

    let handle = rig
        .recorder
        .start_video_recording(&path, VideoSettings::new(FileType::Mp4), None)
        .unwrap();
    handle.resume();
    let mut time = 0.0;
    for _ in 0..5 {
        rig.frame(time);
        time += FRAME;
    }

    handle.pause();
    for _ in 0..10 {
        rig.frame(time);
        time += FRAME;
    }
    handle.resume();
    for _ in 0..5 {
        rig.frame(time);
        time += FRAME;
    }

    let summary = finish(&handle);
    assert_eq!(summary.state, RecordingState::Finished);
    assert_eq!(summary.video_frames, 10);
    assert!(summary.duration < 12.0 * FRAME, "duration {}", summary.duration);
    assert!(path.exists());
}

#[test]
fn test_cancel_removes_partial_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("canceled.mp4");
    let rig = Rig::new(SurfaceFormat::Bgra8Unorm);

    let handle = rig
        .recorder
        .start_video_recording(&path, VideoSettings::new(FileType::Mp4), None)
        .unwrap();
    handle.resume();
    for i in 0..3 {
        rig.frame(i as f64 * FRAME);
    }
    handle.cancel();
    rig.recorder.session().queue().barrier();

    assert_eq!(handle.state(), RecordingState::Canceled);
    assert!(!path.exists());
}

#[test]
fn test_3gp_is_rejected_by_mp4_writer() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(SurfaceFormat::Bgra8Unorm);
    let handle = rig
        .recorder
        .start_video_recording(
            dir.path().join("take.3gp"),
            VideoSettings::new(FileType::Mobile3gpp),
            None,
        )
        .unwrap();
    rig.recorder.session().queue().barrier();
    assert!(matches!(handle.state(), RecordingState::Failed(_)));
}
