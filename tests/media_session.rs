//! Integration tests for media session routing and recordings
//!
//! Inputs, writers and the clock are test doubles from `framemux::testing`,
//! so every scenario runs deterministically on the session queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use framemux::buffer::{PixelBuffer, PixelFormat};
use framemux::errors::{FramemuxError, UsageError, WriterError};
use framemux::output::{FileType, RecordingState, RecordingSummary, VideoSettings};
use framemux::session::{MediaSession, SessionOptions};
use framemux::testing::{
    CollectingConsumer, ManualAudioInput, ManualClock, ManualVideoInput, MemoryWriterFactory,
    WriterEvent,
};
use framemux::{ImageOrientation, RecordingHandle};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    clock: Arc<ManualClock>,
    input: Arc<ManualVideoInput>,
    factory: MemoryWriterFactory,
    session: MediaSession,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let input = Arc::new(ManualVideoInput::new(16, 16));
    let factory = MemoryWriterFactory::new();
    let session = MediaSession::with_options(
        input.clone(),
        Arc::new(factory.clone()),
        SessionOptions {
            clock: clock.clone(),
            ..SessionOptions::default()
        },
    )
    .unwrap();
    Fixture {
        clock,
        input,
        factory,
        session,
    }
}

fn finish_and_wait(handle: &RecordingHandle) -> RecordingSummary {
    let (tx, rx) = mpsc::channel();
    handle.finish(move |summary| {
        let _ = tx.send(summary);
    });
    rx.recv_timeout(TIMEOUT).expect("finish handler should run")
}

fn record(f: &Fixture) -> RecordingHandle {
    f.session
        .start_video_recording("take.mp4", VideoSettings::new(FileType::Mp4), None)
        .unwrap()
}

#[test]
fn test_fan_out_copies_are_isolated() {
    let f = fixture();
    let a = Arc::new(CollectingConsumer::new());
    let b = Arc::new(CollectingConsumer::new());
    f.session.add_video_output(a.clone());
    f.session.add_video_output(b.clone());

    let original = PixelBuffer::new(16, 16, PixelFormat::Bgra32).unwrap();
    original.write().unwrap().fill(7);
    assert!(f.input.emit(Ok(original.clone()), 0.0));
    f.session.queue().barrier();

    let (first, _) = a.buffers().remove(0);
    let (second, _) = b.buffers().remove(0);
    assert!(first.ptr_eq(&original));
    assert!(!second.ptr_eq(&original));
    assert_eq!(*second.read().unwrap(), *original.read().unwrap());

    first.write().unwrap().fill(200);
    assert!(second.read().unwrap().iter().all(|&byte| byte == 7));
}

#[test]
fn test_inputs_start_and_stop_with_outputs() {
    let f = fixture();
    let audio = Arc::new(ManualAudioInput::new());
    f.session.set_audio_input(Some(audio.clone()));
    assert!(!f.input.is_running());
    assert!(!audio.is_running());

    let handle = record(&f);
    assert!(f.input.is_running());
    assert!(audio.is_running());
    assert_eq!(f.session.video_output_count(), 1);
    assert_eq!(f.session.audio_output_count(), 1);

    let summary = finish_and_wait(&handle);
    assert_eq!(summary.state, RecordingState::Canceled);
    f.session.queue().barrier();
    assert_eq!(f.session.video_output_count(), 0);
    assert!(!f.input.is_running());
    assert!(!audio.is_running());
    assert_eq!(f.input.start_count(), 1);
    assert_eq!(f.input.stop_count(), 1);
}

#[test]
fn test_take_photo_detaches_after_first_frame() {
    let f = fixture();
    let (tx, rx) = mpsc::channel();
    f.session
        .take_photo(2.0, Some(ImageOrientation::Right), move |photo| {
            let _ = tx.send(photo);
        });
    assert_eq!(f.session.video_output_count(), 1);
    assert!(f.input.is_running());

    assert!(f.input.emit_frame(0.0));
    let photo = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    f.session.queue().barrier();

    assert_eq!(photo.scale(), 2.0);
    assert_eq!(photo.orientation(), ImageOrientation::Right);
    assert_eq!(f.session.video_output_count(), 0);
    assert!(!f.input.is_running());
    assert!(!f.input.emit_frame(0.1));
}

#[test]
fn test_capture_token_stops_on_drop() {
    let f = fixture();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let token = f.session.capture_pixel_buffers(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..3 {
        f.input.emit_frame(i as f64 * 0.03);
    }
    f.session.queue().barrier();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(token.is_active());

    drop(token);
    f.session.queue().barrier();
    assert_eq!(f.session.video_output_count(), 0);
    assert!(!f.input.emit_frame(0.2));
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn test_pause_leaves_no_gap_in_duration() {
    let f = fixture();
    let handle = record(&f);
    handle.resume();

    // 10 frames 30 ms apart with a 500 ms wall-clock pause after frame 5
    for i in 0..10u32 {
        let mut time = i as f64 * 0.03;
        if i == 5 {
            f.clock.set(0.135);
            handle.pause();
            f.clock.set(0.635);
            handle.resume();
        }
        if i >= 5 {
            time += 0.5;
        }
        f.clock.set(time);
        assert!(f.input.emit_frame(time));
    }

    let summary = finish_and_wait(&handle);
    assert_eq!(summary.state, RecordingState::Finished);
    assert_eq!(summary.video_frames, 10);
    assert!(
        summary.duration > 0.25 && summary.duration < 0.31,
        "duration {}",
        summary.duration
    );

    let writer = f.factory.last_writer().unwrap();
    let times = writer.video_times();
    assert_eq!(times.len(), 10);
    assert!((times[5] - 0.15).abs() < 1e-9);
    assert!((times[9] - 0.27).abs() < 1e-9);
    assert_eq!(writer.events().last(), Some(&WriterEvent::Finish));
}

#[test]
fn test_finish_completion_fires_once_per_call() {
    let f = fixture();
    let handle = record(&f);
    handle.resume();
    f.input.emit_frame(0.0);

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let calls = calls.clone();
        let tx = tx.clone();
        handle.finish(move |summary| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(summary.state);
        });
    }
    handle.cancel();
    let calls_after = calls.clone();
    handle.finish(move |summary| {
        calls_after.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(summary.state);
    });

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), RecordingState::Finished);
    }
    f.session.queue().barrier();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_second_recording_rejected_until_first_ends() {
    let f = fixture();
    let first = record(&f);
    let second = f
        .session
        .start_video_recording("other.mp4", VideoSettings::new(FileType::Mp4), None);
    assert!(matches!(
        second,
        Err(FramemuxError::Usage(UsageError::RecordingInProgress))
    ));

    first.cancel();
    f.session.queue().barrier();
    assert_eq!(first.state(), RecordingState::Canceled);
    assert!(record(&f).state() != RecordingState::Canceled);
}

#[test]
fn test_writer_open_failure_is_terminal() {
    let f = fixture();
    f.factory.fail_open(WriterError::Open("read-only volume".into()));
    let handle = record(&f);
    f.session.queue().barrier();

    assert_eq!(
        handle.error(),
        Some(WriterError::Open("read-only volume".into()))
    );
    assert_eq!(f.session.video_output_count(), 0);
}

#[test]
fn test_producer_errors_reach_error_observable() {
    let f = fixture();
    let consumer = Arc::new(CollectingConsumer::new());
    f.session.add_video_output(consumer.clone());

    f.input
        .emit(Err(framemux::ProducerError::NoSurface), 0.0);
    f.session.queue().barrier();
    assert_eq!(
        f.session.error().get(),
        Some(FramemuxError::Producer(framemux::ProducerError::NoSurface))
    );
    assert!(consumer.is_empty());
}

#[test]
fn test_audio_follows_video_session() {
    let f = fixture();
    let audio = Arc::new(ManualAudioInput::new());
    f.session.set_audio_input(Some(audio.clone()));
    let handle = record(&f);
    handle.resume();

    // Audio before the first video buffer has no session to land in
    audio.emit(framemux::testing::synthetic_audio_samples(0, 480));
    f.input.emit_frame(0.0);
    audio.emit(framemux::testing::synthetic_audio_samples(1, 480));

    let summary = finish_and_wait(&handle);
    assert_eq!(summary.audio_batches, 1);
    let writer = f.factory.last_writer().unwrap();
    assert_eq!(writer.audio_times(), vec![0.01]);
}

#[tokio::test]
async fn test_finish_async() {
    let f = fixture();
    let handle = record(&f);
    handle.resume();
    f.input.emit_frame(0.0);
    f.input.emit_frame(0.04);

    let summary = handle.finish_async().await;
    assert_eq!(summary.state, RecordingState::Finished);
    assert_eq!(summary.video_frames, 2);
    assert_eq!(summary.file_type, FileType::Mp4);
}
