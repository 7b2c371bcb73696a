// framemux-record: record a synthetic animated surface to MP4
//
// Renders a moving gradient in real time, converts it through the software
// device and records it with one pause/resume cycle in the middle.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use framemux::gpu::{SoftwareDevice, SurfaceFormat};
use framemux::testing::SyntheticSurface;
use framemux::{FramemuxConfig, MonotonicClock, RecordingState, SurfaceRecorder};

struct Options {
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    frames: u32,
    width: u32,
    height: u32,
    pause_frames: u32,
    wide_gamut: bool,
}

fn usage() -> ! {
    eprintln!(
        "Usage: framemux-record [--config <file>] [--output <file.mp4>] [--frames <n>] \
         [--size <w>x<h>] [--pause-frames <n>] [--wide-gamut]"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<Options> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        config: None,
        output: None,
        frames: 90,
        width: 640,
        height: 360,
        pause_frames: 30,
        wide_gamut: false,
    };

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| args.get(i + 1).cloned().unwrap_or_else(|| usage());
        match args[i].as_str() {
            "--config" => {
                options.config = Some(value(i).into());
                i += 1;
            }
            "--output" => {
                options.output = Some(value(i).into());
                i += 1;
            }
            "--frames" => {
                options.frames = value(i).parse().context("--frames expects a number")?;
                i += 1;
            }
            "--pause-frames" => {
                options.pause_frames = value(i).parse().context("--pause-frames expects a number")?;
                i += 1;
            }
            "--size" => {
                let size = value(i);
                let (w, h) = size.split_once('x').context("--size expects <w>x<h>")?;
                options.width = w.parse().context("invalid width")?;
                options.height = h.parse().context("invalid height")?;
                i += 1;
            }
            "--wide-gamut" => options.wide_gamut = true,
            "--help" | "-h" => usage(),
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(options)
}

fn main() -> Result<()> {
    framemux::init_logging();
    let options = parse_args()?;

    let mut config = match &options.config {
        Some(path) => FramemuxConfig::load_layered(path)?,
        None => FramemuxConfig::load_or_default(),
    };
    config.producer.allow_wide_gamut |= options.wide_gamut;
    let fps = config.recording.expected_frame_rate;

    let path = match options.output {
        Some(path) => path,
        None => {
            let path = config.output_path("framemux");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            path
        }
    };

    let format = if options.wide_gamut {
        SurfaceFormat::Bgr10Xr
    } else {
        SurfaceFormat::Bgra8Unorm
    };
    let surface = Arc::new(SyntheticSurface::new(options.width, options.height, format)?);
    let recorder = SurfaceRecorder::builder(surface.clone())
        .config(config)
        .device(Arc::new(SoftwareDevice::new()?))
        .build()?;
    attach_microphone(&recorder)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let recording = recorder.start_configured_recording(&path)?;
    recording.resume();
    log::info!("Recording {} frames to {}", options.frames, path.display());

    let pause_at = options.frames / 2;
    let frame_interval = Duration::from_secs_f64(1.0 / fps);
    for frame in 0..options.frames {
        if interrupted.load(Ordering::SeqCst) {
            log::warn!("Interrupted after {} frames", frame);
            break;
        }
        if frame == pause_at && options.pause_frames > 0 {
            recording.pause();
            for _ in 0..options.pause_frames {
                // rendered but not recorded
                surface.render_next()?;
                recorder.render(recorder.clock().now());
                std::thread::sleep(frame_interval);
            }
            recording.resume();
        }
        surface.render_next()?;
        recorder.render(recorder.clock().now());
        std::thread::sleep(frame_interval);
    }

    let (tx, rx) = mpsc::channel();
    recording.finish(move |summary| {
        let _ = tx.send(summary);
    });
    let summary = rx
        .recv_timeout(Duration::from_secs(60))
        .context("recording did not finish")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    match summary.state {
        RecordingState::Finished => Ok(()),
        state => bail!("recording ended in state {:?}", state),
    }
}

#[cfg(feature = "audio")]
fn attach_microphone(recorder: &SurfaceRecorder) -> Result<()> {
    let audio = &recorder.config().audio;
    if !audio.enabled {
        return Ok(());
    }
    let input = framemux::audio::MicrophoneInput::new(
        audio.device_id.clone(),
        audio.sample_rate,
        audio.channels,
        recorder.clock().clone(),
    );
    recorder.set_audio_input(Some(Arc::new(input)));
    Ok(())
}

#[cfg(not(feature = "audio"))]
fn attach_microphone(recorder: &SurfaceRecorder) -> Result<()> {
    if recorder.config().audio.enabled {
        log::warn!("Audio is enabled in the config but framemux was built without the audio feature");
    }
    Ok(())
}
