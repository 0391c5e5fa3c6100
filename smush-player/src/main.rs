//! # SMUSH Player
//!
//! Headless SANM playback: decodes a movie through smush-core, optionally
//! dumping every presented frame as PNG and the mixed audio as raw PCM.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use smush_core::frame::rgb565_to_rgb24;
use smush_core::{
    FrameTimer, PassthroughVideo, PlayerConfig, PlayerState, Presentation, RawPcmAudio,
    SharedAudioSink, SmushPlayer, TickOutcome,
};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("smush=info,smush_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    tracing::info!("SMUSH Player v{}", smush_core::VERSION);

    run(options)
}

// ============================================================================
// Options
// ============================================================================

struct Options {
    input: PathBuf,
    frames: Option<u64>,
    dump_dir: Option<PathBuf>,
    audio_out: Option<PathBuf>,
    stats_json: bool,
    x: i32,
    y: i32,
    config: PlayerConfig,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut input: Option<PathBuf> = None;
    let mut frames: Option<u64> = None;
    let mut dump_dir: Option<PathBuf> = None;
    let mut audio_out: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut realtime = false;
    let mut stats_json = false;
    let mut x = 0;
    let mut y = 0;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let next = args.get(i + 1);
        let value = || {
            next.map(String::as_str)
                .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
        };
        match flag {
            "--input" | "-i" => {
                input = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--frames" | "-n" => {
                let v = value()?;
                frames = Some(
                    v.parse::<u64>()
                        .with_context(|| format!("Invalid frame count {}", v))?,
                );
                i += 2;
            }
            "--dump" | "-d" => {
                dump_dir = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--audio-out" => {
                audio_out = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--config" => {
                config_path = Some(PathBuf::from(value()?));
                i += 2;
            }
            "--at" => {
                let v = value()?;
                let (px, py) = v
                    .split_once(',')
                    .ok_or_else(|| anyhow::anyhow!("Expected --at X,Y, got {}", v))?;
                x = px.trim().parse().with_context(|| format!("Invalid x {}", px))?;
                y = py.trim().parse().with_context(|| format!("Invalid y {}", py))?;
                i += 2;
            }
            "--realtime" => {
                realtime = true;
                i += 1;
            }
            "--stats-json" => {
                stats_json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required --input")
    })?;

    let mut config = match config_path {
        Some(path) => PlayerConfig::load(&path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    config.realtime |= realtime;

    Ok(Options {
        input,
        frames,
        dump_dir,
        audio_out,
        stats_json,
        x,
        y,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  smush --input <movie.snm> [--frames <n>] [--dump <dir>] [--audio-out <file.pcm>]\n        [--config <file.json>] [--at X,Y] [--realtime] [--stats-json]\n"
    );
}

// ============================================================================
// Outputs
// ============================================================================

struct Outputs {
    dump_dir: Option<PathBuf>,
    audio: Option<BufWriter<File>>,
    sink: SharedAudioSink,
    frames_written: u64,
    samples_written: u64,
}

impl Outputs {
    fn new(options: &Options, sink: SharedAudioSink) -> Result<Self> {
        if let Some(dir) = &options.dump_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Creating dump directory {}", dir.display()))?;
        }
        let audio = match &options.audio_out {
            Some(path) => Some(BufWriter::new(
                File::create(path).with_context(|| format!("Creating {}", path.display()))?,
            )),
            None => None,
        };
        Ok(Self {
            dump_dir: options.dump_dir.clone(),
            audio,
            sink,
            frames_written: 0,
            samples_written: 0,
        })
    }

    fn collect(&mut self, presentation: &Presentation) -> Result<()> {
        if let Some(dir) = &self.dump_dir {
            let rgb = presentation.take_if_updated(rgb565_to_rgb24);
            if let Some(rgb) = rgb {
                let path = dir.join(format!("frame_{:05}.png", presentation.frame_number()));
                save_png(&path, presentation.width(), presentation.height(), rgb)?;
                self.frames_written += 1;
            }
        }
        self.drain_audio()
    }

    fn drain_audio(&mut self) -> Result<()> {
        let mut buf = [0i16; 4096];
        loop {
            let n = self.sink.drain(&mut buf);
            if n == 0 {
                break;
            }
            if let Some(out) = self.audio.as_mut() {
                for sample in &buf[..n] {
                    out.write_all(&sample.to_le_bytes())?;
                }
            }
            self.samples_written += n as u64;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(out) = self.audio.as_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

fn save_png(path: &Path, width: u32, height: u32, rgb: Vec<u8>) -> Result<()> {
    let image = image::RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow::anyhow!("Frame buffer does not match {}x{}", width, height))?;
    image
        .save(path)
        .with_context(|| format!("Writing {}", path.display()))
}

// ============================================================================
// Playback
// ============================================================================

fn run(options: Options) -> Result<()> {
    let sink = SharedAudioSink::new();
    let mut player = SmushPlayer::new(
        options.config.clone(),
        Box::new(PassthroughVideo::new()),
        Box::new(RawPcmAudio::new()),
        Box::new(sink.clone()),
    );
    player
        .open(&options.input, options.x, options.y)
        .with_context(|| format!("Opening {}", options.input.display()))?;

    let presentation = player
        .presentation()
        .ok_or_else(|| anyhow::anyhow!("Player has no presentation buffer"))?;
    let mut outputs = Outputs::new(&options, sink.clone())?;
    let started = Instant::now();

    let player = if options.config.realtime {
        run_realtime(player, &presentation, &mut outputs, options.frames)?
    } else {
        run_flat_out(player, &presentation, &mut outputs, options.frames)?
    };
    outputs.finish()?;

    let playback = player.playback();
    let wall_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        "Playback complete: frames={}, movie_ms={}, wall_ms={}, png={}, samples={}",
        playback.current_frame,
        player.elapsed_ms(),
        wall_ms,
        outputs.frames_written,
        outputs.samples_written
    );
    if let Some(err) = player.last_error() {
        tracing::error!("Movie ended early: {}", err);
    }

    if options.stats_json {
        let header = player.stream_header();
        let stats = serde_json::json!({
            "input": options.input.display().to_string(),
            "width": header.map(|h| h.width),
            "height": header.map(|h| h.height),
            "declared_frames": header.map(|h| h.frame_count),
            "declared_ms": header.map(|h| h.duration_us() / 1000),
            "decoded_frames": playback.current_frame,
            "movie_ms": player.elapsed_ms(),
            "wall_ms": wall_ms,
            "sample_rate": player.audio_format().map(|f| f.sample_rate),
            "channels": player.audio_format().map(|f| f.channels),
            "samples": outputs.samples_written,
            "dropped_samples": sink.stats().total_dropped,
            "error": player.last_error(),
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    if player.last_error().is_some() && playback.current_frame == 0 {
        anyhow::bail!("No frames could be decoded");
    }
    Ok(())
}

fn run_flat_out(
    mut player: SmushPlayer,
    presentation: &Presentation,
    outputs: &mut Outputs,
    limit: Option<u64>,
) -> Result<SmushPlayer> {
    while player.state() == PlayerState::Playing {
        if limit.is_some_and(|n| u64::from(player.playback().current_frame) >= n) {
            break;
        }
        match player.tick() {
            Ok(TickOutcome::Frame { .. }) => outputs.collect(presentation)?,
            Ok(TickOutcome::EndOfStream) => tracing::warn!("Movie data ended early"),
            Ok(TickOutcome::Idle) => {}
            // Already logged and recorded by the player
            Err(_) => break,
        }
    }
    Ok(player)
}

fn run_realtime(
    player: SmushPlayer,
    presentation: &Presentation,
    outputs: &mut Outputs,
    limit: Option<u64>,
) -> Result<SmushPlayer> {
    let shared = Arc::new(Mutex::new(player));
    let mut timer = FrameTimer::start(Arc::clone(&shared))?;

    while timer.is_running() {
        outputs.collect(presentation)?;
        if limit.is_some_and(|n| u64::from(shared.lock().playback().current_frame) >= n) {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    timer.stop();
    outputs.collect(presentation)?;

    let player = Arc::try_unwrap(shared)
        .map_err(|_| anyhow::anyhow!("Frame timer still holds the player"))?
        .into_inner();
    Ok(player)
}
