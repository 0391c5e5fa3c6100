//! # Playback Scheduler
//!
//! Owns one movie session and advances it a frame per [`SmushPlayer::tick`].
//! Whoever calls `tick` decides the pacing: a test can call it in a loop, a
//! host can hand the player to a [`FrameTimer`](crate::timer::FrameTimer).
//!
//! ```text
//! Stopped ──open──► Initializing ──► Playing ◄──► Paused
//!    ▲                                  │
//!    │                       last frame / error
//!    │                                  ▼
//!    └────────────stop───────────── Finished
//! ```
//!
//! The container has no resync marker, so any parse or decode failure ends
//! the session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio_sink::AudioSink;
use crate::chunk::{
    read_format_header, read_frame_envelope, read_stream_header, AudioFormat, FormatError,
    StreamHeader,
};
use crate::codec::{AudioCodec, CodecError, VideoCodec};
use crate::config::PlayerConfig;
use crate::dispatch::{DispatchError, FrameDispatcher};
use crate::frame::{FrameBuffers, Presentation};
use crate::source::{ByteSource, MovieSource};
use crate::zlib_stream::OpenError;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Failed to open movie: {0}")]
    Open(#[from] OpenError),
    #[error("Malformed movie: {0}")]
    Format(#[from] FormatError),
    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),
    #[error("No movie is open")]
    NotOpen,
    #[error("Failed to start frame timer: {0}")]
    Timer(#[source] std::io::Error),
}

impl From<DispatchError> for PlayerError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Format(e) => PlayerError::Format(e),
            DispatchError::Codec(e) => PlayerError::Codec(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Initializing,
    Playing,
    Paused,
    Finished,
}

/// Snapshot of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackState {
    /// Frames decoded so far
    pub current_frame: u32,
    pub elapsed_us: u64,
    /// True whenever ticks are ignored, including after the last frame
    pub paused: bool,
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do (paused or finished)
    Idle,
    /// Frame `index` was decoded and published
    Frame { index: u32, audio_blocks: usize },
    /// The data ran out before the declared frame count
    EndOfStream,
}

struct Session {
    source: Box<dyn ByteSource + Send>,
    header: StreamHeader,
    format: Option<AudioFormat>,
    buffers: FrameBuffers,
    presentation: Arc<Presentation>,
}

/// One playback session handle. Not shared between threads on its own; wrap
/// it in a mutex to drive it from a timer thread.
pub struct SmushPlayer {
    config: PlayerConfig,
    video: Box<dyn VideoCodec>,
    audio: Box<dyn AudioCodec>,
    sink: Box<dyn AudioSink>,
    state: PlayerState,
    session: Option<Session>,
    /// Dimensions the video codec was last initialized with
    video_dims: Option<(u32, u32)>,
    origin: (i32, i32),
    current_frame: u32,
    elapsed_us: u64,
    elapsed_ms: u64,
    last_error: Option<String>,
}

impl SmushPlayer {
    pub fn new(
        config: PlayerConfig,
        video: Box<dyn VideoCodec>,
        audio: Box<dyn AudioCodec>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        Self {
            config,
            video,
            audio,
            sink,
            state: PlayerState::Stopped,
            session: None,
            video_dims: None,
            origin: (0, 0),
            current_frame: 0,
            elapsed_us: 0,
            elapsed_ms: 0,
            last_error: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a movie file and start playing it at screen position `(x, y)`.
    /// Any movie already open on this handle is stopped first.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, x: i32, y: i32) -> Result<(), PlayerError> {
        self.stop();
        self.state = PlayerState::Initializing;
        match MovieSource::open(path, &self.config) {
            Ok(source) => {
                tracing::debug!(
                    "Reading {} movie data",
                    if source.is_compressed() { "compressed" } else { "plain" }
                );
                self.start(Box::new(source), x, y)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Like [`open`](Self::open), over an already-open byte source.
    pub fn open_source<S>(&mut self, source: S, x: i32, y: i32) -> Result<(), PlayerError>
    where
        S: ByteSource + Send + 'static,
    {
        self.stop();
        self.state = PlayerState::Initializing;
        self.start(Box::new(source), x, y)
    }

    fn start(
        &mut self,
        mut source: Box<dyn ByteSource + Send>,
        x: i32,
        y: i32,
    ) -> Result<(), PlayerError> {
        let limit = self.config.max_chunk_bytes;
        let header = match read_stream_header(&mut source, limit) {
            Ok(h) => h,
            Err(e) => return Err(self.fail(e.into())),
        };
        let format = match read_format_header(&mut source, limit) {
            Ok(f) => f,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Err(e) = self.init_codecs(&header, format) {
            return Err(self.fail(e.into()));
        }

        tracing::info!(
            "Movie: {}x{}, {} frames, {} us/frame, audio {}",
            header.width,
            header.height,
            header.frame_count,
            header.frame_interval_us,
            match format {
                Some(f) => format!("{} Hz x{}", f.sample_rate, f.channels),
                None => "none".to_string(),
            }
        );

        self.origin = (x, y);
        self.session = Some(Session {
            source,
            header,
            format,
            buffers: FrameBuffers::new(header.width, header.height),
            presentation: Arc::new(Presentation::new(header.width, header.height, (x, y))),
        });
        self.current_frame = 0;
        self.elapsed_us = 0;
        self.elapsed_ms = 0;
        self.last_error = None;

        self.state = if header.frame_count == 0 {
            tracing::warn!("Movie declares no frames");
            PlayerState::Finished
        } else {
            PlayerState::Playing
        };
        Ok(())
    }

    fn init_codecs(
        &mut self,
        header: &StreamHeader,
        format: Option<AudioFormat>,
    ) -> Result<(), CodecError> {
        let dims = (header.width, header.height);
        if self.video_dims != Some(dims) {
            self.video.init(header.width, header.height)?;
            self.video_dims = Some(dims);
            tracing::debug!("Initialized {} for {}x{}", self.video.name(), dims.0, dims.1);
        }
        if let Some(format) = format {
            self.audio.init(format)?;
            tracing::debug!("Initialized {}", self.audio.name());
        }
        Ok(())
    }

    /// Tear down the session and release its buffers.
    pub fn stop(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("Movie stopped after {} frame(s)", self.current_frame);
        }
        if self.sink.is_active() {
            self.sink.close_stream();
        }
        self.state = PlayerState::Stopped;
        self.current_frame = 0;
        self.elapsed_us = 0;
        self.elapsed_ms = 0;
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlayerState::Paused {
            self.state = PlayerState::Playing;
        }
    }

    fn fail(&mut self, err: PlayerError) -> PlayerError {
        tracing::error!("Playback aborted at frame {}: {}", self.current_frame, err);
        self.last_error = Some(err.to_string());
        self.state = PlayerState::Finished;
        err
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Decode and publish the next frame.
    pub fn tick(&mut self) -> Result<TickOutcome, PlayerError> {
        match self.state {
            PlayerState::Playing => {}
            PlayerState::Stopped => return Err(PlayerError::NotOpen),
            _ => return Ok(TickOutcome::Idle),
        }
        let limit = self.config.max_chunk_bytes;
        let Some(session) = self.session.as_mut() else {
            return Err(PlayerError::NotOpen);
        };

        let payload = match read_frame_envelope(&mut session.source, limit) {
            Ok(p) => p,
            Err(FormatError::Truncated(short)) => {
                tracing::warn!(
                    "Movie data ended at frame {} of {} ({})",
                    self.current_frame,
                    session.header.frame_count,
                    short
                );
                self.state = PlayerState::Finished;
                return Ok(TickOutcome::EndOfStream);
            }
            Err(e) => return Err(self.fail(e.into())),
        };

        let mut dispatcher =
            FrameDispatcher::new(self.video.as_mut(), self.audio.as_mut(), session.format, limit);
        let blocks = match dispatcher.decode_payload(&payload, session.buffers.decode_buf()) {
            Ok(b) => b,
            Err(e) => return Err(self.fail(e.into())),
        };

        if let (Some(format), false) = (session.format, blocks.is_empty()) {
            if !self.sink.is_active() {
                self.sink.open_stream(format, self.config.audio_buffer_bytes);
            }
            for block in &blocks {
                self.sink.append(&block.samples);
            }
        }

        let index = self.current_frame;
        session.presentation.publish(&session.buffers, index + 1);
        self.current_frame += 1;
        let interval = session.header.frame_interval_us;
        self.elapsed_us += u64::from(interval);
        self.elapsed_ms += u64::from(interval / 1000);
        tracing::debug!("Frame {} decoded, {} audio block(s)", index, blocks.len());

        if self.current_frame >= session.header.frame_count {
            tracing::info!("Movie finished after {} frame(s)", self.current_frame);
            self.state = PlayerState::Finished;
        }
        Ok(TickOutcome::Frame {
            index,
            audio_blocks: blocks.len(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn playback(&self) -> PlaybackState {
        PlaybackState {
            current_frame: self.current_frame,
            elapsed_us: self.elapsed_us,
            paused: self.state != PlayerState::Playing,
            finished: self.state == PlayerState::Finished,
        }
    }

    pub fn stream_header(&self) -> Option<StreamHeader> {
        self.session.as_ref().map(|s| s.header)
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.session.as_ref().and_then(|s| s.format)
    }

    /// Shared presentation buffer for the renderer. Replaced on every open.
    pub fn presentation(&self) -> Option<Arc<Presentation>> {
        self.session.as_ref().map(|s| Arc::clone(&s.presentation))
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        self.session
            .as_ref()
            .map(|s| Duration::from_micros(u64::from(s.header.frame_interval_us)))
    }

    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    /// Movie time in whole milliseconds, accumulated per frame.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Drop for SmushPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
