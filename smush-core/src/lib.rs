//! # SMUSH Core
//!
//! Streaming decoder for SANM cinematic movies: compressed-resource reader,
//! chunk parser, per-frame codec dispatch and a tick-driven playback
//! scheduler. Pixel and audio codecs plug in through [`codec`].

// ============================================================================
// Byte Streams
// ============================================================================
pub mod source;
pub mod zlib_stream;

// ============================================================================
// Container
// ============================================================================
pub mod chunk;
pub mod dispatch;

// ============================================================================
// Codecs / Outputs
// ============================================================================
pub mod audio_sink;
pub mod codec;
pub mod frame;

// ============================================================================
// Playback
// ============================================================================
pub mod config;
pub mod player;
pub mod timer;

pub use audio_sink::{AudioSink, SharedAudioSink};
pub use chunk::{AudioFormat, FormatError, StreamHeader, Tag};
pub use codec::{AudioCodec, CodecError, PassthroughVideo, RawPcmAudio, VideoCodec};
pub use config::PlayerConfig;
pub use frame::Presentation;
pub use player::{PlaybackState, PlayerError, PlayerState, SmushPlayer, TickOutcome};
pub use source::{ByteSource, MovieSource};
pub use timer::FrameTimer;
pub use zlib_stream::OpenError;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
