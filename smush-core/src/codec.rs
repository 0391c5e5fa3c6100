//! # Codec Seams
//!
//! The pixel codec (Blocky16) and the audio decompressor (VIMA) live outside
//! this crate. The dispatcher only needs the two calls below; hosts plug in
//! real implementations.
//!
//! The stand-ins at the bottom let the headless player and the tests run
//! without either codec: video payloads are copied straight into the frame,
//! audio payloads are taken as big-endian 16-bit PCM.

use thiserror::Error;

use crate::chunk::AudioFormat;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Video decode failed: {0}")]
    Video(String),
    #[error("Audio decode failed: {0}")]
    Audio(String),
    #[error("Decoder needed {needed} bytes, only {available} available")]
    FrameTooSmall { needed: usize, available: usize },
}

/// Decodes one video block into the working frame.
pub trait VideoCodec: Send {
    /// Called at open when the frame dimensions change.
    fn init(&mut self, width: u32, height: u32) -> Result<(), CodecError>;

    /// Decode `src` into `dst`, a full RGB565 raster. No intermediate copy.
    fn decode(&mut self, dst: &mut [u8], src: &[u8]) -> Result<(), CodecError>;

    fn name(&self) -> &str;
}

/// Decompresses one audio block.
pub trait AudioCodec: Send {
    /// Called once the movie's audio format is known.
    fn init(&mut self, format: AudioFormat) -> Result<(), CodecError>;

    /// Produce exactly `dest_len` bytes of big-endian 16-bit PCM.
    fn decompress(&mut self, src: &[u8], dest_len: usize) -> Result<Vec<u8>, CodecError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Stand-ins
// ============================================================================

/// Copies block payloads into the raster as-is.
#[derive(Debug, Default)]
pub struct PassthroughVideo {
    dims: Option<(u32, u32)>,
}

impl PassthroughVideo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoCodec for PassthroughVideo {
    fn init(&mut self, width: u32, height: u32) -> Result<(), CodecError> {
        self.dims = Some((width, height));
        Ok(())
    }

    fn decode(&mut self, dst: &mut [u8], src: &[u8]) -> Result<(), CodecError> {
        if self.dims.is_none() {
            return Err(CodecError::Video("decoder not initialized".to_string()));
        }
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Treats audio payloads as already-decoded big-endian PCM.
#[derive(Debug, Default)]
pub struct RawPcmAudio {
    format: Option<AudioFormat>,
}

impl RawPcmAudio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCodec for RawPcmAudio {
    fn init(&mut self, format: AudioFormat) -> Result<(), CodecError> {
        self.format = Some(format);
        Ok(())
    }

    fn decompress(&mut self, src: &[u8], dest_len: usize) -> Result<Vec<u8>, CodecError> {
        if self.format.is_none() {
            return Err(CodecError::Audio("decoder not initialized".to_string()));
        }
        if src.len() < dest_len {
            return Err(CodecError::FrameTooSmall {
                needed: dest_len,
                available: src.len(),
            });
        }
        Ok(src[..dest_len].to_vec())
    }

    fn name(&self) -> &str {
        "raw-pcm"
    }
}
