//! # Frame Decode Dispatch
//!
//! Walks one buffered frame and routes every sub-chunk to its codec.
//!
//! Video blocks decode straight into the caller's working raster. Audio
//! blocks come in two layouts, chosen by the sign of their leading length
//! field:
//!
//! ```text
//! Inline    [i32 BE frames >= 0][compressed data ...]
//! Extended  [i32 BE < 0][u32][u32 BE frames][compressed data ...]
//! ```
//!
//! Both are kept as observed in shipped movies; which one an encoder picks is
//! not documented anywhere.

use bytes::Buf;
use thiserror::Error;

use crate::chunk::{AudioFormat, ChunkCursor, FormatError, Tag};
use crate::codec::{AudioCodec, CodecError, VideoCodec};

/// Bytes per decoded sample.
const SAMPLE_BYTES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveLayout {
    /// Length field holds the frame count, data follows it
    Inline,
    /// Length field is negative, frame count sits 8 bytes in
    Extended,
}

/// One decoded `Wave` block, samples in host order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub layout: WaveLayout,
}

/// Where the compressed bytes of a `Wave` block live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WaveBlock<'a> {
    frames: u32,
    data: &'a [u8],
    layout: WaveLayout,
}

fn parse_wave(payload: &[u8]) -> Result<WaveBlock<'_>, FormatError> {
    let needed = |n: u32| FormatError::HeaderTooSmall {
        tag: Tag::Wave,
        size: payload.len() as u32,
        needed: n,
    };
    if payload.len() < 4 {
        return Err(needed(4));
    }
    let mut cur = payload;
    let length = cur.get_i32();
    if length >= 0 {
        return Ok(WaveBlock {
            frames: length as u32,
            data: cur,
            layout: WaveLayout::Inline,
        });
    }
    if cur.remaining() < 8 {
        return Err(needed(12));
    }
    cur.advance(4);
    let frames = cur.get_u32();
    Ok(WaveBlock {
        frames,
        data: cur,
        layout: WaveLayout::Extended,
    })
}

/// Routes the sub-chunks of one frame to the video and audio codecs.
pub struct FrameDispatcher<'a> {
    video: &'a mut dyn VideoCodec,
    audio: &'a mut dyn AudioCodec,
    format: Option<AudioFormat>,
    /// Largest decoded audio block the codec is asked to produce
    limit: u32,
}

impl<'a> FrameDispatcher<'a> {
    pub fn new(
        video: &'a mut dyn VideoCodec,
        audio: &'a mut dyn AudioCodec,
        format: Option<AudioFormat>,
        limit: u32,
    ) -> Self {
        Self {
            video,
            audio,
            format,
            limit,
        }
    }

    /// Decode the sub-chunks of a `FRME` payload.
    ///
    /// On error `decode_buf` may hold a partly decoded raster; the caller
    /// must not present it.
    pub fn decode_payload(
        &mut self,
        payload: &[u8],
        decode_buf: &mut [u8],
    ) -> Result<Vec<AudioBuffer>, DispatchError> {
        let mut audio = Vec::new();
        for chunk in ChunkCursor::new(payload) {
            let chunk = chunk?;
            match chunk.tag {
                Tag::Bl16 => self.video.decode(decode_buf, chunk.payload)?,
                Tag::Wave => audio.push(self.decode_wave(chunk.payload)?),
                other => return Err(FormatError::UnknownTag(other).into()),
            }
        }
        tracing::trace!("Dispatched frame: {} audio block(s)", audio.len());
        Ok(audio)
    }

    fn decode_wave(&mut self, payload: &[u8]) -> Result<AudioBuffer, DispatchError> {
        let format = self.format.ok_or(FormatError::MissingAudioFormat)?;
        let block = parse_wave(payload)?;
        // The length field is untrusted; bound it before the codec allocates
        let wanted = u64::from(block.frames) * u64::from(format.channels) * SAMPLE_BYTES as u64;
        if wanted > u64::from(self.limit) {
            return Err(FormatError::ChunkTooLarge {
                tag: Tag::Wave,
                size: u32::try_from(wanted).unwrap_or(u32::MAX),
                limit: self.limit,
            }
            .into());
        }
        let dest_len = wanted as usize;

        let pcm = self.audio.decompress(block.data, dest_len)?;
        if pcm.len() < dest_len {
            return Err(CodecError::FrameTooSmall {
                needed: dest_len,
                available: pcm.len(),
            }
            .into());
        }
        // Codec output is big-endian
        let samples = pcm[..dest_len]
            .chunks_exact(SAMPLE_BYTES)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Ok(AudioBuffer {
            samples,
            layout: block.layout,
        })
    }
}
