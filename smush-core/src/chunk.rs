//! # SANM Chunk Parsing
//!
//! Every region of a SMUSH movie is an 8-byte envelope (big-endian four-cc
//! tag, big-endian payload size) followed by the payload. Field layout inside
//! a payload depends entirely on the tag, so parsing is split into a generic
//! envelope reader and small per-tag extractors.
//!
//! ```text
//! SANM
//! ├── SHDR (stream header)
//! ├── FLHD (format header)
//! │   ├── Bl16
//! │   └── Wave (rate, channels)
//! ├── ANNO (optional, per frame)
//! └── FRME (per frame)
//!     ├── Bl16 (video block)
//!     └── Wave (audio block)
//! ```
//!
//! Top-level headers are read straight off a [`ByteSource`]; a frame payload
//! is buffered whole and walked with a [`ChunkCursor`].

use std::fmt;

use bytes::Buf;
use thiserror::Error;

use crate::source::{ByteSource, ShortRead};

/// Size of a chunk envelope.
pub const HEADER_LEN: usize = 8;

/// Minimum SHDR payload holding every field we read.
const SHDR_MIN_LEN: u32 = 18;
/// Minimum FLHD `Wave` payload (rate + channels).
const WAVE_FORMAT_MIN_LEN: u32 = 8;

// ============================================================================
// Tags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Stream envelope
    Sanm,
    /// Stream header
    Shdr,
    /// Format header
    Flhd,
    /// Annotation, never decoded
    Anno,
    /// Per-frame envelope
    Frme,
    /// Video block
    Bl16,
    /// Audio block
    Wave,
    Other([u8; 4]),
}

impl Tag {
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"SANM" => Tag::Sanm,
            b"SHDR" => Tag::Shdr,
            b"FLHD" => Tag::Flhd,
            b"ANNO" => Tag::Anno,
            b"FRME" => Tag::Frme,
            b"Bl16" => Tag::Bl16,
            b"Wave" => Tag::Wave,
            _ => Tag::Other(fourcc),
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Tag::Sanm => *b"SANM",
            Tag::Shdr => *b"SHDR",
            Tag::Flhd => *b"FLHD",
            Tag::Anno => *b"ANNO",
            Tag::Frme => *b"FRME",
            Tag::Bl16 => *b"Bl16",
            Tag::Wave => *b"Wave",
            Tag::Other(fourcc) => fourcc,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.fourcc() {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Container-level failures. None of these can be recovered from: the format
/// has no resynchronization marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Unrecognized tag: expected {expected}, found {found}")]
    UnexpectedTag { expected: Tag, found: Tag },
    #[error("Unknown tag {0}")]
    UnknownTag(Tag),
    #[error("{tag} chunk claims {size} bytes but only {available} remain")]
    ChunkOverrun { tag: Tag, size: u32, available: usize },
    #[error("Chunk header cut short: {available} of 8 bytes")]
    PartialHeader { available: usize },
    #[error("{tag} chunk of {size} bytes exceeds limit of {limit}")]
    ChunkTooLarge { tag: Tag, size: u32, limit: u32 },
    #[error("{tag} chunk of {size} bytes is smaller than {needed}")]
    HeaderTooSmall { tag: Tag, size: u32, needed: u32 },
    #[error("Invalid audio format: {sample_rate} Hz, {channels} channels")]
    InvalidAudioFormat { sample_rate: u32, channels: u32 },
    #[error("Audio block found but the movie declares no audio format")]
    MissingAudioFormat,
    #[error(transparent)]
    Truncated(#[from] ShortRead),
}

// ============================================================================
// Headers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tag: Tag,
    pub size: u32,
}

/// Parsed SHDR. Fixed for the movie's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    /// Nominal time between frames
    pub frame_interval_us: u32,
}

impl StreamHeader {
    pub fn duration_us(&self) -> u64 {
        u64::from(self.frame_count) * u64::from(self.frame_interval_us)
    }
}

/// Parsed from the FLHD `Wave` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Read one envelope: 4-byte tag, 4-byte size, both big-endian.
pub fn read_chunk_header<S: ByteSource + ?Sized>(src: &mut S) -> Result<ChunkHeader, FormatError> {
    let mut raw = [0u8; HEADER_LEN];
    src.read_full(&mut raw)?;
    let mut cur = &raw[..];
    let mut fourcc = [0u8; 4];
    cur.copy_to_slice(&mut fourcc);
    Ok(ChunkHeader {
        tag: Tag::from_fourcc(fourcc),
        size: cur.get_u32(),
    })
}

fn expect_chunk<S: ByteSource + ?Sized>(src: &mut S, expected: Tag) -> Result<u32, FormatError> {
    let header = read_chunk_header(src)?;
    if header.tag != expected {
        return Err(FormatError::UnexpectedTag {
            expected,
            found: header.tag,
        });
    }
    Ok(header.size)
}

/// Buffer a payload of `size` bytes, refusing anything over `limit`.
pub fn read_payload<S: ByteSource + ?Sized>(
    src: &mut S,
    tag: Tag,
    size: u32,
    limit: u32,
) -> Result<Vec<u8>, FormatError> {
    if size > limit {
        return Err(FormatError::ChunkTooLarge { tag, size, limit });
    }
    let mut payload = vec![0u8; size as usize];
    src.read_full(&mut payload)?;
    Ok(payload)
}

/// Read the `SANM` envelope and the `SHDR` that opens it.
pub fn read_stream_header<S: ByteSource + ?Sized>(
    src: &mut S,
    limit: u32,
) -> Result<StreamHeader, FormatError> {
    // The envelope size covers the whole movie and is not needed
    expect_chunk(src, Tag::Sanm)?;
    let size = expect_chunk(src, Tag::Shdr)?;
    if size < SHDR_MIN_LEN {
        return Err(FormatError::HeaderTooSmall {
            tag: Tag::Shdr,
            size,
            needed: SHDR_MIN_LEN,
        });
    }
    let payload = read_payload(src, Tag::Shdr, size, limit)?;

    let mut cur = &payload[..];
    cur.advance(2); // version
    let frame_count = u32::from(cur.get_u16_le());
    cur.advance(4);
    let width = u32::from(cur.get_u16_le());
    let height = u32::from(cur.get_u16_le());
    cur.advance(2);
    let frame_interval_us = cur.get_u32_le();

    Ok(StreamHeader {
        frame_count,
        width,
        height,
        frame_interval_us,
    })
}

/// Read `FLHD`. Returns the audio format when a `Wave` record is present.
pub fn read_format_header<S: ByteSource + ?Sized>(
    src: &mut S,
    limit: u32,
) -> Result<Option<AudioFormat>, FormatError> {
    let size = expect_chunk(src, Tag::Flhd)?;
    let payload = read_payload(src, Tag::Flhd, size, limit)?;

    let mut format = None;
    for chunk in ChunkCursor::new(&payload) {
        let chunk = chunk?;
        match chunk.tag {
            // Video codec takes no init data here
            Tag::Bl16 => {}
            Tag::Wave => {
                if chunk.size < WAVE_FORMAT_MIN_LEN {
                    return Err(FormatError::HeaderTooSmall {
                        tag: Tag::Wave,
                        size: chunk.size,
                        needed: WAVE_FORMAT_MIN_LEN,
                    });
                }
                let mut cur = chunk.payload;
                let sample_rate = cur.get_u32_le();
                let channels = cur.get_u32_le();
                if sample_rate == 0 || !(1..=2).contains(&channels) {
                    return Err(FormatError::InvalidAudioFormat {
                        sample_rate,
                        channels,
                    });
                }
                format = Some(AudioFormat {
                    sample_rate,
                    channels,
                });
            }
            other => return Err(FormatError::UnknownTag(other)),
        }
    }
    Ok(format)
}

/// Read the next frame's envelope (optional `ANNO`, then `FRME`) and buffer
/// the `FRME` payload.
pub fn read_frame_envelope<S: ByteSource + ?Sized>(
    src: &mut S,
    limit: u32,
) -> Result<Vec<u8>, FormatError> {
    let mut header = read_chunk_header(src)?;
    if header.tag == Tag::Anno {
        src.skip(u64::from(header.size))?;
        header = read_chunk_header(src)?;
    }
    if header.tag != Tag::Frme {
        return Err(FormatError::UnexpectedTag {
            expected: Tag::Frme,
            found: header.tag,
        });
    }
    read_payload(src, Tag::Frme, header.size, limit)
}

// ============================================================================
// In-memory walking
// ============================================================================

/// A chunk inside a buffered region. The payload borrows from the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub tag: Tag,
    pub size: u32,
    pub payload: &'a [u8],
}

/// Cursor over consecutive chunks in a buffered region.
///
/// Yields chunks until the region is used up. A header that does not fit, or
/// a size reaching past the region, is an error and ends the walk.
#[derive(Debug, Clone)]
pub struct ChunkCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    pub fn read_chunk(&mut self) -> Result<Chunk<'a>, FormatError> {
        let rest = &self.data[self.pos..];
        if rest.len() < HEADER_LEN {
            return Err(FormatError::PartialHeader {
                available: rest.len(),
            });
        }
        let mut cur = rest;
        let header = read_chunk_header(&mut cur)?;
        let available = cur.len();
        if header.size as usize > available {
            return Err(FormatError::ChunkOverrun {
                tag: header.tag,
                size: header.size,
                available,
            });
        }
        let payload = &cur[..header.size as usize];
        self.pos += HEADER_LEN + header.size as usize;
        Ok(Chunk {
            tag: header.tag,
            size: header.size,
            payload,
        })
    }
}

impl<'a> Iterator for ChunkCursor<'a> {
    type Item = Result<Chunk<'a>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            return None;
        }
        let result = self.read_chunk();
        if result.is_err() {
            self.pos = self.data.len();
        }
        Some(result)
    }
}

// ============================================================================
// Test fixtures
// ============================================================================


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    const LIMIT: u32 = 1 << 20;

    #[test]
    fn parses_chunk_header() {
        let data = b"FRME\x00\x00\x01\x02";
        let mut src = &data[..];
        let header = read_chunk_header(&mut src).expect("header");
        assert_eq!(header.tag, Tag::Frme);
        assert_eq!(header.size, 0x102);
    }

    #[test]
    fn keeps_unknown_fourcc() {
        let tag = Tag::from_fourcc(*b"IACT");
        assert_eq!(tag, Tag::Other(*b"IACT"));
        assert_eq!(tag.to_string(), "IACT");
        assert_eq!(Tag::Other([0, b'a', 0xff, b'b']).to_string(), ".a.b");
    }

    #[test]
    fn consumes_exactly_declared_size() {
        let mut data = chunk(Tag::Anno, b"some notes");
        data.push(0xAA);
        data.extend(chunk(Tag::Frme, &[1, 2, 3]));
        data.push(0xBB);

        let mut src = &data[..];
        let anno = read_chunk_header(&mut src).unwrap();
        src.skip(u64::from(anno.size)).unwrap();
        assert_eq!(src.read_u8().unwrap(), 0xAA);
        let frme = read_chunk_header(&mut src).unwrap();
        let payload = read_payload(&mut src, frme.tag, frme.size, LIMIT).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(src.read_u8().unwrap(), 0xBB);
        assert!(src.is_empty());
    }

    #[test]
    fn cursor_stops_at_sentinels() {
        let mut data = chunk(Tag::Bl16, &[7; 5]);
        data.extend(chunk(Tag::Wave, &[9; 3]));
        let mut cursor = ChunkCursor::new(&data);

        let first = cursor.read_chunk().unwrap();
        assert_eq!(first.tag, Tag::Bl16);
        assert_eq!(first.payload, &[7; 5]);
        assert_eq!(cursor.pos, 13);

        let second = cursor.read_chunk().unwrap();
        assert_eq!(second.tag, Tag::Wave);
        assert_eq!(second.payload, &[9; 3]);
        assert!(cursor.is_empty());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn cursor_rejects_overrun() {
        let mut data = chunk(Tag::Bl16, &[0; 4]);
        data[7] = 40;
        let mut cursor = ChunkCursor::new(&data);
        assert_eq!(
            cursor.next().unwrap(),
            Err(FormatError::ChunkOverrun {
                tag: Tag::Bl16,
                size: 40,
                available: 4
            })
        );
        assert!(cursor.next().is_none());
    }

    #[test]
    fn cursor_rejects_partial_header() {
        let data = [b'B', b'l', b'1'];
        let mut cursor = ChunkCursor::new(&data);
        assert_eq!(
            cursor.read_chunk(),
            Err(FormatError::PartialHeader { available: 3 })
        );
    }

    #[test]
    fn parses_stream_header() {
        let mut data = chunk(Tag::Sanm, &[]);
        data.extend(shdr(3, 64, 48, 83_333));
        let mut src = &data[..];
        let header = read_stream_header(&mut src, LIMIT).unwrap();
        assert_eq!(
            header,
            StreamHeader {
                frame_count: 3,
                width: 64,
                height: 48,
                frame_interval_us: 83_333
            }
        );
        assert_eq!(header.duration_us(), 249_999);
        assert!(src.is_empty());
    }

    #[test]
    fn stream_header_needs_sanm() {
        let data = shdr(3, 64, 48, 83_333);
        let mut src = &data[..];
        assert_eq!(
            read_stream_header(&mut src, LIMIT),
            Err(FormatError::UnexpectedTag {
                expected: Tag::Sanm,
                found: Tag::Shdr
            })
        );
    }

    #[test]
    fn stream_header_too_small() {
        let mut data = chunk(Tag::Sanm, &[]);
        data.extend(chunk(Tag::Shdr, &[0; 10]));
        let mut src = &data[..];
        assert!(matches!(
            read_stream_header(&mut src, LIMIT),
            Err(FormatError::HeaderTooSmall { needed: 18, .. })
        ));
    }

    #[test]
    fn parses_format_header() {
        let data = flhd(Some((22050, 2)));
        let mut src = &data[..];
        assert_eq!(
            read_format_header(&mut src, LIMIT).unwrap(),
            Some(AudioFormat {
                sample_rate: 22050,
                channels: 2
            })
        );

        let data = flhd(None);
        let mut src = &data[..];
        assert_eq!(read_format_header(&mut src, LIMIT).unwrap(), None);
    }

    #[test]
    fn format_header_rejects_bad_records() {
        let data = chunk(Tag::Flhd, &chunk(Tag::Other(*b"IACT"), &[0; 4]));
        let mut src = &data[..];
        assert_eq!(
            read_format_header(&mut src, LIMIT),
            Err(FormatError::UnknownTag(Tag::Other(*b"IACT")))
        );

        let data = chunk(Tag::Flhd, &wave_format(22050, 0));
        let mut src = &data[..];
        assert!(matches!(
            read_format_header(&mut src, LIMIT),
            Err(FormatError::InvalidAudioFormat { channels: 0, .. })
        ));
    }

    #[test]
    fn frame_envelope_skips_annotation() {
        let mut data = chunk(Tag::Anno, b"director's cut");
        data.extend(frame(&[chunk(Tag::Bl16, &[1, 2])]));
        data.extend(frame(&[]));
        let mut src = &data[..];

        let payload = read_frame_envelope(&mut src, LIMIT).unwrap();
        assert_eq!(payload, chunk(Tag::Bl16, &[1, 2]));
        assert!(read_frame_envelope(&mut src, LIMIT).unwrap().is_empty());
        assert!(matches!(
            read_frame_envelope(&mut src, LIMIT),
            Err(FormatError::Truncated(ShortRead { wanted: 8, got: 0 }))
        ));
    }

    #[test]
    fn frame_envelope_rejects_other_tags() {
        let data = chunk(Tag::Bl16, &[]);
        let mut src = &data[..];
        assert_eq!(
            read_frame_envelope(&mut src, LIMIT),
            Err(FormatError::UnexpectedTag {
                expected: Tag::Frme,
                found: Tag::Bl16
            })
        );
    }

    #[test]
    fn oversized_payload_is_refused() {
        let data = frame(&[chunk(Tag::Bl16, &[0; 64])]);
        let mut src = &data[..];
        assert_eq!(
            read_frame_envelope(&mut src, 16),
            Err(FormatError::ChunkTooLarge {
                tag: Tag::Frme,
                size: 72,
                limit: 16
            })
        );
    }
}
