//! # Streaming Inflate Reader
//!
//! Cutscene files ship gzip-framed: a short preamble followed by a raw
//! DEFLATE bitstream. The trailer is never checked. This reader strips the
//! preamble and inflates on demand, pulling fixed-size chunks from the
//! physical resource whenever the inflater runs dry.
//!
//! ```text
//! ┌──────────┐ 16 KiB  ┌───────────┐  exact   ┌──────────────┐
//! │ Resource │───────►│ Decompress │────────►│ chunk parser │
//! └──────────┘ chunks  └───────────┘  counts  └──────────────┘
//! ```
//!
//! Corruption in the middle of the stream is not an error to callers: the
//! reader logs it, latches `done`, and every later read returns 0. The chunk
//! parser then sees an ordinary end of data.

use std::io::{ErrorKind, Read};

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

use crate::source::ByteSource;

// ============================================================================
// Preamble Constants
// ============================================================================

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FLAG_HCRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;

/// Physical read size used when the caller does not pick one.
pub const DEFAULT_INPUT_BUFFER: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bad identification bytes {found:02x?}")]
    BadMagic { found: [u8; 2] },
    #[error("Unsupported compression method {0}")]
    UnsupportedMethod(u8),
    #[error("Unsupported header flags 0x{flags:02x} (extra field or comment present)")]
    UnsupportedHeader { flags: u8 },
    #[error("Preamble ended early")]
    TruncatedHeader,
}

// ============================================================================
// ZlibStream
// ============================================================================

/// Sequential reader over a gzip-framed raw DEFLATE resource.
pub struct ZlibStream<R: Read> {
    reader: R,
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    inflater: Decompress,
    /// The physical resource has nothing more to give
    input_eof: bool,
    done: bool,
}

impl<R: Read> ZlibStream<R> {
    pub fn new(reader: R) -> Result<Self, OpenError> {
        Self::with_buffer_size(reader, DEFAULT_INPUT_BUFFER)
    }

    /// Validate and strip the preamble, then set up a raw inflater.
    pub fn with_buffer_size(mut reader: R, buffer_size: usize) -> Result<Self, OpenError> {
        let mut fixed = [0u8; 10];
        read_preamble(&mut reader, &mut fixed)?;

        let magic = [fixed[0], fixed[1]];
        if magic != GZIP_MAGIC {
            return Err(OpenError::BadMagic { found: magic });
        }
        let method = fixed[2];
        if method != METHOD_DEFLATE {
            return Err(OpenError::UnsupportedMethod(method));
        }
        let flags = fixed[3];
        if flags & (FLAG_EXTRA | FLAG_COMMENT) != 0 {
            return Err(OpenError::UnsupportedHeader { flags });
        }
        // fixed[4..10]: mtime, extra flags, OS - unused

        if flags & FLAG_NAME != 0 {
            let mut byte = [0u8; 1];
            loop {
                read_preamble(&mut reader, &mut byte)?;
                if byte[0] == 0 {
                    break;
                }
            }
        }
        if flags & FLAG_HCRC != 0 {
            // Present but not verified here
            let mut crc = [0u8; 2];
            read_preamble(&mut reader, &mut crc)?;
        }

        tracing::debug!("Compressed movie preamble ok (flags 0x{:02x})", flags);

        Ok(Self {
            reader,
            input: vec![0u8; buffer_size.max(1)],
            in_pos: 0,
            in_len: 0,
            // Raw stream: no zlib header, no integrity trailer
            inflater: Decompress::new(false),
            input_eof: false,
            done: false,
        })
    }

    /// Decompressed bytes handed out so far.
    pub fn total_out(&self) -> u64 {
        self.inflater.total_out()
    }

    fn fill_input(&mut self) -> std::io::Result<usize> {
        loop {
            match self.reader.read(&mut self.input) {
                Ok(n) => {
                    self.in_pos = 0;
                    self.in_len = n;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Inflate into `buf` until it is full or the stream stops.
    ///
    /// The count may be short; after a short count every further call
    /// returns 0.
    pub fn read_decompressed(&mut self, buf: &mut [u8]) -> usize {
        if self.done || buf.is_empty() {
            return 0;
        }

        let mut written = 0;
        while written < buf.len() {
            if self.in_pos == self.in_len && !self.input_eof {
                match self.fill_input() {
                    Ok(0) => self.input_eof = true,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Compressed resource read error: {}", e);
                        self.input_eof = true;
                    }
                }
            }

            // Once the resource is drained the inflater may still hold
            // decoded bytes; keep pulling them with empty input.
            let flush = if self.input_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();
            let status = self.inflater.decompress(
                &self.input[self.in_pos..self.in_len],
                &mut buf[written..],
                flush,
            );
            let consumed = (self.inflater.total_in() - in_before) as usize;
            let produced = (self.inflater.total_out() - out_before) as usize;
            self.in_pos += consumed;
            written += produced;

            match status {
                Ok(Status::StreamEnd) => {
                    tracing::info!("Stream ended after {} bytes", self.total_out());
                    self.done = true;
                    break;
                }
                Ok(Status::Ok) | Ok(Status::BufError) => {
                    if consumed == 0 && produced == 0 {
                        if self.input_eof {
                            tracing::warn!(
                                "Compressed resource exhausted before stream end ({} bytes out)",
                                self.total_out()
                            );
                            self.done = true;
                            break;
                        }
                        if self.in_pos < self.in_len {
                            tracing::warn!("Inflater stalled with input pending");
                            self.done = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Decompression error: {}", e);
                    self.done = true;
                    break;
                }
            }
        }

        written
    }
}

impl<R: Read> ByteSource for ZlibStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.read_decompressed(buf)
    }
}

fn read_preamble<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), OpenError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => OpenError::TruncatedHeader,
        _ => OpenError::Io {
            path: "<stream>".to_string(),
            source: e,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::{Compression, GzBuilder};
    use std::io::{Cursor, Write};

    fn sample_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31) ^ (i >> 7)) as u8).collect()
    }

    fn deflate_raw(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn preamble(flags: u8) -> Vec<u8> {
        vec![0x1f, 0x8b, 8, flags, 0, 0, 0, 0, 0, 3]
    }

    fn read_all<R: Read>(stream: &mut ZlibStream<R>, step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            let n = stream.read(&mut buf);
            assert!(n <= step);
            out.extend_from_slice(&buf[..n]);
            if n < step {
                break;
            }
        }
        out
    }

    #[test]
    fn round_trips_raw_deflate() {
        let original = sample_payload(100_000);
        let mut file = preamble(0);
        file.extend(deflate_raw(&original));

        let mut stream = ZlibStream::with_buffer_size(Cursor::new(file), 512).unwrap();
        let decoded = read_all(&mut stream, 777);
        assert_eq!(decoded, original);
        assert!(stream.done);
        assert_eq!(stream.read(&mut [0u8; 16]), 0);
    }

    #[test]
    fn untrailed_stream_yields_every_byte() {
        for (len, buffer, step) in [(100_000, DEFAULT_INPUT_BUFFER, 777), (3000, 64, 3000), (40, 4096, 1)] {
            let original = sample_payload(len);
            let mut file = preamble(0);
            file.extend(deflate_raw(&original));

            let mut stream = ZlibStream::with_buffer_size(Cursor::new(file), buffer).unwrap();
            let decoded = read_all(&mut stream, step);
            assert_eq!(decoded.len(), original.len());
            assert_eq!(decoded, original);
            assert_eq!(stream.total_out(), len as u64);
        }
    }

    #[test]
    fn reads_gzip_with_stored_name() {
        let original = sample_payload(5000);
        let mut enc = GzBuilder::new()
            .filename("intro.snm")
            .write(Vec::new(), Compression::best());
        enc.write_all(&original).unwrap();
        let file = enc.finish().unwrap();
        assert_ne!(file[3] & FLAG_NAME, 0);

        let mut stream = ZlibStream::new(Cursor::new(file)).unwrap();
        assert_eq!(read_all(&mut stream, 4096), original);
    }

    #[test]
    fn skips_header_checksum() {
        let original = b"header checksum is skipped, not verified".to_vec();
        let mut file = preamble(FLAG_HCRC);
        file.extend([0xde, 0xad]);
        file.extend(deflate_raw(&original));

        let mut stream = ZlibStream::new(Cursor::new(file)).unwrap();
        assert_eq!(read_all(&mut stream, 64), original);
    }

    #[test]
    fn rejects_extra_and_comment_flags() {
        for flags in [FLAG_EXTRA, FLAG_COMMENT, FLAG_EXTRA | FLAG_NAME] {
            let mut file = preamble(flags);
            file.extend(deflate_raw(b"x"));
            let err = ZlibStream::new(Cursor::new(file)).err().unwrap();
            assert!(matches!(err, OpenError::UnsupportedHeader { .. }));
        }
    }

    #[test]
    fn rejects_bad_magic_and_method() {
        let mut file = preamble(0);
        file[1] = 0x8c;
        assert!(matches!(
            ZlibStream::new(Cursor::new(file)).err().unwrap(),
            OpenError::BadMagic { found: [0x1f, 0x8c] }
        ));

        let mut file = preamble(0);
        file[2] = 7;
        assert!(matches!(
            ZlibStream::new(Cursor::new(file)).err().unwrap(),
            OpenError::UnsupportedMethod(7)
        ));
    }

    #[test]
    fn truncated_preamble_fails() {
        let file = vec![0x1f, 0x8b, 8];
        assert!(matches!(
            ZlibStream::new(Cursor::new(file)).err().unwrap(),
            OpenError::TruncatedHeader
        ));

        // Name flagged but never terminated
        let mut file = preamble(FLAG_NAME);
        file.extend(b"movie");
        assert!(matches!(
            ZlibStream::new(Cursor::new(file)).err().unwrap(),
            OpenError::TruncatedHeader
        ));
    }

    #[test]
    fn corrupt_block_ends_stream_quietly() {
        let mut file = preamble(0);
        // Non-final stored block holding "hello"
        file.extend([0x00, 0x05, 0x00, 0xfa, 0xff]);
        file.extend(b"hello");
        // Final block with the reserved block type
        file.extend([0x07, 0x00, 0x00]);

        let mut stream = ZlibStream::new(Cursor::new(file)).unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf);
        assert_eq!(&buf[..n], b"hello");
        assert!(stream.done);
        assert_eq!(stream.read(&mut buf), 0);
    }

    #[test]
    fn exhausted_resource_gives_short_read() {
        let original = sample_payload(20_000);
        let compressed = deflate_raw(&original);
        let mut file = preamble(0);
        file.extend(&compressed[..compressed.len() / 2]);

        let mut stream = ZlibStream::with_buffer_size(Cursor::new(file), 256).unwrap();
        let mut buf = vec![0u8; original.len()];
        let n = stream.read(&mut buf);
        assert!(n < original.len());
        assert_eq!(&buf[..n], &original[..n]);
        assert_eq!(stream.read(&mut buf), 0);
    }

    #[test]
    fn zero_length_read_is_free() {
        let mut file = preamble(0);
        file.extend(deflate_raw(b"abc"));
        let mut stream = ZlibStream::new(Cursor::new(file)).unwrap();
        assert_eq!(stream.read(&mut []), 0);
        assert!(!stream.done);
        assert_eq!(stream.total_out(), 0);
    }
}
