//! # Byte Sources
//!
//! Pull-based byte readers the container parser walks. A read may come back
//! short: that means the logical stream is over (cleanly or because the
//! underlying data went bad), never that the caller should retry.
//!
//! Multi-byte helpers are composed from `read` and assemble values in the
//! documented byte order, independent of host endianness.

use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read};
use std::path::Path;

use thiserror::Error;

use crate::config::PlayerConfig;
use crate::zlib_stream::{OpenError, ZlibStream, GZIP_MAGIC};

/// Fewer bytes were available than a fixed-size read needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unexpected end of data: wanted {wanted} bytes, got {got}")]
pub struct ShortRead {
    pub wanted: usize,
    pub got: usize,
}

// ============================================================================
// ByteSource
// ============================================================================

/// Sequential byte reader over a movie resource.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes and return how many were written.
    ///
    /// Returns less than requested only when no more data will follow.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Fill `buf` completely or report how far it got.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<(), ShortRead> {
        let got = self.read(buf);
        if got == buf.len() {
            Ok(())
        } else {
            Err(ShortRead {
                wanted: buf.len(),
                got,
            })
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ShortRead>
    where
        Self: Sized,
    {
        let mut buf = [0u8; N];
        self.read_full(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, ShortRead> {
        let mut b = [0u8; 1];
        self.read_full(&mut b)?;
        Ok(b[0])
    }

    fn read_u16_le(&mut self) -> Result<u16, ShortRead> {
        let lo = u16::from(self.read_u8()?);
        let hi = u16::from(self.read_u8()?);
        Ok(lo | (hi << 8))
    }

    fn read_u16_be(&mut self) -> Result<u16, ShortRead> {
        let hi = u16::from(self.read_u8()?);
        let lo = u16::from(self.read_u8()?);
        Ok(lo | (hi << 8))
    }

    fn read_u32_le(&mut self) -> Result<u32, ShortRead> {
        let lo = u32::from(self.read_u16_le()?);
        let hi = u32::from(self.read_u16_le()?);
        Ok(lo | (hi << 16))
    }

    fn read_u32_be(&mut self) -> Result<u32, ShortRead> {
        let hi = u32::from(self.read_u16_be()?);
        let lo = u32::from(self.read_u16_be()?);
        Ok(lo | (hi << 16))
    }

    /// Discard `count` bytes. Compressed streams cannot seek, so this reads.
    fn skip(&mut self, count: u64) -> Result<(), ShortRead> {
        let mut scratch = [0u8; 4096];
        let mut left = count;
        while left > 0 {
            let step = left.min(scratch.len() as u64) as usize;
            let got = self.read(&mut scratch[..step]);
            if got < step {
                let consumed = (count - left) as usize + got;
                return Err(ShortRead {
                    wanted: count as usize,
                    got: consumed,
                });
            }
            left -= step as u64;
        }
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }
}

/// In-memory source; reading advances the slice.
impl ByteSource for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        n
    }
}

// ============================================================================
// Plain (uncompressed) resources
// ============================================================================

/// Uncompressed resource. I/O errors end the stream the same way a
/// decompression fault does.
pub struct PlainStream<R: Read> {
    reader: R,
    done: bool,
}

impl<R: Read> PlainStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> ByteSource for PlainStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.done {
            return 0;
        }
        let mut written = 0;
        while written < buf.len() {
            match self.reader.read(&mut buf[written..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Movie read error: {}", e);
                    self.done = true;
                    break;
                }
            }
        }
        written
    }
}

// ============================================================================
// MovieSource
// ============================================================================

type BoxedReader = BufReader<Box<dyn Read + Send>>;

/// A movie resource, compressed or not, picked by its leading bytes.
pub enum MovieSource {
    Compressed(ZlibStream<BoxedReader>),
    Plain(PlainStream<BoxedReader>),
}

impl MovieSource {
    /// Open a movie file from disk.
    pub fn open<P: AsRef<Path>>(path: P, config: &PlayerConfig) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| OpenError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!("Opening movie {}", path.display());
        Self::from_reader(Box::new(file), config)
    }

    /// Sniff the first bytes of `reader`: a bare `SANM` envelope is read
    /// directly, anything else must carry the compressed-resource preamble.
    pub fn from_reader(
        mut reader: Box<dyn Read + Send>,
        config: &PlayerConfig,
    ) -> Result<Self, OpenError> {
        // Readers may trickle bytes, so gather the whole tag before deciding
        let mut head = [0u8; 4];
        let mut got = 0;
        while got < head.len() {
            match Read::read(&mut reader, &mut head[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(OpenError::Io {
                        path: "<stream>".to_string(),
                        source,
                    })
                }
            }
        }
        let head = &head[..got];
        let is_plain = head == b"SANM";
        if !is_plain && !head.starts_with(&GZIP_MAGIC) {
            tracing::debug!("Unrecognized movie preamble, trying compressed reader anyway");
        }

        let rejoined: Box<dyn Read + Send> = Box::new(Cursor::new(head.to_vec()).chain(reader));
        let reader = BufReader::with_capacity(config.input_buffer_size.max(16), rejoined);
        if is_plain {
            tracing::debug!("Movie is stored uncompressed");
            return Ok(MovieSource::Plain(PlainStream::new(reader)));
        }
        ZlibStream::with_buffer_size(reader, config.input_buffer_size).map(MovieSource::Compressed)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, MovieSource::Compressed(_))
    }
}

impl ByteSource for MovieSource {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        match self {
            MovieSource::Compressed(s) => s.read(buf),
            MovieSource::Plain(s) => s.read(buf),
        }
    }
}
