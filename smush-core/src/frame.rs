//! # Decoded Frames
//!
//! Two rasters per movie. The decode buffer belongs to the scheduler and is
//! scribbled on by the video codec; the presentation buffer is shared with
//! the renderer and only ever holds whole frames. Publishing copies one into
//! the other under the presentation lock and raises the dirty flag.
//!
//! Pixels are RGB565, two bytes each, little-endian.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

pub const BYTES_PER_PIXEL: usize = 2;

pub fn raster_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

// ============================================================================
// Decode buffer
// ============================================================================

/// Working raster the video codec writes into.
#[derive(Debug)]
pub struct FrameBuffers {
    decode: Vec<u8>,
}

impl FrameBuffers {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            decode: vec![0u8; raster_len(width, height)],
        }
    }

    pub fn decode_buf(&mut self) -> &mut [u8] {
        &mut self.decode
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.decode
    }
}

// ============================================================================
// Presentation buffer
// ============================================================================

/// The last complete frame, shared with whoever renders it.
#[derive(Debug)]
pub struct Presentation {
    width: u32,
    height: u32,
    origin: (i32, i32),
    pixels: Mutex<Vec<u8>>,
    dirty: AtomicBool,
    /// 1-based index of the frame on display, 0 before the first
    frame_number: AtomicU32,
}

impl Presentation {
    pub fn new(width: u32, height: u32, origin: (i32, i32)) -> Self {
        Self {
            width,
            height,
            origin,
            pixels: Mutex::new(vec![0u8; raster_len(width, height)]),
            dirty: AtomicBool::new(false),
            frame_number: AtomicU32::new(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Screen position the host asked for at open.
    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Run `f` on the pixels if a new frame arrived since the last call.
    pub fn take_if_updated<T>(&self, f: impl FnOnce(&[u8]) -> T) -> Option<T> {
        let pixels = self.pixels.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(f(&pixels))
    }

    /// Borrow the current pixels without touching the dirty flag.
    pub fn with_pixels<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        f(&self.pixels.lock())
    }

    /// Current frame as packed RGB24.
    pub fn to_rgb24(&self) -> Vec<u8> {
        self.with_pixels(rgb565_to_rgb24)
    }

    pub(crate) fn publish(&self, frame: &FrameBuffers, frame_number: u32) {
        let mut pixels = self.pixels.lock();
        let src = frame.as_bytes();
        let len = src.len().min(pixels.len());
        pixels[..len].copy_from_slice(&src[..len]);
        self.frame_number.store(frame_number, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Expand little-endian RGB565 into packed RGB24.
pub fn rgb565_to_rgb24(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / BYTES_PER_PIXEL * 3);
    for px in src.chunks_exact(BYTES_PER_PIXEL) {
        let v = u16::from_le_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        // Replicate high bits so full intensity maps to 255
        out.push((r << 3) | (r >> 2));
        out.push((g << 2) | (g >> 4));
        out.push((b << 3) | (b >> 2));
    }
    out
}
