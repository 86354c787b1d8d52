//! Host-owned frame storage.

use std::ops::Deref;
use std::sync::MutexGuard;

use crate::abi::PixelFormat;

/// The most recent video frame of one core.
///
/// Invariant: `pixels.len() == pitch * height` for the current format.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    pitch: usize,
    aspect_ratio: f32,
    pixels: Vec<u8>,
    // Number of frames written so far. Zero means no frame was produced yet.
    serial: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self {
            format: PixelFormat::Argb1555,
            width: 0,
            height: 0,
            pitch: 0,
            aspect_ratio: 0.0,
            pixels: Vec::new(),
            serial: 0,
        }
    }
}

impl FrameBuffer {
    /// Prepare storage for a frame, reallocating when the format or dimensions changed.
    /// Returns the pixel storage for the caller to fill.
    pub(crate) fn prepare(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pitch: usize,
        aspect_ratio: f32,
    ) -> &mut [u8] {
        let len = pitch.saturating_mul(height as usize);
        let reshaped = self.format != format
            || self.width != width
            || self.height != height
            || self.pitch != pitch;
        if reshaped || self.pixels.len() != len {
            self.pixels = vec![0; len];
        }

        self.format = format;
        self.width = width;
        self.height = height;
        self.pitch = pitch;
        self.aspect_ratio = aspect_ratio;
        self.serial += 1;
        &mut self.pixels
    }

    /// Copy `height` rows of `pitch` bytes from `src`.
    pub(crate) fn write(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pitch: usize,
        aspect_ratio: f32,
        src: &[u8],
    ) {
        let dst = self.prepare(format, width, height, pitch, aspect_ratio);
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Frames written since the core was created.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Convert to tightly packed RGBA8888 (`width * height * 4` bytes).
    pub fn to_rgba8888(&self) -> Vec<u8> {
        let width = self.width as usize;
        let bpp = self.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(width * self.height as usize * 4);

        for row in self.pixels.chunks_exact(self.pitch.max(1)).take(self.height as usize) {
            for px in row[..(width * bpp).min(row.len())].chunks_exact(bpp) {
                let rgba = match self.format {
                    PixelFormat::Argb1555 => {
                        let v = u16::from_ne_bytes([px[0], px[1]]);
                        [
                            expand5((v >> 10) & 0x1f),
                            expand5((v >> 5) & 0x1f),
                            expand5(v & 0x1f),
                            0xff,
                        ]
                    }
                    PixelFormat::Rgb565 => {
                        let v = u16::from_ne_bytes([px[0], px[1]]);
                        [
                            expand5((v >> 11) & 0x1f),
                            expand6((v >> 5) & 0x3f),
                            expand5(v & 0x1f),
                            0xff,
                        ]
                    }
                    PixelFormat::Xrgb8888 => {
                        let v = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                        [(v >> 16) as u8, (v >> 8) as u8, v as u8, 0xff]
                    }
                };
                out.extend_from_slice(&rgba);
            }
        }

        out
    }
}

fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

/// Read access to the frame buffer. The buffer is released when the guard drops.
pub struct FrameGuard<'a> {
    guard: MutexGuard<'a, FrameBuffer>,
}

impl<'a> FrameGuard<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, FrameBuffer>) -> Self {
        Self { guard }
    }
}

impl Deref for FrameGuard<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.guard
    }
}
