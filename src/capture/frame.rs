//! Frame type and the capture contract.

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A rectangle in absolute screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRect {
    /// Left edge in screen coordinates
    pub x: i32,
    /// Top edge in screen coordinates
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for ScreenRect {
    fn default() -> Self {
        // Matches the default overlay area of the game layout at 100% scaling
        Self::new(100, 100, 172, 495)
    }
}

/// Errors reported by a frame source.
///
/// All of them are transient from the control loop's point of view: it counts
/// them and only escalates after several in a row.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("capture region {0:?} is empty")]
    EmptyRegion(ScreenRect),
    #[error("display unavailable: {0}")]
    Unavailable(String),
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
}

/// An immutable RGBA pixel buffer with its capture time.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: RgbaImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: RgbaImage, captured_at: Instant) -> Self {
        Self {
            pixels,
            captured_at,
        }
    }

    /// Builds a frame from raw BGRA rows as delivered by the OS (row stride = width * 4).
    pub fn from_bgra(width: u32, height: u32, bgra: &[u8], captured_at: Instant) -> Option<Self> {
        if bgra.len() < (width as usize) * (height as usize) * 4 {
            return None;
        }
        let pixels: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| {
            let offset = ((y * width + x) * 4) as usize;
            // BGRA -> RGBA, alpha forced opaque (GDI leaves it undefined)
            Rgba([bgra[offset + 2], bgra[offset + 1], bgra[offset], 255])
        });
        Some(Self::new(pixels, captured_at))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Returns the RGB triple at (x, y). Caller must stay in bounds.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let p = self.pixels.get_pixel(x, y);
        [p[0], p[1], p[2]]
    }
}

/// Something that can grab a rectangle of the screen on demand.
pub trait FrameSource {
    /// Captures `region`. Must return within the source's timeout instead of
    /// blocking the caller.
    fn capture(&mut self, region: &ScreenRect) -> Result<Frame, CaptureError>;
}
