// SPDX-License-Identifier: GPL-3.0-only

//! Display surfaces for published frames
//!
//! A [`Surface`] is whatever the consumer draws with: a GPU texture, a
//! terminal widget, or the in-memory [`PixelSurface`] used headless. The
//! session allocates each surface once the negotiated mode is known and
//! uploads the newest frame into it from `update()`.

use tracing::warn;

use crate::backends::driver::PixelBuffer;

/// Pixel layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// Interleaved 8-bit RGB
    Rgb8,
    /// Single-channel 16-bit luminance
    Gray16,
}

/// Destination rectangle for a draw call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Rendering collaborator that receives published frames
pub trait Surface: Send {
    /// Allocate storage for the given size and format
    fn allocate(&mut self, width: u32, height: u32, format: SurfaceFormat);

    /// Whether `allocate` has been called
    fn is_allocated(&self) -> bool;

    /// Upload an RGB frame
    fn load_rgb8(&mut self, pixels: &PixelBuffer<u8>);

    /// Upload a 16-bit depth frame
    fn load_gray16(&mut self, pixels: &PixelBuffer<u16>);

    /// Draw the last uploaded frame
    fn draw(&mut self, rect: DrawRect);

    /// Allocated width
    fn width(&self) -> u32;

    /// Allocated height
    fn height(&self) -> u32;
}

/// Stored pixels of a [`PixelSurface`]
#[derive(Debug, Clone, PartialEq)]
pub enum SurfacePixels {
    Empty,
    Rgb8(Vec<u8>),
    Gray16(Vec<u16>),
}

/// Headless surface that keeps a CPU copy of the last upload
///
/// Draw calls are recorded rather than rendered so a frontend can pick them
/// up.
#[derive(Debug, Clone)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    format: Option<SurfaceFormat>,
    pixels: SurfacePixels,
    uploads: u64,
    last_draw: Option<DrawRect>,
}

impl PixelSurface {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            format: None,
            pixels: SurfacePixels::Empty,
            uploads: 0,
            last_draw: None,
        }
    }

    pub fn format(&self) -> Option<SurfaceFormat> {
        self.format
    }

    pub fn pixels(&self) -> &SurfacePixels {
        &self.pixels
    }

    /// Number of frames uploaded since allocation
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn last_draw(&self) -> Option<DrawRect> {
        self.last_draw
    }

    fn accepts(&self, format: SurfaceFormat, width: u32, height: u32) -> bool {
        if self.format != Some(format) {
            warn!(expected = ?self.format, got = ?format, "Surface format mismatch");
            return false;
        }
        if self.width != width || self.height != height {
            warn!(
                surface = %format!("{}x{}", self.width, self.height),
                frame = %format!("{}x{}", width, height),
                "Surface size mismatch"
            );
            return false;
        }
        true
    }
}

impl Default for PixelSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for PixelSurface {
    fn allocate(&mut self, width: u32, height: u32, format: SurfaceFormat) {
        let len = width as usize * height as usize;
        self.pixels = match format {
            SurfaceFormat::Rgb8 => SurfacePixels::Rgb8(vec![0; len * 3]),
            SurfaceFormat::Gray16 => SurfacePixels::Gray16(vec![0; len]),
        };
        self.width = width;
        self.height = height;
        self.format = Some(format);
        self.uploads = 0;
    }

    fn is_allocated(&self) -> bool {
        self.format.is_some()
    }

    fn load_rgb8(&mut self, pixels: &PixelBuffer<u8>) {
        if !self.accepts(SurfaceFormat::Rgb8, pixels.width, pixels.height) {
            return;
        }
        if let SurfacePixels::Rgb8(data) = &mut self.pixels
            && data.len() == pixels.len()
        {
            data.copy_from_slice(pixels.as_slice());
            self.uploads += 1;
        }
    }

    fn load_gray16(&mut self, pixels: &PixelBuffer<u16>) {
        if !self.accepts(SurfaceFormat::Gray16, pixels.width, pixels.height) {
            return;
        }
        if let SurfacePixels::Gray16(data) = &mut self.pixels
            && data.len() == pixels.len()
        {
            data.copy_from_slice(pixels.as_slice());
            self.uploads += 1;
        }
    }

    fn draw(&mut self, rect: DrawRect) {
        if self.is_allocated() {
            self.last_draw = Some(rect);
        }
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}
