//! Frame buffer types for video frames in CPU memory.
//!
//! These are the payloads the memory manager tracks for the frame-buffer
//! pool. Sizes reported by [`FrameBuffer::memory_size`] are the exact byte
//! counts the pool accounting uses.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (32 bits per pixel)
    #[default]
    Rgba8,
    /// 8-bit grayscale
    Gray8,
    /// YUV 4:2:0 planar (decoder interop)
    Yuv420P,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Rgba8 | Self::Gray8 => 1,
            Self::Yuv420P => 3,
        }
    }

    /// Minimum bytes needed for a frame of this format, before stride padding.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        match self {
            Self::Rgba8 => (width * height * 4) as usize,
            Self::Gray8 => (width * height) as usize,
            Self::Yuv420P => {
                // Y plane + U + V planes at half resolution
                let y_size = (width * height) as usize;
                let uv_size = (width / 2 * height / 2) as usize;
                y_size + uv_size * 2
            }
        }
    }
}

/// A plane of pixel data with stride information.
#[derive(Debug, Clone)]
pub struct FramePlane {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Bytes per row (may include padding)
    pub stride: usize,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FramePlane {
    /// Create a new zeroed frame plane with the given dimensions.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize) -> Self {
        // Align stride to 64 bytes for SIMD and GPU upload compatibility
        let min_stride = (width as usize) * bytes_per_pixel;
        let stride = (min_stride + 63) & !63;
        let data = vec![0u8; stride * height as usize];
        Self {
            data,
            stride,
            width,
            height,
        }
    }

    /// Get a row of pixel data.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let bpp = self.bytes_per_row_pixel();
        let end = start + (self.width as usize * bpp);
        &self.data[start..end]
    }

    /// Get a mutable row of pixel data.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let bpp = self.bytes_per_row_pixel();
        let end = start + (self.width as usize * bpp);
        &mut self.data[start..end]
    }

    fn bytes_per_row_pixel(&self) -> usize {
        if self.width == 0 || self.stride == 0 {
            return 1;
        }
        let min_bpp = self.stride / self.width as usize;
        if min_bpp == 0 {
            1
        } else {
            min_bpp
        }
    }
}

/// A video frame in CPU memory.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Pixel format
    pub format: PixelFormat,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel data planes (1-3 depending on format)
    pub planes: SmallVec<[FramePlane; 3]>,
}

impl FrameBuffer {
    /// Create a new zeroed frame buffer with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = match format {
            PixelFormat::Rgba8 => {
                smallvec::smallvec![FramePlane::new(width, height, 4)]
            }
            PixelFormat::Gray8 => {
                smallvec::smallvec![FramePlane::new(width, height, 1)]
            }
            PixelFormat::Yuv420P => {
                smallvec::smallvec![
                    FramePlane::new(width, height, 1),         // Y
                    FramePlane::new(width / 2, height / 2, 1), // U
                    FramePlane::new(width / 2, height / 2, 1), // V
                ]
            }
        };

        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Total memory usage of this frame in bytes, stride padding included.
    pub fn memory_size(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Get the primary plane (plane 0).
    #[inline]
    pub fn primary_plane(&self) -> &FramePlane {
        &self.planes[0]
    }

    /// Get the primary plane mutably.
    #[inline]
    pub fn primary_plane_mut(&mut self) -> &mut FramePlane {
        &mut self.planes[0]
    }
}

/// Arc-wrapped frame buffer for shared ownership.
pub type SharedFrameBuffer = Arc<FrameBuffer>;
