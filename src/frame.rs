//! Video frame types and the full-screen quad used to present them.

use crate::error::{RenderError, SourceError};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::path::Path;

/// Supported pixel formats for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A decoded video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Presentation timestamp in microseconds (if available)
    pub timestamp_us: Option<u64>,
    /// Raw pixel data, rows tightly packed
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a black frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data: vec![0; size],
        }
    }

    /// Creates a video frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// Creates an opaque RGBA frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel = [rgb[0], rgb[1], rgb[2], 255];
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 4)
            .collect();
        Self::from_data(width, height, PixelFormat::Rgba, data)
    }

    /// Decodes a still image from disk into an RGBA frame.
    pub fn open_image(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let img = image::open(path.as_ref()).map_err(|e| SourceError::Image(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self::from_data(width, height, PixelFormat::Rgba, rgba.into_raw()))
    }

    /// Writes the frame to disk; the format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let rgba = self.to_rgba();
        let img = image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data.clone())
            .ok_or_else(|| anyhow::anyhow!("frame buffer does not match {}x{}", rgba.width, rgba.height))?;
        img.save(path.as_ref())?;
        Ok(())
    }

    /// Checks that the buffer length matches the dimensions.
    pub fn validate(&self) -> Result<(), RenderError> {
        let expected = (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel();
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(RenderError::InvalidFrame {
                width: self.width,
                height: self.height,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    /// Returns the RGBA bytes at `(x, y)`. Coordinates are clamped to the frame.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        let bpp = self.format.bytes_per_pixel();
        let i = (y * self.width as usize + x) * bpp;
        match self.format {
            PixelFormat::Rgba => [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]],
            PixelFormat::Rgb => [self.data[i], self.data[i + 1], self.data[i + 2], 255],
        }
    }

    /// Converts this frame to RGBA, borrowing when it already is.
    pub fn to_rgba(&self) -> Cow<'_, VideoFrame> {
        if self.format == PixelFormat::Rgba {
            return Cow::Borrowed(self);
        }

        let pixel_count = (self.width as usize) * (self.height as usize);
        let mut rgba_data = Vec::with_capacity(pixel_count * 4);
        // RGB -> RGBA: append opaque alpha, no colour conversion
        for chunk in self.data.chunks_exact(3) {
            rgba_data.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
        }

        Cow::Owned(VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data: rgba_data,
        })
    }
}

/// Vertex for the presentation quad.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Vertices for a unit quad; the vertex shader scales it to the cover-fit size.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    ];

    /// Indices for the quad (two triangles).
    pub const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        // Check first pixel (red)
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        // Check second pixel (green)
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn rgba_frames_are_borrowed() {
        let frame = VideoFrame::solid(2, 2, [1, 2, 3]);
        assert!(matches!(frame.to_rgba(), Cow::Borrowed(_)));
    }

    #[test]
    fn solid_frame_fills_every_pixel() {
        let frame = VideoFrame::solid(3, 2, [10, 20, 30]);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.pixel(2, 1), [10, 20, 30, 255]);
        assert_eq!(frame.pixel(9, 9), [10, 20, 30, 255]);
    }

    #[test]
    fn validate_rejects_short_buffers() {
        let frame = VideoFrame::from_data(4, 4, PixelFormat::Rgba, vec![0; 10]);
        assert_eq!(
            frame.validate(),
            Err(RenderError::InvalidFrame { width: 4, height: 4, len: 10 })
        );
    }
}
