//! Render backends: where shaded frames end up.

mod cpu;
mod offscreen;
pub mod window_output;

pub use cpu::{CpuRenderer, CpuStats, CpuTexture};
pub use offscreen::OffscreenRenderer;
pub use window_output::WindowRenderer;

use crate::error::RenderError;
use crate::frame::VideoFrame;

/// Backends that keep a copy of the last presented frame.
pub trait FrameReadback {
    fn last_output(&self) -> Option<&VideoFrame>;
}

/// Maps `wgpu::Device::poll` and buffer-map failures onto render errors.
fn readback_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Readback(e.to_string())
}

/// Rejects textures the device cannot allocate before wgpu sees them.
fn check_texture_size(width: u32, height: u32, max: u32) -> Result<(), RenderError> {
    if width > max || height > max {
        return Err(RenderError::TextureTooLarge { width, height, max });
    }
    Ok(())
}
