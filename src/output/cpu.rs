//! Software backend that runs the effect through the CPU shading routines.

use super::{check_texture_size, FrameReadback};
use crate::error::RenderError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::render::{FrameState, RenderBackend, ViewportGeometry};
use crate::shader::color::shade;
use std::collections::HashMap;
use tracing::debug;

/// Call counters, mostly useful in tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuStats {
    pub textures_created: u64,
    pub uploads: u64,
    pub draws: u64,
    pub clears: u64,
    pub releases: u64,
}

/// Handle to a texture owned by a [`CpuRenderer`].
#[derive(Debug, PartialEq, Eq)]
pub struct CpuTexture {
    id: u64,
}

/// Same default cap as wgpu's `Limits::default()`.
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

#[derive(Debug)]
pub struct CpuRenderer {
    textures: HashMap<u64, VideoFrame>,
    next_id: u64,
    max_texture_dimension: u32,
    stats: CpuStats,
    output: Option<VideoFrame>,
}

impl Default for CpuRenderer {
    fn default() -> Self {
        Self {
            textures: HashMap::new(),
            next_id: 0,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            stats: CpuStats::default(),
            output: None,
        }
    }
}

impl CpuRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps texture sizes the way a GPU device limit would.
    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    pub fn stats(&self) -> CpuStats {
        self.stats
    }

    /// Textures created and not yet released.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn texture(&self, texture: &CpuTexture) -> Result<&VideoFrame, RenderError> {
        self.textures
            .get(&texture.id)
            .ok_or_else(|| RenderError::Surface(format!("texture {} was released", texture.id)))
    }
}

impl RenderBackend for CpuRenderer {
    type Texture = CpuTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<CpuTexture, RenderError> {
        check_texture_size(width, height, self.max_texture_dimension)?;
        self.next_id += 1;
        self.textures.insert(self.next_id, VideoFrame::new(width, height, PixelFormat::Rgba));
        self.stats.textures_created += 1;
        Ok(CpuTexture { id: self.next_id })
    }

    fn upload(&mut self, texture: &CpuTexture, frame: &VideoFrame) -> Result<(), RenderError> {
        let slot = self
            .textures
            .get_mut(&texture.id)
            .ok_or_else(|| RenderError::Surface(format!("texture {} was released", texture.id)))?;
        if (slot.width, slot.height) != (frame.width, frame.height) {
            return Err(RenderError::InvalidFrame {
                width: frame.width,
                height: frame.height,
                len: frame.data.len(),
            });
        }
        *slot = frame.to_rgba().into_owned();
        self.stats.uploads += 1;
        Ok(())
    }

    fn draw(&mut self, texture: &CpuTexture, state: &FrameState) -> Result<(), RenderError> {
        let source = self.texture(texture)?;
        let ViewportGeometry { width, height } = state.viewport;
        let (vw, vh) = (width as f64, height as f64);
        let (qw, qh) = (state.quad.width, state.quad.height);

        // Pixel centres mapped into the centred quad; overflow is cropped.
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            let v = ((y as f64 + 0.5 - vh / 2.0) / qh + 0.5) as f32;
            for x in 0..width {
                let u = ((x as f64 + 0.5 - vw / 2.0) / qw + 0.5) as f32;
                data.extend_from_slice(&shade(source, [u, v], state.effect).to_rgba8());
            }
        }

        self.output = Some(VideoFrame::from_data(width, height, PixelFormat::Rgba, data));
        self.stats.draws += 1;
        Ok(())
    }

    fn clear(&mut self, viewport: ViewportGeometry) -> Result<(), RenderError> {
        self.output = Some(VideoFrame::solid(viewport.width, viewport.height, [0, 0, 0]));
        self.stats.clears += 1;
        Ok(())
    }

    fn release(&mut self, texture: CpuTexture) {
        if self.textures.remove(&texture.id).is_some() {
            debug!("Released CPU texture {}", texture.id);
            self.stats.releases += 1;
        }
    }
}

impl FrameReadback for CpuRenderer {
    fn last_output(&self) -> Option<&VideoFrame> {
        self.output.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::render::CoverQuad;

    fn state(effect: Effect, width: u32, height: u32) -> FrameState {
        let viewport = ViewportGeometry::new(width, height);
        FrameState {
            effect,
            viewport,
            quad: CoverQuad::fit(viewport),
            texture_size: (16, 9),
            frame_index: 0,
        }
    }

    #[test]
    fn draw_fills_the_viewport() {
        let mut cpu = CpuRenderer::new();
        let texture = cpu.create_texture(16, 9).unwrap();
        cpu.upload(&texture, &VideoFrame::solid(16, 9, [200, 40, 40])).unwrap();
        cpu.draw(&texture, &state(Effect::None, 32, 20)).unwrap();

        let out = cpu.last_output().unwrap();
        assert_eq!((out.width, out.height), (32, 20));
        assert_eq!(out.pixel(0, 0), [200, 40, 40, 255]);
        assert_eq!(out.pixel(31, 19), [200, 40, 40, 255]);
    }

    #[test]
    fn portrait_viewport_crops_the_sides() {
        // Left half red, right half blue.
        let mut data = Vec::new();
        for _y in 0..9 {
            for x in 0..16 {
                data.extend_from_slice(if x < 8 { &[255, 0, 0, 255] } else { &[0, 0, 255, 255] });
            }
        }
        let frame = VideoFrame::from_data(16, 9, PixelFormat::Rgba, data);

        let mut cpu = CpuRenderer::new();
        let texture = cpu.create_texture(16, 9).unwrap();
        cpu.upload(&texture, &frame).unwrap();
        cpu.draw(&texture, &state(Effect::None, 9, 16)).unwrap();

        let out = cpu.last_output().unwrap();
        // The visible strip is the middle of the frame, so both halves show.
        assert_eq!(out.pixel(0, 8), [255, 0, 0, 255]);
        assert_eq!(out.pixel(8, 8), [0, 0, 255, 255]);
    }

    #[test]
    fn clear_presents_black() {
        let mut cpu = CpuRenderer::new();
        cpu.clear(ViewportGeometry::new(4, 4)).unwrap();
        assert_eq!(cpu.last_output().unwrap().pixel(2, 2), [0, 0, 0, 255]);
        assert_eq!(cpu.stats().clears, 1);
    }

    #[test]
    fn released_texture_cannot_be_drawn() {
        let mut cpu = CpuRenderer::new();
        let texture = cpu.create_texture(4, 4).unwrap();
        let stale = CpuTexture { id: texture.id };
        cpu.release(texture);
        assert!(cpu.draw(&stale, &state(Effect::None, 4, 4)).is_err());
        assert_eq!(cpu.live_textures(), 0);
    }

    #[test]
    fn upload_rejects_mismatched_size() {
        let mut cpu = CpuRenderer::new();
        let texture = cpu.create_texture(4, 4).unwrap();
        let err = cpu.upload(&texture, &VideoFrame::solid(8, 8, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, RenderError::InvalidFrame { width: 8, .. }));
    }

    #[test]
    fn oversized_texture_is_refused() {
        let mut cpu = CpuRenderer::new().with_max_texture_dimension(2048);
        let err = cpu.create_texture(3840, 2160).unwrap_err();
        assert_eq!(err, RenderError::TextureTooLarge { width: 3840, height: 2160, max: 2048 });
        assert!(err.is_fatal());
        assert_eq!(cpu.live_textures(), 0);
        assert_eq!(cpu.stats().textures_created, 0);
    }
}
