//! Effect shader: WGSL source, uniform layout and the CPU reference.

pub mod color;
mod gpu_context;
mod wgpu_pipeline;

pub use gpu_context::GpuContext;
pub use wgpu_pipeline::{EffectPipeline, VideoTexture};

use crate::effect::Effect;
use crate::render::FrameState;
use anyhow::{anyhow, Result};
use naga::valid::{Capabilities, ValidationFlags, Validator};

/// Vertex and fragment stages for the video quad.
pub const EFFECT_SHADER: &str = include_str!("effects.wgsl");

/// Uniforms passed to the shader, rewritten every tick.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Uniforms {
    /// Source texture size in texels.
    pub resolution: [f32; 2],
    pub effect: u32,
    pub _pad0: u32,
    /// Quad size relative to the viewport, always >= 1.
    pub quad_scale: [f32; 2],
    pub _pad1: [f32; 2],
    pub params: [[f32; 4]; 8],
}

impl Uniforms {
    pub fn new(state: &FrameState) -> Self {
        let (w, h) = state.texture_size;
        Self {
            resolution: [w as f32, h as f32],
            effect: state.effect.selector(),
            _pad0: 0,
            quad_scale: state.quad.scale(),
            _pad1: [0.0; 2],
            params: pack_params(state.effect),
        }
    }
}

fn pack_params(effect: Effect) -> [[f32; 4]; 8] {
    let p = effect.params();
    let rgb = |c: color::Rgb, w: f32| [c.r, c.g, c.b, w];
    [
        rgb(p.anchors[0], 0.0),
        rgb(p.anchors[1], 0.0),
        rgb(p.anchors[2], 0.0),
        rgb(p.gain, p.blend),
        [p.threshold, p.offset, p.offset_ratio, p.levels],
        [p.gamma, p.sharpen, p.contrast_low, p.contrast_high],
        [p.dot_pitch, p.dropout, p.halftone_mix, p.edge_mix],
        [p.grain_mix, 0.0, 0.0, 0.0],
    ]
}

/// Parses and validates WGSL with naga so errors surface before pipeline creation.
pub fn validate_wgsl(source: &str) -> Result<()> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parse error: {}", e.emit_to_string(source)))?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|e| anyhow!("Shader validation error: {:?}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{CoverQuad, ViewportGeometry};

    #[test]
    fn effect_shader_validates() {
        validate_wgsl(EFFECT_SHADER).unwrap();
    }

    #[test]
    fn uniform_block_is_std140_sized() {
        assert_eq!(std::mem::size_of::<Uniforms>(), 160);
        assert_eq!(std::mem::offset_of!(Uniforms, quad_scale), 16);
        assert_eq!(std::mem::offset_of!(Uniforms, params), 32);
    }

    #[test]
    fn uniforms_carry_selector_and_table() {
        let viewport = ViewportGeometry::new(1280, 720);
        let state = FrameState {
            effect: Effect::Solarize,
            viewport,
            quad: CoverQuad::fit(viewport),
            texture_size: (640, 360),
            frame_index: 7,
        };
        let u = Uniforms::new(&state);
        assert_eq!(u.effect, 3);
        assert_eq!(u.resolution, [640.0, 360.0]);
        assert_eq!(u.params[3], [1.1, 0.9, 1.2, 0.0]);
        assert_eq!(u.params[4][0], 0.4);
        assert_eq!(u.quad_scale, [1.0, 1.0]);
    }

    #[test]
    fn cyanotype_constants_are_packed() {
        let p = pack_params(Effect::Cyanotype);
        assert_eq!(p[1], [0.902, 0.361, 0.220, 0.0]);
        assert_eq!(p[4][3], 5.0);
        assert_eq!(p[6], [2.5, 0.08, 0.10, 0.15]);
        assert_eq!(p[7][0], 0.04);
    }
}
