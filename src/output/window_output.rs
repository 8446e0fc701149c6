//! Window backend using winit and wgpu.

use super::check_texture_size;
use crate::error::RenderError;
use crate::frame::VideoFrame;
use crate::render::{FrameState, RenderBackend, ViewportGeometry};
use crate::shader::{EffectPipeline, GpuContext, VideoTexture};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use winit::window::Window;

/// Presents shaded frames to a window surface.
pub struct WindowRenderer {
    surface: wgpu::Surface<'static>,
    context: GpuContext,
    config: wgpu::SurfaceConfiguration,
    pipeline: EffectPipeline,
    window: Arc<Window>,
}

impl WindowRenderer {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let (context, surface) = GpuContext::with_surface(window.clone())?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&context.adapter);
        // The shader works on display-referred values, so skip the sRGB re-encode.
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("Surface reports no supported formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &config);

        let pipeline = EffectPipeline::new(&context.device, surface_format)?;
        info!(
            "Window surface {}x{} using {:?}",
            config.width, config.height, surface_format
        );

        Ok(Self {
            surface,
            context,
            config,
            pipeline,
            window,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn viewport(&self) -> ViewportGeometry {
        ViewportGeometry::new(self.config.width, self.config.height)
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.context.device, &self.config);
    }

    fn present(&mut self, video: Option<&VideoTexture>) -> Result<(), RenderError> {
        self.context.check()?;

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost or outdated, reconfiguring");
                self.reconfigure();
                return Err(RenderError::Surface("surface reconfigured".to_string()));
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(e) => return Err(RenderError::Surface(e.to_string())),
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Window Render Encoder"),
            });
        self.pipeline.encode(&mut encoder, &view, video);

        self.context.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }
}

impl RenderBackend for WindowRenderer {
    type Texture = VideoTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<VideoTexture, RenderError> {
        self.context.check()?;
        check_texture_size(width, height, self.context.max_texture_dimension())?;
        Ok(self.pipeline.create_video_texture(&self.context.device, width, height))
    }

    fn upload(&mut self, texture: &VideoTexture, frame: &VideoFrame) -> Result<(), RenderError> {
        self.context.check()?;
        self.pipeline.upload(&self.context.queue, texture, frame);
        Ok(())
    }

    fn draw(&mut self, texture: &VideoTexture, state: &FrameState) -> Result<(), RenderError> {
        self.pipeline.write_uniforms(&self.context.queue, state);
        self.present(Some(texture))
    }

    fn clear(&mut self, _viewport: ViewportGeometry) -> Result<(), RenderError> {
        self.present(None)
    }

    fn release(&mut self, texture: VideoTexture) {
        debug!("Releasing video texture {}x{}", texture.width, texture.height);
        texture.texture.destroy();
    }

    fn resize(&mut self, viewport: ViewportGeometry) {
        let max = self.context.max_texture_dimension();
        self.config.width = viewport.width.min(max);
        self.config.height = viewport.height.min(max);
        self.reconfigure();
    }
}
