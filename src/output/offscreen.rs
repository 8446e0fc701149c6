//! Headless wgpu backend that renders into a texture and reads it back.

use super::{check_texture_size, readback_error, FrameReadback};
use crate::error::RenderError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::render::{FrameState, RenderBackend, ViewportGeometry};
use crate::shader::{EffectPipeline, GpuContext, VideoTexture};
use anyhow::Result;
use std::time::Instant;
use tracing::{debug, error, info};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct Target {
    texture: wgpu::Texture,
    readback: wgpu::Buffer,
    viewport: ViewportGeometry,
    padded_row: u32,
}

impl Target {
    fn new(device: &wgpu::Device, viewport: ViewportGeometry) -> Result<Self, RenderError> {
        check_texture_size(viewport.width, viewport.height, device.limits().max_texture_dimension_2d)?;
        let unpadded_row = viewport.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width: viewport.width,
                height: viewport.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Offscreen Readback Buffer"),
            size: (padded_row * viewport.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            texture,
            readback,
            viewport,
            padded_row,
        })
    }
}

/// Renders frames without a window; every draw is read back into memory.
pub struct OffscreenRenderer {
    context: GpuContext,
    pipeline: EffectPipeline,
    target: Target,
    output: Option<VideoFrame>,
}

impl OffscreenRenderer {
    pub fn new(viewport: ViewportGeometry) -> Result<Self> {
        let context = GpuContext::headless()?;
        let pipeline = EffectPipeline::new(&context.device, TARGET_FORMAT)?;
        let target = Target::new(&context.device, viewport)?;
        info!("Offscreen renderer ready at {}x{}", viewport.width, viewport.height);
        Ok(Self {
            context,
            pipeline,
            target,
            output: None,
        })
    }

    /// Replaces the render target; the old one is kept if the new size is refused.
    fn retarget(&mut self, viewport: ViewportGeometry) -> Result<(), RenderError> {
        if viewport == self.target.viewport {
            return Ok(());
        }
        let target = Target::new(&self.context.device, viewport)?;
        self.target.texture.destroy();
        self.target = target;
        Ok(())
    }

    fn render(&mut self, video: Option<&VideoTexture>) -> Result<(), RenderError> {
        self.context.check()?;
        let start = Instant::now();
        let Target {
            texture,
            readback,
            viewport,
            padded_row,
        } = &self.target;

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offscreen Encoder"),
            });
        self.pipeline.encode(&mut encoder, &view, video);

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(*padded_row),
                    rows_per_image: Some(viewport.height),
                },
            },
            wgpu::Extent3d {
                width: viewport.width,
                height: viewport.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context
            .device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(readback_error)?;
        receiver.recv().map_err(readback_error)?.map_err(readback_error)?;
        self.context.check()?;

        let row_bytes = viewport.width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * viewport.height as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(*padded_row as usize).take(viewport.height as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        readback.unmap();

        debug!("[Perf] Offscreen draw + readback: {:?}", start.elapsed());
        self.output = Some(VideoFrame::from_data(viewport.width, viewport.height, PixelFormat::Rgba, pixels));
        Ok(())
    }
}

impl RenderBackend for OffscreenRenderer {
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
        self.retarget(state.viewport)?;
        self.pipeline.write_uniforms(&self.context.queue, state);
        self.render(Some(texture))
    }

    fn clear(&mut self, viewport: ViewportGeometry) -> Result<(), RenderError> {
        self.retarget(viewport)?;
        self.render(None)
    }

    fn release(&mut self, texture: VideoTexture) {
        debug!("Releasing video texture {}x{}", texture.width, texture.height);
        texture.texture.destroy();
    }

    fn resize(&mut self, viewport: ViewportGeometry) {
        if let Err(e) = self.retarget(viewport) {
            error!("Keeping {}x{} target: {}", self.target.viewport.width, self.target.viewport.height, e);
        }
    }
}

impl FrameReadback for OffscreenRenderer {
    fn last_output(&self) -> Option<&VideoFrame> {
        self.output.as_ref()
    }
}
