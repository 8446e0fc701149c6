//! Shared GPU context for wgpu resources.

use crate::error::RenderError;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};
use winit::window::Window;

type FaultSlot = Arc<Mutex<Option<RenderError>>>;

/// Device and queue plus the first fatal fault the driver reported.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    fault: FaultSlot,
}

impl GpuContext {
    /// Initializes a context for offscreen rendering.
    pub fn headless() -> Result<Self> {
        let instance = Self::instance();
        Self::init(instance, None)
    }

    /// Initializes a context compatible with `window` and returns its surface.
    pub fn with_surface(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>)> {
        let instance = Self::instance();
        let surface = instance.create_surface(window)?;
        let context = Self::init(instance, Some(&surface))?;
        Ok((context, surface))
    }

    fn instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn init(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'static>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .map_err(|e| anyhow!("Failed to obtain GPU adapter: {:?}", e))?;

        let adapter_info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        // Base limits stay conservative, but texture sizes follow the adapter so
        // 4K sources fit wherever the hardware allows them.
        let base = if surface.is_some() {
            wgpu::Limits::default()
        } else {
            wgpu::Limits::downlevel_defaults()
        };
        let required_limits = base.using_resolution(adapter.limits());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Reelshade Device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;
        info!(
            "Max texture dimension: {}px",
            device.limits().max_texture_dimension_2d
        );

        let fault: FaultSlot = Arc::new(Mutex::new(None));

        let lost = fault.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!("GPU device lost ({:?}): {}", reason, message);
            record(&lost, RenderError::ContextLost(message));
        });

        // Without a handler wgpu panics on validation and allocation errors.
        let uncaptured = fault.clone();
        device.on_uncaptured_error(Arc::new(move |e: wgpu::Error| {
            error!("GPU error: {}", e);
            let fault = match e {
                wgpu::Error::OutOfMemory { .. } => RenderError::OutOfMemory,
                other => RenderError::Device(other.to_string()),
            };
            record(&uncaptured, fault);
        }));

        Ok(Self {
            device,
            queue,
            instance,
            adapter,
            fault,
        })
    }

    /// Largest width or height a texture on this device may have.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Returns the fault reported by the driver, if any.
    pub fn check(&self) -> Result<(), RenderError> {
        match &*self.fault.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }
}

/// Keeps the first fault; later ones are usually fallout from it.
fn record(slot: &Mutex<Option<RenderError>>, fault: RenderError) {
    slot.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert(fault);
}
