//! Texture upload bridge: one texture per source, refreshed every tick.

use super::RenderBackend;
use crate::error::RenderError;
use crate::frame::VideoFrame;
use tracing::{debug, info};

/// Owns the single texture bound to the active source.
pub struct TextureBridge<T> {
    slot: Option<Slot<T>>,
    stale: bool,
}

struct Slot<T> {
    texture: T,
    size: (u32, u32),
}

impl<T> Default for TextureBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TextureBridge<T> {
    pub fn new() -> Self {
        Self { slot: None, stale: true }
    }

    /// Flags the texture so the next refresh re-uploads the current frame.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_allocated(&self) -> bool {
        self.slot.is_some()
    }

    /// Uploads `frame` if stale and returns the texture to sample from.
    ///
    /// The texture is allocated on first use and re-allocated only when the
    /// decoded frame size changes.
    pub fn refresh<B>(&mut self, backend: &mut B, frame: &VideoFrame) -> Result<&T, RenderError>
    where
        B: RenderBackend<Texture = T>,
    {
        frame.validate()?;
        let size = (frame.width, frame.height);

        if self.slot.as_ref().is_some_and(|s| s.size != size) {
            debug!("Frame size changed to {}x{}, reallocating texture", size.0, size.1);
            self.release(backend);
        }

        let slot = match self.slot {
            Some(ref slot) => slot,
            None => {
                info!("Allocating video texture {}x{}", size.0, size.1);
                let texture = backend.create_texture(size.0, size.1)?;
                self.stale = true;
                &*self.slot.insert(Slot { texture, size })
            }
        };

        if self.stale {
            backend.upload(&slot.texture, frame)?;
            self.stale = false;
        }
        Ok(&slot.texture)
    }

    /// Releases the texture. Returns `false` if there was nothing to release.
    pub fn release<B>(&mut self, backend: &mut B) -> bool
    where
        B: RenderBackend<Texture = T>,
    {
        match self.slot.take() {
            Some(slot) => {
                backend.release(slot.texture);
                self.stale = true;
                true
            }
            None => false,
        }
    }
}
