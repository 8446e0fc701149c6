//! Render loop driver.
//!
//! Owns the backend, the frame source and the single video texture. Each
//! [`RenderLoop::tick`] polls the source, refreshes the texture, recomputes the
//! cover-fit quad and issues one draw with the currently selected effect.

mod geometry;
mod texture;

pub use geometry::{CoverQuad, ViewportGeometry, SOURCE_ASPECT};
pub use texture::TextureBridge;

use crate::effect::Effect;
use crate::error::{RenderError, SourceError};
use crate::frame::VideoFrame;
use crate::source::{FrameSource, Readiness};
use crate::utils::FpsCounter;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Delay between the source turning ready and the ready notification.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// GPU (or software) operations the render loop needs.
pub trait RenderBackend {
    type Texture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<Self::Texture, RenderError>;

    /// Copies `frame` into `texture`. The frame size always matches the texture.
    fn upload(&mut self, texture: &Self::Texture, frame: &VideoFrame) -> Result<(), RenderError>;

    /// Shades `texture` onto the output surface and presents it.
    fn draw(&mut self, texture: &Self::Texture, state: &FrameState) -> Result<(), RenderError>;

    /// Presents a black surface.
    fn clear(&mut self, viewport: ViewportGeometry) -> Result<(), RenderError>;

    fn release(&mut self, texture: Self::Texture);

    fn resize(&mut self, _viewport: ViewportGeometry) {}
}

/// Everything the shader needs for one frame, rebuilt every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub effect: Effect,
    pub viewport: ViewportGeometry,
    pub quad: CoverQuad,
    pub texture_size: (u32, u32),
    pub frame_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Uninitialized,
    WaitingForFrame,
    Rendering,
    TornDown,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not mounted, or already torn down. Nothing was touched.
    Idle,
    /// The source has no frame yet.
    Waiting,
    /// The source is unavailable; a black surface was presented.
    Blank,
    Drawn,
    /// A recoverable backend error dropped this frame.
    Skipped,
}

pub struct RenderLoop<B: RenderBackend, S: FrameSource> {
    backend: B,
    source: S,
    state: RenderState,
    bridge: TextureBridge<B::Texture>,
    viewport: ViewportGeometry,
    selector: i64,
    frame_index: u64,
    settle: Duration,
    rendering_since: Option<Instant>,
    on_ready: Option<Box<dyn FnOnce()>>,
    unavailable: Option<SourceError>,
    fault: Option<RenderError>,
    fps: FpsCounter,
}

impl<B: RenderBackend, S: FrameSource> RenderLoop<B, S> {
    pub fn new(backend: B, source: S, viewport: ViewportGeometry) -> Self {
        Self {
            backend,
            source,
            state: RenderState::Uninitialized,
            bridge: TextureBridge::new(),
            viewport,
            selector: 0,
            frame_index: 0,
            settle: DEFAULT_SETTLE,
            rendering_since: None,
            on_ready: None,
            unavailable: None,
            fault: None,
            fps: FpsCounter::new(),
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Registers a one-shot callback fired once a shaded frame has settled.
    pub fn on_ready(&mut self, callback: impl FnOnce() + 'static) {
        self.on_ready = Some(Box::new(callback));
    }

    pub fn mount(&mut self) {
        if self.state == RenderState::Uninitialized {
            info!("Render loop mounted, waiting for first frame");
            self.state = RenderState::WaitingForFrame;
        }
    }

    /// Selects the effect for the next tick. Out-of-range values mean pass-through.
    pub fn set_effect(&mut self, selector: i64) {
        if Effect::from_selector(selector) != self.effect() {
            info!("Effect switched to {}", Effect::from_selector(selector));
        }
        self.selector = selector;
    }

    pub fn effect(&self) -> Effect {
        Effect::from_selector(self.selector)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = ViewportGeometry::new(width, height);
        self.backend.resize(self.viewport);
    }

    /// Forwards a user interaction to a source paused by the autoplay policy.
    pub fn resume_playback(&mut self) {
        self.source.resume();
    }

    /// Swaps in a new source, releasing the old texture. Returns the old source.
    pub fn replace_source(&mut self, source: S) -> S {
        self.bridge.release(&mut self.backend);
        self.rendering_since = None;
        self.unavailable = None;
        if self.state == RenderState::Rendering {
            self.state = RenderState::WaitingForFrame;
        }
        std::mem::replace(&mut self.source, source)
    }

    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome, RenderError> {
        if matches!(self.state, RenderState::Uninitialized | RenderState::TornDown) {
            return Ok(TickOutcome::Idle);
        }

        match self.source.poll(now) {
            Readiness::Pending => return Ok(TickOutcome::Waiting),
            Readiness::Unavailable(err) => {
                if self.unavailable.as_ref() != Some(&err) {
                    error!("{}", err);
                    self.unavailable = Some(err);
                }
                return match self.backend.clear(self.viewport) {
                    Ok(()) => Ok(TickOutcome::Blank),
                    Err(e) => self.fail(e),
                };
            }
            Readiness::Ready => {
                self.unavailable = None;
            }
        }

        if self.state == RenderState::WaitingForFrame {
            info!("First frame decoded, rendering");
            self.state = RenderState::Rendering;
            self.rendering_since = Some(now);
        }

        let Some(frame) = self.source.current_frame() else {
            return Ok(TickOutcome::Waiting);
        };

        self.bridge.mark_stale();
        let drawn = match self.bridge.refresh(&mut self.backend, frame) {
            Ok(texture) => {
                let state = FrameState {
                    effect: Effect::from_selector(self.selector),
                    viewport: self.viewport,
                    quad: CoverQuad::fit(self.viewport),
                    texture_size: (frame.width, frame.height),
                    frame_index: self.frame_index,
                };
                self.backend.draw(texture, &state)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = drawn {
            return self.fail(e);
        }

        self.frame_index += 1;
        if let Some(fps) = self.fps.update(now) {
            debug!("[Perf] Rendering at {:.2} FPS ({}x{})", fps, self.viewport.width, self.viewport.height);
        }
        self.notify_ready(now);
        Ok(TickOutcome::Drawn)
    }

    fn notify_ready(&mut self, now: Instant) {
        let Some(since) = self.rendering_since else {
            return;
        };
        if now.saturating_duration_since(since) < self.settle {
            return;
        }
        if let Some(callback) = self.on_ready.take() {
            info!("First shaded frame presented");
            callback();
        }
    }

    fn fail(&mut self, e: RenderError) -> Result<TickOutcome, RenderError> {
        if e.is_fatal() {
            error!("Fatal render error, stopping: {}", e);
            self.fault = Some(e.clone());
            self.teardown();
            return Err(e);
        }
        warn!("Dropping frame: {}", e);
        Ok(TickOutcome::Skipped)
    }

    /// Stops the loop and releases the texture. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.state == RenderState::TornDown {
            return;
        }
        let released = self.bridge.release(&mut self.backend);
        self.on_ready = None;
        self.state = RenderState::TornDown;
        info!("Render loop torn down (texture released: {})", released);
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn viewport(&self) -> ViewportGeometry {
        self.viewport
    }

    /// Hard decode failure currently shown as a blank surface.
    pub fn source_error(&self) -> Option<&SourceError> {
        self.unavailable.as_ref()
    }

    /// The fatal error that ended the session, if any.
    pub fn fault(&self) -> Option<&RenderError> {
        self.fault.as_ref()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frame_index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<B: RenderBackend, S: FrameSource> Drop for RenderLoop<B, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
