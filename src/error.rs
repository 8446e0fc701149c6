//! Error types shared by the frame sources and render backends.

/// Errors raised while shading or presenting a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("GPU context lost: {0}")]
    ContextLost(String),

    #[error("GPU out of memory")]
    OutOfMemory,

    #[error("GPU device error: {0}")]
    Device(String),

    #[error("frame {width}x{height} exceeds the {max}px texture limit")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("surface error: {0}")]
    Surface(String),

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("invalid frame: {width}x{height} with {len} bytes")]
    InvalidFrame { width: u32, height: u32, len: usize },
}

impl RenderError {
    /// Fatal errors end the render session; everything else only skips a frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::ContextLost(_)
                | RenderError::OutOfMemory
                | RenderError::Device(_)
                | RenderError::TextureTooLarge { .. }
        )
    }
}

/// Errors surfaced by a frame source.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("invalid source locator {0:?}")]
    InvalidLocator(String),

    #[error("video unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load image: {0}")]
    Image(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_failures_are_fatal() {
        assert!(RenderError::ContextLost("lost".into()).is_fatal());
        assert!(RenderError::OutOfMemory.is_fatal());
        assert!(RenderError::Device("validation".into()).is_fatal());
        assert!(RenderError::TextureTooLarge { width: 4096, height: 2160, max: 2048 }.is_fatal());
        assert!(!RenderError::Surface("timeout".into()).is_fatal());
        assert!(!RenderError::Readback("map".into()).is_fatal());
    }

    #[test]
    fn display_prefixes_are_stable() {
        assert!(SourceError::Unavailable("x".into())
            .to_string()
            .starts_with("video unavailable:"));
        assert!(RenderError::OutOfMemory.to_string().contains("out of memory"));
    }
}
