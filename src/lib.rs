//! Reelshade: real-time shader effects over looping video backgrounds.
//!
//! Decodes a video (or still image), uploads each frame to a texture, and
//! draws it as a cover-fit quad through one of a fixed set of colour-grading
//! effects.

pub mod config;
pub mod effect;
pub mod error;
pub mod frame;
pub mod output;
pub mod render;
pub mod shader;
pub mod source;
pub mod utils;
