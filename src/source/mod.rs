//! Frame sources: decodable video streams exposed as pollable pixel sources.

mod ffmpeg;

pub use ffmpeg::FfmpegSource;

use crate::error::SourceError;
use crate::frame::VideoFrame;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// How long a decode failure may persist before the source is reported unavailable.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(3000);

/// Extensions served by [`StillSource`] instead of the decoder.
const STILL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// Readiness of a source as seen by the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// No frame decoded yet.
    Pending,
    /// At least one full frame is available.
    Ready,
    /// Decoding failed and did not recover within the grace window.
    Unavailable(SourceError),
}

/// A continuously updating pixel source.
pub trait FrameSource {
    /// Drains decoder output and reports readiness as of `now`. Never blocks.
    fn poll(&mut self, now: Instant) -> Readiness;

    /// The frame to show this tick.
    fn current_frame(&self) -> Option<&VideoFrame>;

    /// Resumes playback held back by the autoplay policy.
    fn resume(&mut self) {}

    fn is_paused(&self) -> bool {
        false
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn poll(&mut self, now: Instant) -> Readiness {
        (**self).poll(now)
    }

    fn current_frame(&self) -> Option<&VideoFrame> {
        (**self).current_frame()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }
}

/// Where a video comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Url(Url),
    Path(PathBuf),
}

impl SourceLocator {
    pub fn parse(input: &str) -> Result<Self, SourceError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SourceError::InvalidLocator(input.to_string()));
        }

        match Url::parse(trimmed) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(SourceLocator::Path)
                .map_err(|_| SourceError::InvalidLocator(input.to_string())),
            // Single-letter schemes are Windows drive letters.
            Ok(url) if url.scheme().len() > 1 => Ok(SourceLocator::Url(url)),
            _ => Ok(SourceLocator::Path(PathBuf::from(trimmed))),
        }
    }

    /// Network streams get reconnect handling in the decoder.
    pub fn is_network(&self) -> bool {
        matches!(self, SourceLocator::Url(_))
    }

    pub fn is_still_image(&self) -> bool {
        match self {
            SourceLocator::Path(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| STILL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str())),
            SourceLocator::Url(_) => false,
        }
    }

    /// The input argument handed to ffmpeg.
    pub fn to_input(&self) -> String {
        match self {
            SourceLocator::Url(url) => url.to_string(),
            SourceLocator::Path(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Url(url) => write!(f, "{}", url),
            SourceLocator::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A playable media reference plus its playback flags.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    pub locator: SourceLocator,
    pub muted: bool,
    pub looping: bool,
    /// When false, playback starts paused as if the host blocked autoplay.
    pub autoplay: bool,
    pub grace: Duration,
}

impl VideoSource {
    pub fn new(locator: &str) -> Result<Self, SourceError> {
        Ok(Self {
            locator: SourceLocator::parse(locator)?,
            muted: true,
            looping: true,
            autoplay: true,
            grace: DEFAULT_GRACE,
        })
    }

    /// Opens the matching frame source for this locator.
    pub fn open(&self) -> Result<Box<dyn FrameSource>, SourceError> {
        if self.locator.is_still_image() {
            if let SourceLocator::Path(path) = &self.locator {
                return Ok(Box::new(StillSource::open(path)?));
            }
        }
        Ok(Box::new(FfmpegSource::spawn(self)?))
    }
}

/// Tracks first-frame readiness and the decode-failure grace window.
#[derive(Debug)]
pub struct ReadinessTracker {
    grace: Duration,
    ready: bool,
    failing_since: Option<Instant>,
    last_failure: Option<String>,
    error: Option<SourceError>,
}

impl ReadinessTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            ready: false,
            failing_since: None,
            last_failure: None,
            error: None,
        }
    }

    /// A full frame was decoded; clears any pending or surfaced failure.
    pub fn on_frame(&mut self) {
        if self.error.take().is_some() || self.failing_since.is_some() {
            info!("Video source recovered");
        }
        self.ready = true;
        self.failing_since = None;
        self.last_failure = None;
    }

    /// The decoder signalled a failure. The first one starts the grace window.
    pub fn on_failure(&mut self, now: Instant, message: impl Into<String>) {
        let message = message.into();
        warn!("Decode failure: {}", message);
        self.failing_since.get_or_insert(now);
        self.last_failure = Some(message);
    }

    pub fn status(&mut self, now: Instant) -> Readiness {
        if let Some(since) = self.failing_since {
            if self.error.is_none() && now.saturating_duration_since(since) >= self.grace {
                let reason = self
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| "decoder failed".to_string());
                self.error = Some(SourceError::Unavailable(reason));
            }
        }

        match (&self.error, self.ready) {
            (Some(err), _) => Readiness::Unavailable(err.clone()),
            (None, true) => Readiness::Ready,
            (None, false) => Readiness::Pending,
        }
    }

    pub fn error(&self) -> Option<&SourceError> {
        self.error.as_ref()
    }
}

/// A source that always shows one frame.
#[derive(Debug, Clone)]
pub struct StillSource {
    frame: VideoFrame,
}

impl StillSource {
    pub fn new(frame: VideoFrame) -> Self {
        Self { frame }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        info!("Opening still image {:?}", path.as_ref());
        Ok(Self::new(VideoFrame::open_image(path)?))
    }
}

impl FrameSource for StillSource {
    fn poll(&mut self, _now: Instant) -> Readiness {
        Readiness::Ready
    }

    fn current_frame(&self) -> Option<&VideoFrame> {
        Some(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_classify_urls_and_paths() {
        let url = SourceLocator::parse("https://cdn.example.com/reel.mp4").unwrap();
        assert!(url.is_network());
        assert!(!url.is_still_image());

        let path = SourceLocator::parse("media/reel.mp4").unwrap();
        assert_eq!(path, SourceLocator::Path(PathBuf::from("media/reel.mp4")));
        assert!(!path.is_network());

        let drive = SourceLocator::parse(r"C:\media\reel.mp4").unwrap();
        assert!(matches!(drive, SourceLocator::Path(_)));

        assert!(SourceLocator::parse("poster.PNG").unwrap().is_still_image());
        assert!(SourceLocator::parse("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_become_paths() {
        let locator = SourceLocator::parse("file:///srv/media/reel.mp4").unwrap();
        assert_eq!(locator, SourceLocator::Path(PathBuf::from("/srv/media/reel.mp4")));
    }

    #[test]
    fn video_source_defaults() {
        let source = VideoSource::new("reel.mp4").unwrap();
        assert!(source.muted && source.looping && source.autoplay);
        assert_eq!(source.grace, DEFAULT_GRACE);
    }

    #[test]
    fn ready_only_after_first_frame() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(DEFAULT_GRACE);
        assert_eq!(tracker.status(t0), Readiness::Pending);
        tracker.on_frame();
        assert_eq!(tracker.status(t0), Readiness::Ready);
    }

    #[test]
    fn transient_failure_inside_grace_is_tolerated() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(DEFAULT_GRACE);
        tracker.on_frame();
        tracker.on_failure(t0, "connection reset");
        assert_eq!(tracker.status(t0 + Duration::from_millis(2999)), Readiness::Ready);
        tracker.on_frame();
        assert_eq!(tracker.status(t0 + Duration::from_secs(10)), Readiness::Ready);
        assert!(tracker.error().is_none());
    }

    #[test]
    fn persistent_failure_surfaces_after_grace() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(DEFAULT_GRACE);
        tracker.on_failure(t0, "404");
        // Later failures do not restart the window.
        tracker.on_failure(t0 + Duration::from_secs(2), "404 again");
        assert_eq!(tracker.status(t0 + Duration::from_millis(2500)), Readiness::Pending);
        assert_eq!(
            tracker.status(t0 + Duration::from_millis(3000)),
            Readiness::Unavailable(SourceError::Unavailable("404 again".into()))
        );

        tracker.on_frame();
        assert_eq!(tracker.status(t0 + Duration::from_secs(4)), Readiness::Ready);
    }

    #[test]
    fn still_source_is_immediately_ready() {
        let mut source = StillSource::new(VideoFrame::solid(4, 4, [1, 2, 3]));
        assert_eq!(source.poll(Instant::now()), Readiness::Ready);
        assert_eq!(source.current_frame().map(|f| f.width), Some(4));
    }
}
