//! Reelshade: looping video backgrounds through colour-grading shaders.

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use reelshade::config::{Config, ConfigWatcher, EffectSetting, ReloadPlan};
use reelshade::effect::Effect;
use reelshade::error::SourceError;
use reelshade::output::{CpuRenderer, FrameReadback, OffscreenRenderer, WindowRenderer};
use reelshade::render::{RenderBackend, RenderLoop, RenderState, TickOutcome};
use reelshade::source::FrameSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// How long snapshot mode waits for the first decoded frame.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Play a looping video background through a colour-grading shader.
#[derive(Parser, Debug)]
#[command(name = "reelshade")]
#[command(about = "Render a looping video background through real-time shader effects")]
struct Args {
    /// Video URL or local path (overrides `source` in the config file)
    source: Option<String>,

    /// YAML config file, watched for changes while the window is open
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Effect selector (0-5) or name, e.g. "tritone"
    #[arg(short, long)]
    effect: Option<String>,

    /// Mute the source (`--muted=false` to request audio)
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    muted: Option<bool>,

    /// Play the source once instead of looping
    #[arg(long)]
    no_loop: bool,

    /// Start paused, as if the host blocked autoplay; click or press space to play
    #[arg(long)]
    no_autoplay: bool,

    /// Viewport width
    #[arg(long)]
    width: Option<u32>,

    /// Viewport height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// How long decode failures may persist before the source is reported unavailable
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Delay between the first rendered frame and the ready notification
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Render the first shaded frame to this PNG and exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Use the software renderer for snapshots
    #[arg(long)]
    cpu: bool,

    /// List available effects and exit
    #[arg(long)]
    list_effects: bool,
}

impl Args {
    /// Loads the config file, if any, and applies command line overrides.
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        if let Some(effect) = &self.effect {
            config.effect = match effect.trim().parse::<i64>() {
                Ok(n) => EffectSetting::Index(n),
                Err(_) => EffectSetting::Name(effect.clone()),
            };
        }
        if let Some(muted) = self.muted {
            config.muted = muted;
        }
        if self.no_loop {
            config.looping = false;
        }
        if self.no_autoplay {
            config.autoplay = false;
        }
        config.width = self.width.unwrap_or(config.width);
        config.height = self.height.unwrap_or(config.height);
        config.fps = self.fps.unwrap_or(config.fps);
        config.grace_ms = self.grace_ms.unwrap_or(config.grace_ms);
        config.settle_ms = self.settle_ms.unwrap_or(config.settle_ms);

        config.validate()?;
        Ok(config)
    }
}

type WindowLoop = RenderLoop<WindowRenderer, Box<dyn FrameSource>>;

/// Application state for the event loop.
struct ReelshadeApp {
    config: Config,
    watcher: Option<ConfigWatcher>,
    window: Option<Arc<Window>>,
    render: Option<WindowLoop>,
    title: String,
    last_frame_time: Instant,
    frame_duration: Duration,
}

impl ReelshadeApp {
    fn new(config: Config, watcher: Option<ConfigWatcher>) -> Self {
        let frame_duration = config.frame_interval();
        Self {
            config,
            watcher,
            window: None,
            render: None,
            title: String::new(),
            last_frame_time: Instant::now(),
            frame_duration,
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let renderer = WindowRenderer::new(window)?;
        let viewport = renderer.viewport();

        let video = self.config.video_source()?;
        info!("Opening video source {}", video.locator);
        let source = video.open()?;

        let mut render = RenderLoop::new(renderer, source, viewport).with_settle_delay(self.config.settle());
        render.on_ready(|| info!("Background ready"));
        render.set_effect(self.config.effect_selector());
        render.mount();
        self.render = Some(render);
        self.update_title();
        Ok(())
    }

    fn update_title(&mut self) {
        if let (Some(window), Some(render)) = (&self.window, &self.render) {
            let title = window_title(render.effect(), render.source_error());
            if title != self.title {
                window.set_title(&title);
                self.title = title;
            }
        }
    }

    fn set_effect(&mut self, selector: i64) {
        if let Some(render) = &mut self.render {
            render.set_effect(selector);
        }
        self.update_title();
    }

    fn apply_config_changes(&mut self) {
        let Some(watcher) = &mut self.watcher else {
            return;
        };
        let Some((old, new)) = watcher.check_for_changes() else {
            return;
        };

        let plan = match ReloadPlan::between(old.as_ref(), &new) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Ignoring config change: {:#}", e);
                return;
            }
        };

        if let Some(render) = &mut self.render {
            if let Some(video) = plan.source {
                match video.open() {
                    Ok(source) => {
                        info!("Switching video source to {}", video.locator);
                        render.replace_source(source);
                    }
                    Err(e) => error!("Failed to open {}: {}", video.locator, e),
                }
            }
        }
        if let Some(selector) = plan.effect {
            self.set_effect(selector);
        }
    }

    fn teardown(&mut self) {
        if let Some(mut render) = self.render.take() {
            render.teardown();
        }
    }
}

/// Window title naming the effect and, while the source is down, why.
fn window_title(effect: Effect, error: Option<&SourceError>) -> String {
    match error {
        Some(e) => format!("Reelshade - {} - {}", effect, e),
        None => format!("Reelshade - {}", effect),
    }
}

impl ApplicationHandler for ReelshadeApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("Reelshade")
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                if let Err(e) = self.initialize(window) {
                    error!("Initialization error: {:#}", e);
                    event_loop.exit();
                }
            }
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(render) = &mut self.render {
                    render.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.logical_key.as_ref() {
                    Key::Character(c) => {
                        if let Ok(selector @ 0..=5) = c.parse::<i64>() {
                            self.set_effect(selector);
                        }
                    }
                    Key::Named(NamedKey::Space) => {
                        if let Some(render) = &mut self.render {
                            render.resume_playback();
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::MouseInput { state: ElementState::Pressed, .. } => {
                if let Some(render) = &mut self.render {
                    render.resume_playback();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= self.frame_duration {
                    self.apply_config_changes();
                    if let Some(render) = &mut self.render {
                        if let Err(e) = render.tick(now) {
                            error!("Render session ended: {}", e);
                        }
                        if render.state() == RenderState::TornDown {
                            event_loop.exit();
                        }
                    }
                    self.update_title();
                    self.last_frame_time = now;
                }

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_effects {
        println!("Available effects:");
        for effect in Effect::ALL {
            println!("  [{}] {}", effect.selector(), effect.name());
        }
        return Ok(());
    }

    let config = args.to_config()?;
    info!("Starting Reelshade with effect {}", Effect::from_selector(config.effect_selector()));

    match &args.snapshot {
        Some(path) => run_snapshot_mode(&config, path, args.cpu),
        None => run_window_mode(config, args.config),
    }
}

/// Run in window output mode (default).
fn run_window_mode(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let watcher = ConfigWatcher::new(config_path);
    let mut app = ReelshadeApp::new(config, watcher);
    event_loop.run_app(&mut app)?;
    app.teardown();

    Ok(())
}

/// Render the first shaded frame to a PNG.
fn run_snapshot_mode(config: &Config, path: &Path, cpu: bool) -> Result<()> {
    let source = config.video_source()?.open()?;
    if cpu {
        snapshot(CpuRenderer::new(), source, config, path)
    } else {
        snapshot(OffscreenRenderer::new(config.viewport())?, source, config, path)
    }
}

fn snapshot<B>(backend: B, source: Box<dyn FrameSource>, config: &Config, path: &Path) -> Result<()>
where
    B: RenderBackend + FrameReadback,
{
    let mut render = RenderLoop::new(backend, source, config.viewport()).with_settle_delay(Duration::ZERO);
    render.set_effect(config.effect_selector());
    render.resume_playback();
    render.mount();

    let deadline = Instant::now() + SNAPSHOT_TIMEOUT;
    loop {
        let now = Instant::now();
        match render.tick(now)? {
            TickOutcome::Drawn => break,
            TickOutcome::Blank => {
                let reason = render
                    .source_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "video unavailable".to_string());
                bail!(reason);
            }
            outcome => debug!("Snapshot tick: {:?}", outcome),
        }
        if now >= deadline {
            bail!("Timed out waiting for the first frame");
        }
        thread::sleep(Duration::from_millis(10));
    }

    let frame = render
        .backend()
        .last_output()
        .ok_or_else(|| anyhow!("Renderer produced no output"))?;
    frame.save(path)?;
    info!("Wrote {}x{} snapshot to {:?}", frame.width, frame.height, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_shows_source_failures() {
        assert_eq!(window_title(Effect::Tritone, None), format!("Reelshade - {}", Effect::Tritone));
        let err = SourceError::Unavailable("HTTP 404".into());
        let title = window_title(Effect::Tritone, Some(&err));
        assert!(title.ends_with("video unavailable: HTTP 404"), "{}", title);
    }

    #[test]
    fn muted_works_as_a_bare_flag() {
        let args = Args::try_parse_from(["reelshade", "--muted", "reel.mp4"]).unwrap();
        assert_eq!(args.muted, Some(true));
        assert_eq!(args.source.as_deref(), Some("reel.mp4"));

        let args = Args::try_parse_from(["reelshade", "--muted=false"]).unwrap();
        assert_eq!(args.muted, Some(false));
        assert_eq!(Args::try_parse_from(["reelshade"]).unwrap().muted, None);
    }
}
