//! YAML configuration and hot reload.

use crate::effect::Effect;
use crate::render::{ViewportGeometry, DEFAULT_SETTLE};
use crate::source::{VideoSource, DEFAULT_GRACE};
use anyhow::{anyhow, Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{error, info, warn};

/// Effect given either as a selector number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EffectSetting {
    Index(i64),
    Name(String),
}

impl Default for EffectSetting {
    fn default() -> Self {
        EffectSetting::Index(0)
    }
}

impl EffectSetting {
    /// Raw selector for the render loop. Unknown names yield `None`.
    pub fn selector(&self) -> Option<i64> {
        match self {
            EffectSetting::Index(n) => Some(*n),
            EffectSetting::Name(name) => Effect::parse(name).map(|e| i64::from(e.selector())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Video URL or local path.
    pub source: Option<String>,
    pub effect: EffectSetting,
    pub muted: bool,
    pub looping: bool,
    pub autoplay: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub grace_ms: u64,
    pub settle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            effect: EffectSetting::default(),
            muted: true,
            looping: true,
            autoplay: true,
            width: 1280,
            height: 720,
            fps: 30,
            grace_ms: DEFAULT_GRACE.as_millis() as u64,
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.effect.selector().is_none() {
            return Err(anyhow!("Unknown effect {:?}", self.effect));
        }
        if self.fps == 0 {
            return Err(anyhow!("fps must be at least 1"));
        }
        Ok(())
    }

    pub fn effect_selector(&self) -> i64 {
        self.effect.selector().unwrap_or(0)
    }

    pub fn viewport(&self) -> ViewportGeometry {
        ViewportGeometry::new(self.width, self.height)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Builds the playable source described by this config.
    pub fn video_source(&self) -> Result<VideoSource> {
        let locator = self
            .source
            .as_deref()
            .ok_or_else(|| anyhow!("No video source given (positional argument or `source` in config)"))?;
        let mut source = VideoSource::new(locator)?;
        source.muted = self.muted;
        source.looping = self.looping;
        source.autoplay = self.autoplay;
        source.grace = Duration::from_millis(self.grace_ms);
        Ok(source)
    }
}

/// What a config reload asks the running loop to change.
#[derive(Debug, Default, PartialEq)]
pub struct ReloadPlan {
    pub effect: Option<i64>,
    pub source: Option<VideoSource>,
}

impl ReloadPlan {
    pub fn between(old: Option<&Config>, new: &Config) -> Result<Self> {
        let mut plan = ReloadPlan::default();
        if old.map(|o| &o.effect) != Some(&new.effect) {
            plan.effect = Some(new.effect_selector());
        }
        let playback_changed = old.map_or(true, |o| {
            o.source != new.source
                || o.muted != new.muted
                || o.looping != new.looping
                || o.autoplay != new.autoplay
                || o.grace_ms != new.grace_ms
        });
        if playback_changed && new.source.is_some() {
            plan.source = Some(new.video_source()?);
        }
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.effect.is_none() && self.source.is_none()
    }
}

/// Manages configuration file watching and reloading.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current_config: Option<Config>,
}

impl ConfigWatcher {
    /// Starts watching `path`. Returns `None` if no watcher can be set up.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch config file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching config file {:?} for changes", path);

                let current_config = Config::load(&path).ok();
                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    current_config,
                })
            }
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                None
            }
        }
    }

    /// Drains file events and returns (old_config, new_config) if the file changed.
    pub fn check_for_changes(&mut self) -> Option<(Option<Config>, Config)> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                    needs_reload = true;
                }
            }
        }

        if !needs_reload {
            return None;
        }

        info!("Config file changed, checking for updates...");
        match Config::load(&self.path) {
            Ok(new_config) => {
                if self.current_config.as_ref() == Some(&new_config) {
                    return None;
                }
                let old = self.current_config.replace(new_config.clone());
                Some((old, new_config))
            }
            Err(e) => {
                error!("Keeping previous config: {:#}", e);
                None
            }
        }
    }
}
