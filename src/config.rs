use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analyzer::BitFormat;
use crate::color::Rgba;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub draw: DrawConfig,
    pub offset: OffsetConfig,
    pub color: ColorConfig,
    pub image: ImageConfig,
    pub autocolor: AutocolorConfig,
    pub player: PlayerConfig,
    pub analyzer: AnalyzerConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrawConfig {
    /// Gap between bars, px.
    pub padding: u32,
    /// Minimum bar height, px.
    pub zero: u32,
    /// Consecutive silent frames before repaints are suppressed.
    pub silence: u32,
    pub scale: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OffsetConfig {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    pub fg: Rgba,
    pub autofg: Rgba,
    pub bg: Rgba,
    pub auto: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub show: bool,
    pub usetag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutocolorConfig {
    pub bands: usize,
    pub window: usize,
    pub saturation_min: f32,
    pub value_min: f32,
    pub isize: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    pub volume: f32,
    pub shuffle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Mono,
    Stereo,
}

impl ChannelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMode::Mono => "mono",
            ChannelMode::Stereo => "stereo",
        }
    }
}

/// Settings for the external analyzer. Rendered into its INI file on every start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub command: String,
    pub fifo: PathBuf,
    pub bars: usize,
    pub bit_format: BitFormat,
    pub framerate: u32,
    pub sensitivity: u32,
    pub autosens: bool,
    pub lower_cutoff_freq: u32,
    pub higher_cutoff_freq: u32,
    pub channels: ChannelMode,
    pub gravity: f32,
    pub integral: f32,
    pub ignore: u32,
    pub monstercat: bool,
    pub eq: Vec<f32>,
    /// Capacity of the reader -> UI frame channel.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    pub fps: u32,
    pub status: bool,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            padding: 1,
            zero: 0,
            silence: 10,
            scale: 1.0,
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            fg: Rgba::new(0x9A, 0xBB, 0xD8, 0xFF),
            autofg: Rgba::new(0x9A, 0xBB, 0xD8, 0xFF),
            bg: Rgba::new(0x1C, 0x1C, 0x1C, 0xFF),
            auto: true,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            show: true,
            usetag: true,
            default: None,
        }
    }
}

impl Default for AutocolorConfig {
    fn default() -> Self {
        Self {
            bands: 16,
            window: 4,
            saturation_min: 0.5,
            value_min: 0.5,
            isize: [100, 100],
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            shuffle: false,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: "cava".into(),
            fifo: PathBuf::from("/tmp/cavalcade.fifo"),
            bars: 32,
            bit_format: BitFormat::Bit16,
            framerate: 60,
            sensitivity: 100,
            autosens: true,
            lower_cutoff_freq: 50,
            higher_cutoff_freq: 10000,
            channels: ChannelMode::Mono,
            gravity: 1.0,
            integral: 0.7,
            ignore: 0,
            monstercat: false,
            eq: vec![1.0; 5],
            queue_capacity: 64,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { fps: 60, status: true }
    }
}

/// Upper bound for `draw.padding`, in pixels.
const MAX_PADDING: u32 = 1000;
/// Upper bound for each `[offset]` value, in pixels.
const MAX_OFFSET: u32 = 10_000;

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn check_unit(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, format!("{} is outside 0.0-1.0", value)))
    }
}

impl AppConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.draw.scale.is_finite() && self.draw.scale > 0.0) {
            return Err(invalid("draw.scale", "must be a positive number"));
        }
        if self.draw.padding > MAX_PADDING {
            return Err(invalid(
                "draw.padding",
                format!("{} is above {}", self.draw.padding, MAX_PADDING),
            ));
        }
        let offsets = [
            ("offset.left", self.offset.left),
            ("offset.right", self.offset.right),
            ("offset.top", self.offset.top),
            ("offset.bottom", self.offset.bottom),
        ];
        for (key, value) in offsets {
            if value > MAX_OFFSET {
                return Err(invalid(key, format!("{} is above {}", value, MAX_OFFSET)));
            }
        }

        let ac = &self.autocolor;
        if ac.bands == 0 {
            return Err(invalid("autocolor.bands", "must be at least 1"));
        }
        if ac.window == 0 || ac.window > ac.bands {
            return Err(invalid(
                "autocolor.window",
                format!("must be within 1-{}", ac.bands),
            ));
        }
        check_unit("autocolor.saturation_min", ac.saturation_min)?;
        check_unit("autocolor.value_min", ac.value_min)?;
        if ac.isize.contains(&0) {
            return Err(invalid("autocolor.isize", "thumbnail size must be non-zero"));
        }

        check_unit("player.volume", self.player.volume)?;

        let an = &self.analyzer;
        if an.command.trim().is_empty() {
            return Err(invalid("analyzer.command", "must not be empty"));
        }
        if !(1..=512).contains(&an.bars) {
            return Err(invalid("analyzer.bars", format!("{} is outside 1-512", an.bars)));
        }
        if !(1..=200).contains(&an.framerate) {
            return Err(invalid(
                "analyzer.framerate",
                format!("{} is outside 1-200", an.framerate),
            ));
        }
        if an.lower_cutoff_freq >= an.higher_cutoff_freq {
            return Err(invalid(
                "analyzer.lower_cutoff_freq",
                "must be below higher_cutoff_freq",
            ));
        }
        if !(0.0..1.0).contains(&an.integral) {
            return Err(invalid("analyzer.integral", "must be within 0.0-0.99"));
        }
        if an.eq.is_empty() {
            return Err(invalid("analyzer.eq", "needs at least one band"));
        }
        if an.queue_capacity == 0 {
            return Err(invalid("analyzer.queue_capacity", "must be at least 1"));
        }

        if !(1..=240).contains(&self.ui.fps) {
            return Err(invalid("ui.fps", format!("{} is outside 1-240", self.ui.fps)));
        }
        Ok(())
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cavalcade")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// File-backed application settings.
///
/// A store that failed to load runs on defaults and refuses to save, so a
/// broken user file is never overwritten.
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
    fallback: bool,
}

impl ConfigStore {
    pub fn open(path: PathBuf) -> Self {
        if !path.exists() {
            let store = Self {
                path,
                config: AppConfig::default(),
                fallback: false,
            };
            return match store.write() {
                Ok(()) => {
                    log::info!("New configuration file was created: {}", store.path.display());
                    store
                }
                Err(err) => {
                    log::warn!("Failed to create default config: {:#}", err);
                    Self { fallback: true, ..store }
                }
            };
        }

        match Self::load(&path) {
            Ok(config) => {
                log::debug!("Loaded config from {}", path.display());
                Self {
                    path,
                    config,
                    fallback: false,
                }
            }
            Err(err) => {
                log::error!("{}", err);
                log::info!("Continuing with default settings");
                Self {
                    path,
                    config: AppConfig::default(),
                    fallback: true,
                }
            }
        }
    }

    fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        AppConfig::parse(&text, path)
    }

    pub fn get(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn save(&self) -> Result<()> {
        if self.fallback {
            log::warn!("User config is not available, all settings changes will be lost");
            return Ok(());
        }
        self.write()
    }

    fn write(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(&self.config).context("Failed to serialize config")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write config: {}", self.path.display()))?;
        Ok(())
    }
}
