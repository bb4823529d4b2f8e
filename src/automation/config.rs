//! Configuration types for the fishing loop.
//!
//! Loads settings from config.json at startup. Provides capture regions, bar
//! colours, controller gains, timeouts and the auto-sell layout. Every field
//! has a default so a partial config.json is valid.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::automation::controller::PdGains;
use crate::automation::detection::LocatorSettings;
use crate::automation::sequence::Step;
use crate::automation::state::MachineConfig;
use crate::capture::ScreenRect;
use crate::ocr::preprocess::MAX_SCALE;

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<FishingConfig> = OnceLock::new();

/// Axis along which the indicator moves inside the bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarAxis {
    /// Positions grow downwards (holding pushes the indicator down)
    Vertical,
    /// Positions grow to the right
    Horizontal,
}

/// Colours and sizes that identify the reeling bar on screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarGeometry {
    /// Outline colour of the bar frame
    pub frame_color: [u8; 3],
    /// Fill colour of the target zone
    pub zone_color: [u8; 3],
    /// Colour of the moving indicator
    pub indicator_color: [u8; 3],
    /// Maximum per-channel difference still counted as a match
    pub color_tolerance: u8,
    /// Fewer indicator pixels than this means "not found"
    pub min_indicator_pixels: u32,
    pub axis: BarAxis,
}

impl Default for BarGeometry {
    fn default() -> Self {
        Self {
            frame_color: [85, 170, 255],
            zone_color: [25, 25, 25],
            indicator_color: [255, 255, 255],
            color_tolerance: 8,
            min_indicator_pixels: 3,
            axis: BarAxis::Vertical,
        }
    }
}

/// A point in absolute screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Auto-purchase settings, run after every `loops_per_sell` catches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSellConfig {
    pub enabled: bool,
    pub loops_per_sell: u32,
    /// Amount typed into the shop quantity box
    pub amount: u32,
    /// Shop points 1-4 (open, quantity box, confirm, close)
    pub points: [Option<ScreenPoint>; 4],
    /// Delay after pressing the shop key (milliseconds)
    pub key_delay_ms: u64,
    /// Delay after every click (milliseconds)
    pub click_delay_ms: u64,
    /// Delay after typing the amount (milliseconds)
    pub after_type_delay_ms: u64,
}

impl Default for AutoSellConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            loops_per_sell: 1,
            amount: 10,
            points: [None; 4],
            key_delay_ms: 2000,
            click_delay_ms: 1000,
            after_type_delay_ms: 1000,
        }
    }
}

impl AutoSellConfig {
    /// Returns the 1-based indices of unset points.
    pub fn missing_points(&self) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Reward-notification OCR settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Explicit tesseract executable; searched for when unset
    pub tesseract_path: Option<String>,
    /// Brightness threshold (pixels with R, G, B all > threshold are text)
    pub threshold: u8,
    /// Integer upscale factor applied before recognition
    pub scale: u32,
    /// Lines Tesseract scores below this (0-100) are discarded
    pub min_confidence: f32,
    /// Minimum time between two drop-region scans (milliseconds)
    pub cooldown_ms: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_path: None,
            threshold: 190,
            scale: 3,
            min_confidence: 40.0,
            cooldown_ms: 500,
        }
    }
}

/// Virtual-key codes of the global hotkeys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Start / pause / resume
    pub toggle_loop: u32,
    pub toggle_layout: u32,
    /// Stop and exit
    pub stop: u32,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            toggle_loop: 0x70,   // VK_F1
            toggle_layout: 0x71, // VK_F2
            stop: 0x72,          // VK_F3
        }
    }
}

/// Complete configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FishingConfig {
    /// Screen area containing the reeling bar
    pub capture_region: ScreenRect,
    /// Screen area where drop notifications appear
    pub drop_region: ScreenRect,
    pub bar: BarGeometry,
    /// Proportional gain
    pub kp: f32,
    /// Derivative gain
    pub kd: f32,
    /// Half-width of the no-action band around a zero control signal
    pub hysteresis_band: f32,
    /// Smallest dt used for the derivative term (milliseconds)
    pub min_dt_ms: u64,
    /// Samples below this confidence are advisory only
    pub confidence_threshold: f32,
    /// Control loop period (milliseconds)
    pub tick_period_ms: u64,
    /// Upper bound on a single screen capture (milliseconds)
    pub capture_timeout_ms: u64,
    /// Maximum length of one reeling episode (milliseconds)
    pub episode_timeout_ms: u64,
    /// Time allowed for the bar to appear after a cast (milliseconds)
    pub cast_timeout_ms: u64,
    /// How long the cast button is held (milliseconds)
    pub cast_hold_ms: u64,
    /// Recasts allowed before a missing bar counts as a failure
    pub max_recasts: u32,
    /// Pause between returning to Idle and the next cast (milliseconds)
    pub recast_delay_ms: u64,
    /// Wait after the bar disappears before selling (milliseconds)
    pub wait_after_catch_ms: u64,
    /// Consecutive "not found" samples that end an episode
    pub loss_confirm_ticks: u32,
    /// Consecutive capture failures that trigger recovery
    pub capture_error_limit: u32,
    /// Maximum time spent in Selling (milliseconds)
    pub sell_timeout_ms: u64,
    /// Failed recovery verifications before the session stops
    pub recovery_max_retries: u32,
    /// Maximum time for one recovery attempt (milliseconds)
    pub recovery_timeout_ms: u64,
    /// Corrective actions run on every recovery attempt
    pub recovery_steps: Vec<Step>,
    pub auto_sell: AutoSellConfig,
    pub ocr: OcrConfig,
    pub hotkeys: HotkeyConfig,
    /// Emit a progress notification every N catches (0 = never)
    pub notify_every_catches: u32,
    /// Log per-tick controller output
    pub verbose_logging: bool,
}

impl Default for FishingConfig {
    fn default() -> Self {
        Self {
            capture_region: ScreenRect::default(),
            drop_region: ScreenRect::new(760, 80, 400, 120),
            bar: BarGeometry::default(),
            kp: 0.1,
            kd: 0.5,
            hysteresis_band: 0.002,
            min_dt_ms: 5,
            confidence_threshold: 0.5,
            tick_period_ms: 50,
            capture_timeout_ms: 200,
            episode_timeout_ms: 50_000,
            cast_timeout_ms: 15_000,
            cast_hold_ms: 1000,
            max_recasts: 3,
            recast_delay_ms: 500,
            wait_after_catch_ms: 1000,
            loss_confirm_ticks: 3,
            capture_error_limit: 10,
            sell_timeout_ms: 60_000,
            recovery_max_retries: 3,
            recovery_timeout_ms: 30_000,
            recovery_steps: vec![Step::Release, Step::Wait { ms: 2000 }],
            auto_sell: AutoSellConfig::default(),
            ocr: OcrConfig::default(),
            hotkeys: HotkeyConfig::default(),
            notify_every_catches: 10,
            verbose_logging: false,
        }
    }
}

impl FishingConfig {
    /// Checks values that would make the loop misbehave rather than just play badly.
    pub fn validate(&self) -> Result<()> {
        if self.tick_period_ms == 0 {
            return Err(anyhow!("tick_period_ms must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within 0.0-1.0, got {}",
                self.confidence_threshold
            ));
        }
        if self.hysteresis_band < 0.0 {
            return Err(anyhow!("hysteresis_band must not be negative"));
        }
        if self.capture_region.is_empty() {
            return Err(anyhow!("capture_region is empty"));
        }
        for (name, value) in [
            ("loss_confirm_ticks", self.loss_confirm_ticks),
            ("capture_error_limit", self.capture_error_limit),
            ("recovery_max_retries", self.recovery_max_retries),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be at least 1", name));
            }
        }
        if self.ocr.enabled {
            if !(1..=MAX_SCALE).contains(&self.ocr.scale) {
                return Err(anyhow!(
                    "ocr.scale must be within 1-{}, got {}",
                    MAX_SCALE,
                    self.ocr.scale
                ));
            }
            if !(0.0..=100.0).contains(&self.ocr.min_confidence) {
                return Err(anyhow!(
                    "ocr.min_confidence must be within 0-100, got {}",
                    self.ocr.min_confidence
                ));
            }
        }
        if self.auto_sell.enabled {
            if self.auto_sell.loops_per_sell == 0 {
                return Err(anyhow!("auto_sell.loops_per_sell must be at least 1"));
            }
            let missing = self.auto_sell.missing_points();
            if !missing.is_empty() {
                return Err(anyhow!(
                    "Auto sell needs point(s) {:?} to be set before starting",
                    missing
                ));
            }
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn gains(&self) -> PdGains {
        PdGains {
            kp: self.kp,
            kd: self.kd,
            hysteresis_band: self.hysteresis_band,
            min_dt: Duration::from_millis(self.min_dt_ms.max(1)),
            confidence_threshold: self.confidence_threshold,
        }
    }

    pub fn locator(&self) -> LocatorSettings {
        LocatorSettings {
            geometry: self.bar.clone(),
        }
    }

    pub fn machine(&self) -> MachineConfig {
        let sell_every = if self.auto_sell.enabled {
            self.auto_sell.loops_per_sell
        } else {
            0
        };
        MachineConfig {
            confidence_threshold: self.confidence_threshold,
            cast_timeout: Duration::from_millis(self.cast_timeout_ms),
            max_recasts: self.max_recasts,
            recast_delay: Duration::from_millis(self.recast_delay_ms),
            episode_timeout: Duration::from_millis(self.episode_timeout_ms),
            loss_confirm_ticks: self.loss_confirm_ticks,
            capture_error_limit: self.capture_error_limit,
            sell_timeout: Duration::from_millis(self.sell_timeout_ms),
            sell_every,
            purchase_amount: self.auto_sell.amount,
            recovery_max_retries: self.recovery_max_retries,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            notify_every_catches: self.notify_every_catches,
        }
    }
}

/// Parses a config from JSON text.
pub fn parse_config(contents: &str) -> Result<FishingConfig> {
    Ok(serde_json::from_str(contents)?)
}

/// Loads configuration from `config_path` or returns defaults.
pub fn load_config(config_path: &Path) -> FishingConfig {
    log::info!("Looking for config at: {}", config_path.display());

    if config_path.exists() {
        match fs::read_to_string(config_path) {
            Ok(contents) => match parse_config(&contents) {
                Ok(config) => {
                    log::info!("Config loaded from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to parse config.json: {}. Using defaults.", e);
                }
            },
            Err(e) => {
                log::warn!("Failed to read config.json: {}. Using defaults.", e);
            }
        }
    } else {
        log::info!("config.json not found. Using default config.");
    }

    FishingConfig::default()
}

/// Initializes the global configuration. Call once at startup.
pub fn init_config() {
    let _ = CONFIG.set(load_config(&crate::paths::get_config_path()));
}

/// Returns the global configuration, loading it on first use.
pub fn get_config() -> &'static FishingConfig {
    CONFIG.get_or_init(|| load_config(&crate::paths::get_config_path()))
}
