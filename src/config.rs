use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub onset: OnsetConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub bass: BassConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub role: RoleConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
}

/// Onset detection parameters (spectral flux + adaptive peak picking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    /// Moving-average width applied to the flux curve, in frames
    #[serde(default = "default_smoothing_frames")]
    pub smoothing_frames: usize,
    /// Threshold = mean + k * stddev of the smoothed curve
    #[serde(default = "default_threshold_k")]
    pub threshold_k: f64,
    #[serde(default = "default_min_separation")]
    pub min_separation_s: f64,
    #[serde(default = "default_velocity_window")]
    pub velocity_window_s: f64,
    /// Peak amplitude below which a buffer is treated as silence
    #[serde(default = "default_silence_floor")]
    pub silence_floor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_tolerance")]
    pub tolerance_s: f64,
    #[serde(default = "default_on_beat_ratio")]
    pub on_beat_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BassConfig {
    #[serde(default = "default_sync_window")]
    pub sync_window_s: f64,
    #[serde(default = "default_synchronized_ratio")]
    pub synchronized_ratio: f64,
    #[serde(default = "default_complementary_ratio")]
    pub complementary_ratio: f64,
    #[serde(default = "default_complementary_pocket")]
    pub complementary_pocket: f64,
    #[serde(default = "default_independent_correlation")]
    pub independent_correlation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    #[serde(default = "default_min_bpm")]
    pub min_bpm: f64,
    #[serde(default = "default_max_bpm")]
    pub max_bpm: f64,
    #[serde(default = "default_bpm")]
    pub default_bpm: f64,
    #[serde(default = "default_key")]
    pub default_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default = "default_interval_resolution")]
    pub interval_resolution_s: f64,
    /// Distinct interval count that maps to complexity 1.0
    #[serde(default = "default_complexity_norm")]
    pub complexity_norm: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_high_precision")]
    pub high_precision: f64,
    #[serde(default = "default_high_complexity")]
    pub high_complexity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    #[serde(default)]
    pub timeout_s: Option<f64>,
    #[serde(default = "default_placeholder_tone")]
    pub placeholder_tone_hz: f32,
    #[serde(default = "default_placeholder_duration")]
    pub placeholder_duration_s: f32,
    #[serde(default = "default_placeholder_sample_rate")]
    pub placeholder_sample_rate: u32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            hop_size: default_hop_size(),
            smoothing_frames: default_smoothing_frames(),
            threshold_k: default_threshold_k(),
            min_separation_s: default_min_separation(),
            velocity_window_s: default_velocity_window(),
            silence_floor: default_silence_floor(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tolerance_s: default_tolerance(),
            on_beat_ratio: default_on_beat_ratio(),
        }
    }
}

impl Default for BassConfig {
    fn default() -> Self {
        Self {
            sync_window_s: default_sync_window(),
            synchronized_ratio: default_synchronized_ratio(),
            complementary_ratio: default_complementary_ratio(),
            complementary_pocket: default_complementary_pocket(),
            independent_correlation: default_independent_correlation(),
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: default_min_bpm(),
            max_bpm: default_max_bpm(),
            default_bpm: default_bpm(),
            default_key: default_key(),
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            interval_resolution_s: default_interval_resolution(),
            complexity_norm: default_complexity_norm(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            high_precision: default_high_precision(),
            high_complexity: default_high_complexity(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            timeout_s: None,
            placeholder_tone_hz: default_placeholder_tone(),
            placeholder_duration_s: default_placeholder_duration(),
            placeholder_sample_rate: default_placeholder_sample_rate(),
        }
    }
}

fn default_frame_size() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_smoothing_frames() -> usize { 3 }
fn default_threshold_k() -> f64 { 0.5 }
fn default_min_separation() -> f64 { 0.05 }
fn default_velocity_window() -> f64 { 0.05 }
fn default_silence_floor() -> f32 { 1e-4 }
fn default_tolerance() -> f64 { 0.1 }
fn default_on_beat_ratio() -> f64 { 0.7 }
fn default_sync_window() -> f64 { 0.05 }
fn default_synchronized_ratio() -> f64 { 0.7 }
fn default_complementary_ratio() -> f64 { 0.3 }
fn default_complementary_pocket() -> f64 { 0.5 }
fn default_independent_correlation() -> f64 { 0.2 }
fn default_min_bpm() -> f64 { 60.0 }
fn default_max_bpm() -> f64 { 200.0 }
fn default_bpm() -> f64 { 120.0 }
fn default_key() -> String { "C".into() }
fn default_interval_resolution() -> f64 { 0.02 }
fn default_complexity_norm() -> usize { 8 }
fn default_high_precision() -> f64 { 0.95 }
fn default_high_complexity() -> f64 { 0.5 }
fn default_placeholder_tone() -> f32 { 440.0 }
fn default_placeholder_duration() -> f32 { 1.0 }
fn default_placeholder_sample_rate() -> u32 { 22050 }

impl Config {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let o = &self.onset;
        if o.frame_size == 0 || o.hop_size == 0 {
            return Err(AnalysisError::Config("frame_size and hop_size must be non-zero".into()));
        }
        if o.hop_size > o.frame_size {
            return Err(AnalysisError::Config(format!(
                "hop_size ({}) must not exceed frame_size ({})",
                o.hop_size, o.frame_size
            )));
        }
        require_positive("onset.min_separation_s", o.min_separation_s)?;
        require_positive("onset.velocity_window_s", o.velocity_window_s)?;
        require_finite("onset.threshold_k", o.threshold_k)?;
        require_finite("onset.silence_floor", o.silence_floor as f64)?;

        require_positive("timing.tolerance_s", self.timing.tolerance_s)?;
        require_finite("timing.on_beat_ratio", self.timing.on_beat_ratio)?;

        let b = &self.bass;
        require_positive("bass.sync_window_s", b.sync_window_s)?;
        require_finite("bass.synchronized_ratio", b.synchronized_ratio)?;
        require_finite("bass.complementary_ratio", b.complementary_ratio)?;
        require_finite("bass.complementary_pocket", b.complementary_pocket)?;
        require_finite("bass.independent_correlation", b.independent_correlation)?;

        let t = &self.tempo;
        require_positive("tempo.min_bpm", t.min_bpm)?;
        require_positive("tempo.max_bpm", t.max_bpm)?;
        require_positive("tempo.default_bpm", t.default_bpm)?;
        if t.min_bpm >= t.max_bpm {
            return Err(AnalysisError::Config(format!(
                "tempo range {}..{} is not valid",
                t.min_bpm, t.max_bpm
            )));
        }

        require_positive("role.interval_resolution_s", self.role.interval_resolution_s)?;
        if self.role.complexity_norm == 0 {
            return Err(AnalysisError::Config("role.complexity_norm must be non-zero".into()));
        }

        require_finite("profile.high_precision", self.profile.high_precision)?;
        require_finite("profile.high_complexity", self.profile.high_complexity)?;

        let d = &self.decode;
        if let Some(timeout) = d.timeout_s {
            require_positive("decode.timeout_s", timeout)?;
        }
        require_positive("decode.placeholder_tone_hz", d.placeholder_tone_hz as f64)?;
        require_positive("decode.placeholder_duration_s", d.placeholder_duration_s as f64)?;
        if d.placeholder_sample_rate == 0 {
            return Err(AnalysisError::Config("decode.placeholder_sample_rate must be non-zero".into()));
        }
        Ok(())
    }
}

fn require_finite(name: &str, value: f64) -> Result<(), AnalysisError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AnalysisError::Config(format!("{} must be a finite number, got {}", name, value)))
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), AnalysisError> {
    require_finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Auto-detect a config file: ./stemgroove.toml, then the user config dirs.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("stemgroove.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("stemgroove").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("stemgroove").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
