use serde::Serialize;
use std::collections::BTreeSet;

use super::features::{Role, RoleInfo, TimingStats};
use crate::audio::OnsetEvent;
use crate::config::RoleConfig;

/// The fixed drum-kit vocabulary a performance is split into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumType {
    Kick,
    Snare,
    Toms,
    HiHat,
    Crash,
    Ride,
}

impl DrumType {
    pub const ALL: [DrumType; 6] = [
        DrumType::Kick,
        DrumType::Snare,
        DrumType::Toms,
        DrumType::HiHat,
        DrumType::Crash,
        DrumType::Ride,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "kick" | "bd" | "bass_drum" | "kick_drum" => Some(DrumType::Kick),
            "snare" | "sd" | "snare_drum" => Some(DrumType::Snare),
            "hihat" | "hi_hat" | "hh" | "hat" => Some(DrumType::HiHat),
            "crash" | "cymbal" => Some(DrumType::Crash),
            "ride" => Some(DrumType::Ride),
            s if s == "toms" || s.starts_with("tom") => Some(DrumType::Toms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrumType::Kick => "kick",
            DrumType::Snare => "snare",
            DrumType::Toms => "toms",
            DrumType::HiHat => "hihat",
            DrumType::Crash => "crash",
            DrumType::Ride => "ride",
        }
    }

    pub fn base_role(&self) -> Role {
        match self {
            DrumType::Kick | DrumType::HiHat => Role::Timekeeper,
            DrumType::Snare => Role::Accent,
            DrumType::Crash | DrumType::Ride => Role::Color,
            DrumType::Toms => Role::Fill,
        }
    }
}

pub struct RoleClassifier {
    config: RoleConfig,
}

impl RoleClassifier {
    pub fn new(config: &RoleConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn classify(&self, drum_type: &str, onsets: &[OnsetEvent], timing: &TimingStats) -> RoleInfo {
        let role = DrumType::from_label(drum_type)
            .map(|d| d.base_role())
            .unwrap_or(Role::Unknown);

        let intervals: Vec<f64> = onsets.windows(2).map(|w| w[1].time_s - w[0].time_s).collect();

        RoleInfo {
            role,
            complexity: self.complexity(&intervals),
            repetition_score: repetition_score(&intervals),
            syncopation_ratio: timing.syncopation_ratio(),
        }
    }

    /// Distinct interval lengths (quantized) relative to `complexity_norm`.
    fn complexity(&self, intervals: &[f64]) -> f64 {
        if intervals.is_empty() {
            return 0.0;
        }
        let distinct: BTreeSet<i64> = intervals
            .iter()
            .map(|iv| (iv / self.config.interval_resolution_s).round() as i64)
            .collect();
        (distinct.len() as f64 / self.config.complexity_norm as f64).min(1.0)
    }
}

/// 1 / (1 + coefficient of variation) of the inter-onset intervals.
fn repetition_score(intervals: &[f64]) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = intervals.iter().map(|iv| (iv - mean) * (iv - mean)).sum::<f64>() / n;
    1.0 / (1.0 + var.sqrt() / mean)
}
