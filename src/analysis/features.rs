use serde::Serialize;

use crate::audio::{DecodeOrigin, OnsetEvent};

/// Where a stem's hits sit relative to the beat, on balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSignature {
    On,
    Ahead,
    Behind,
    Unknown,
}

/// Per-stem timing statistics against the beat grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimingStats {
    /// Within tolerance of beats 1 or 3
    pub on_beat_count: u32,
    /// Within tolerance of beats 2 or 4
    pub off_beat_count: u32,
    /// Outside tolerance of every grid point
    pub syncopated_count: u32,
    /// 1 / (1 + mean |deviation| in seconds); 0.0 without onsets
    pub precision_score: f64,
    /// Signed distance to the nearest grid point, one per onset.
    /// Positive: the onset landed before the beat.
    pub micro_deviations_ms: Vec<f64>,
    /// Mean of `micro_deviations_ms`
    pub mean_deviation_ms: f64,
    /// Inter-onset interval consistency against the tempo; 0.0 below two onsets
    pub tempo_stability: f64,
    pub timing_signature: TimingSignature,
}

impl TimingStats {
    pub fn empty() -> Self {
        Self {
            on_beat_count: 0,
            off_beat_count: 0,
            syncopated_count: 0,
            precision_score: 0.0,
            micro_deviations_ms: Vec::new(),
            mean_deviation_ms: 0.0,
            tempo_stability: 0.0,
            timing_signature: TimingSignature::Unknown,
        }
    }

    pub fn onset_count(&self) -> u32 {
        self.on_beat_count + self.off_beat_count + self.syncopated_count
    }

    pub fn on_beat_ratio(&self) -> f64 {
        ratio(self.on_beat_count, self.onset_count())
    }

    pub fn syncopation_ratio(&self) -> f64 {
        ratio(self.syncopated_count, self.onset_count())
    }
}

fn ratio(part: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BassPattern {
    Synchronized,
    Complementary,
    Independent,
    Conflicting,
    NoBass,
}

/// How a drum stem sits against the bass line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BassInteraction {
    /// Pearson correlation of the raw waveforms (-1.0-1.0)
    pub correlation: f64,
    pub sync_events: u32,
    pub sync_percentage: f64,
    /// (|correlation| + sync_percentage) / 2
    pub pocket_score: f64,
    pub pattern: BassPattern,
}

impl BassInteraction {
    pub fn no_bass() -> Self {
        Self {
            correlation: 0.0,
            sync_events: 0,
            sync_percentage: 0.0,
            pocket_score: 0.0,
            pattern: BassPattern::NoBass,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Timekeeper,
    Accent,
    Color,
    Fill,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoleInfo {
    pub role: Role,
    pub complexity: f64,
    pub repetition_score: f64,
    pub syncopation_ratio: f64,
}

/// Everything measured for one instrument.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StemAnalysis {
    pub drum_type: String,
    pub origin: DecodeOrigin,
    pub sample_rate: u32,
    pub duration_s: f64,
    pub onsets: Vec<OnsetEvent>,
    pub timing: TimingStats,
    pub bass: BassInteraction,
    pub role: RoleInfo,
}

impl StemAnalysis {
    pub fn is_synthetic(&self) -> bool {
        matches!(self.origin, DecodeOrigin::Synthetic { .. })
    }
}
