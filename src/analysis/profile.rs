use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use super::features::{Role, StemAnalysis, TimingSignature};
use crate::config::ProfileConfig;
use crate::error::AnalysisError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrooveStyle {
    Tight,
    Pushing,
    LayingBack,
    Variable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayingApproach {
    Metronomic,
    Technical,
    Expressive,
    Balanced,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SignaturePattern {
    pub drum_type: String,
    pub role: Role,
    pub timing_signature: TimingSignature,
    pub complexity: f64,
}

/// Cross-instrument summary of one performance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectiveProfile {
    pub analyzed_stems: BTreeSet<String>,
    /// Stems whose audio came from the synthetic placeholder rung
    pub synthetic_stems: BTreeSet<String>,
    pub kit_timing_cohesion: f64,
    pub collective_groove_score: f64,
    pub bass_integration_score: f64,
    pub rhythmic_complexity_score: f64,
    pub groove_style: GrooveStyle,
    pub playing_approach: PlayingApproach,
    pub signature_patterns: Vec<SignaturePattern>,
}

pub struct ProfileAggregator {
    config: ProfileConfig,
}

impl ProfileAggregator {
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn aggregate(&self, stems: &[StemAnalysis]) -> Result<CollectiveProfile, AnalysisError> {
        if stems.is_empty() {
            return Err(AnalysisError::NoStemsAvailable);
        }

        // Stems without onsets carry neutral placeholders, not measurements
        let measured: Vec<&StemAnalysis> = stems.iter().filter(|s| !s.onsets.is_empty()).collect();
        let precisions: Vec<f64> = measured.iter().map(|s| s.timing.precision_score).collect();
        let complexities: Vec<f64> = measured.iter().map(|s| s.role.complexity).collect();
        let grooves: Vec<f64> = measured.iter().map(|s| velocity_consistency(s)).collect();
        let pockets: Vec<f64> = measured.iter().map(|s| s.bass.pocket_score).collect();

        let mean_precision = mean(&precisions);
        let mean_complexity = mean(&complexities);
        let cohesion = if measured.is_empty() {
            0.0
        } else {
            1.0 / (1.0 + std_dev(&precisions))
        };

        let profile = CollectiveProfile {
            analyzed_stems: stems.iter().map(|s| s.drum_type.clone()).collect(),
            synthetic_stems: stems
                .iter()
                .filter(|s| s.is_synthetic())
                .map(|s| s.drum_type.clone())
                .collect(),
            kit_timing_cohesion: cohesion,
            collective_groove_score: mean(&grooves),
            bass_integration_score: mean(&pockets),
            rhythmic_complexity_score: mean_complexity,
            groove_style: groove_style(&measured),
            playing_approach: self.playing_approach(mean_precision, mean_complexity),
            signature_patterns: measured
                .iter()
                .map(|s| SignaturePattern {
                    drum_type: s.drum_type.clone(),
                    role: s.role.role,
                    timing_signature: s.timing.timing_signature,
                    complexity: s.role.complexity,
                })
                .collect(),
        };

        log::info!(
            "Profile: {} stems, cohesion={:.3}, groove={:.3}, bass={:.3}, complexity={:.3}, {:?}/{:?}",
            profile.analyzed_stems.len(),
            profile.kit_timing_cohesion,
            profile.collective_groove_score,
            profile.bass_integration_score,
            profile.rhythmic_complexity_score,
            profile.groove_style,
            profile.playing_approach
        );

        Ok(profile)
    }

    fn playing_approach(&self, precision: f64, complexity: f64) -> PlayingApproach {
        let precise = precision >= self.config.high_precision;
        let complex = complexity >= self.config.high_complexity;
        match (precise, complex) {
            (true, false) => PlayingApproach::Metronomic,
            (true, true) => PlayingApproach::Technical,
            (false, true) => PlayingApproach::Expressive,
            (false, false) => PlayingApproach::Balanced,
        }
    }
}

/// Majority vote over timing signatures; ties and an `Unknown` majority are `Variable`.
fn groove_style(stems: &[&StemAnalysis]) -> GrooveStyle {
    let mut counts: HashMap<TimingSignature, usize> = HashMap::new();
    for stem in stems {
        *counts.entry(stem.timing.timing_signature).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<TimingSignature> = counts
        .iter()
        .filter(|&(_, &c)| c == top)
        .map(|(&sig, _)| sig)
        .collect();
    if leaders.len() != 1 {
        return GrooveStyle::Variable;
    }
    match leaders[0] {
        TimingSignature::On => GrooveStyle::Tight,
        TimingSignature::Ahead => GrooveStyle::Pushing,
        TimingSignature::Behind => GrooveStyle::LayingBack,
        TimingSignature::Unknown => GrooveStyle::Variable,
    }
}

/// Groove contribution of one stem: 1 / (1 + cv) of its onset velocities.
fn velocity_consistency(stem: &StemAnalysis) -> f64 {
    let velocities: Vec<f64> = stem.onsets.iter().map(|o| o.velocity).collect();
    let m = mean(&velocities);
    if m <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + std_dev(&velocities) / m)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
}
