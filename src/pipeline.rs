//! Fan-out/fan-in over the stems of one performance.
//!
//! Every stem is decoded and analysed on the rayon pool with no shared
//! mutable state; the aggregator is the only join point.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::analysis::{
    BassReference, BeatGrid, CollectiveProfile, DrumType, ProfileAggregator, StemAnalysis,
    StemAnalyzer,
};
use crate::audio::decode::load_with_timeout;
use crate::audio::tempo::{estimate_key, estimate_tempo, EstimationMethod, KeyEstimate, TempoEstimate};
use crate::audio::{DecodeOrigin, DecodedAudio};
use crate::config::Config;
use crate::error::{AnalysisError, Result};

#[derive(Clone, Debug, Default)]
pub struct PerformanceRequest {
    /// Known tempo; estimated from the stems when absent
    pub tempo_bpm: Option<f64>,
    pub key: Option<String>,
    /// Opaque style label, carried through to the report
    pub style: Option<String>,
    /// (drum type label, audio path)
    pub stems: Vec<(String, PathBuf)>,
    pub bass: Option<PathBuf>,
}

/// A stem that could not be analysed at all.
#[derive(Clone, Debug, Serialize)]
pub struct StemFailure {
    pub drum_type: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PerformanceReport {
    pub tempo: TempoEstimate,
    pub key: KeyEstimate,
    pub style: Option<String>,
    pub bass_origin: Option<DecodeOrigin>,
    pub stems: Vec<StemAnalysis>,
    pub failures: Vec<StemFailure>,
    pub profile: CollectiveProfile,
}

pub fn analyze_performance(request: &PerformanceRequest, config: &Config) -> Result<PerformanceReport> {
    analyze_performance_with_progress(request, config, &|_: &str| {})
}

/// Like [`analyze_performance`], calling `progress` with each stem's label as it finishes.
pub fn analyze_performance_with_progress(
    request: &PerformanceRequest,
    config: &Config,
    progress: &(dyn Fn(&str) + Sync),
) -> Result<PerformanceReport> {
    config.validate()?;
    if let Some(bpm) = request.tempo_bpm {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(AnalysisError::InvalidTempo(bpm));
        }
    }
    let mut labels = HashSet::new();
    for (label, _) in &request.stems {
        if !labels.insert(label.as_str()) {
            return Err(AnalysisError::DuplicateStem(label.clone()));
        }
    }

    let analyzer = StemAnalyzer::new(config);

    let bass_audio = request.bass.as_ref().and_then(|path| {
        match load_with_timeout(path, &config.decode) {
            Ok(audio) => Some(audio),
            Err(err) => {
                log::warn!("Bass track unavailable, continuing without it: {}", err);
                None
            }
        }
    });
    let bass_origin = bass_audio.as_ref().map(|a| a.origin.clone());
    // A placeholder tone says nothing about the bass line
    let bass_audio = bass_audio.filter(|audio| {
        if audio.is_synthetic() {
            log::warn!("Bass track could not be decoded, analysing without bass");
        }
        !audio.is_synthetic()
    });

    let (mut loaded, failures) = load_stems(request, config);
    for failure in &failures {
        log::warn!("Skipping {}: {}", failure.drum_type, failure.error);
    }
    if loaded.is_empty() {
        return Err(AnalysisError::NoStemsAvailable);
    }
    loaded.sort_by(|a, b| stem_order(&a.0).cmp(&stem_order(&b.0)));

    // Estimates only ever come from decoded audio
    let reference = loaded.iter().find(|(_, audio)| !audio.is_synthetic());

    let tempo = match (request.tempo_bpm, reference) {
        (Some(bpm), _) => TempoEstimate {
            bpm,
            method: EstimationMethod::Supplied,
        },
        (None, Some((label, audio))) => {
            log::info!("No tempo supplied, estimating from {}", label);
            estimate_tempo(&audio.buffer, analyzer.detector(), &config.tempo)
        }
        (None, None) => {
            log::warn!(
                "No tempo supplied and no decodable stem, using default {:.1} BPM",
                config.tempo.default_bpm
            );
            TempoEstimate::fallback(&config.tempo)
        }
    };

    let key = match &request.key {
        Some(label) => KeyEstimate::supplied(label),
        None => match bass_audio.as_ref().or(reference.map(|(_, audio)| audio)) {
            Some(source) => estimate_key(&source.buffer, &config.tempo),
            None => KeyEstimate::fallback(&config.tempo),
        },
    };

    let bass = bass_audio.map(|audio| BassReference::new(audio.buffer, analyzer.detector()));

    let duration = loaded
        .iter()
        .map(|(_, audio)| audio.buffer.duration())
        .fold(0.0f64, f64::max);
    let grid = BeatGrid::new(tempo.bpm, duration)?;
    log::info!(
        "Beat grid: {:.2} BPM, {} beats over {:.1}s",
        grid.tempo_bpm,
        grid.beat_times.len(),
        duration
    );

    let stems: Vec<StemAnalysis> = loaded
        .par_iter()
        .map(|(label, audio)| {
            let stem = analyzer.analyze(label, audio, &grid, bass.as_ref());
            progress(label.as_str());
            stem
        })
        .collect();

    let profile = ProfileAggregator::new(&config.profile).aggregate(&stems)?;

    Ok(PerformanceReport {
        tempo,
        key,
        style: request.style.clone(),
        bass_origin,
        stems,
        failures,
        profile,
    })
}

fn load_stems(request: &PerformanceRequest, config: &Config) -> (Vec<(String, DecodedAudio)>, Vec<StemFailure>) {
    let results: Vec<std::result::Result<(String, DecodedAudio), StemFailure>> = request
        .stems
        .par_iter()
        .map(|(label, path)| {
            load_with_timeout(path, &config.decode)
                .map(|audio| (label.clone(), audio))
                .map_err(|err| StemFailure {
                    drum_type: label.clone(),
                    path: path.clone(),
                    error: err.to_string(),
                })
        })
        .collect();

    let mut loaded = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(stem) => loaded.push(stem),
            Err(failure) => failures.push(failure),
        }
    }
    (loaded, failures)
}

/// Kit vocabulary order first, unrecognized labels after, then by label.
fn stem_order(label: &str) -> (usize, String) {
    let rank = DrumType::from_label(label)
        .and_then(|d| DrumType::ALL.iter().position(|&x| x == d))
        .unwrap_or(DrumType::ALL.len());
    (rank, label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BassInteraction, BassPattern, Role, TimingSignature};
    use crate::authenticity::{self, Verdict};
    use crate::audio::onset::tests::burst_track;
    use std::collections::BTreeSet;
    use std::path::Path;

    fn write_track(path: &Path, hits: &[(f64, f32)], duration: f64) {
        let buffer = burst_track(hits, 44100, duration);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in buffer.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn quarter_notes(count: usize, offset: f64) -> Vec<(f64, f32)> {
        (0..count).map(|i| (offset + i as f64 * 0.5, 0.8)).collect()
    }

    #[test]
    fn missing_stem_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        write_track(&kick, &quarter_notes(8, 0.05), 4.2);

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![
                ("kick".into(), kick),
                ("snare".into(), dir.path().join("snare.wav")),
            ],
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(report.profile.analyzed_stems, BTreeSet::from(["kick".to_string()]));
        assert_eq!(report.profile.signature_patterns.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].drum_type, "snare");
        assert_eq!(report.stems[0].bass.pattern, BassPattern::NoBass);
        assert_eq!(report.tempo.method, EstimationMethod::Supplied);
    }

    #[test]
    fn no_stems_fails_loudly() {
        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            ..Default::default()
        };
        let err = analyze_performance(&request, &Config::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoStemsAvailable));

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![("kick".into(), PathBuf::from("/missing/kick.wav"))],
            ..Default::default()
        };
        let err = analyze_performance(&request, &Config::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::NoStemsAvailable));
    }

    #[test]
    fn rejects_invalid_tempo() {
        let request = PerformanceRequest {
            tempo_bpm: Some(-10.0),
            stems: vec![("kick".into(), PathBuf::from("kick.wav"))],
            ..Default::default()
        };
        assert!(matches!(
            analyze_performance(&request, &Config::default()),
            Err(AnalysisError::InvalidTempo(_))
        ));
    }

    #[test]
    fn shared_bass_line_locks_in() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        let bass = dir.path().join("bass.wav");
        let hits = quarter_notes(8, 0.05);
        write_track(&kick, &hits, 4.2);
        write_track(&bass, &hits, 4.2);

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            key: Some("Am".into()),
            stems: vec![("kick".into(), kick)],
            bass: Some(bass),
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        let stem = &report.stems[0];
        assert_eq!(stem.bass.pattern, BassPattern::Synchronized);
        assert_eq!(stem.bass.sync_percentage, 1.0);
        assert!(stem.bass.correlation > 0.99);
        assert_eq!(stem.role.role, Role::Timekeeper);
        assert_eq!(report.key.label(), "Am");
        assert_eq!(report.bass_origin, Some(DecodeOrigin::FullDecoder));
        assert!(report.profile.bass_integration_score > 0.99);
    }

    #[test]
    fn runs_are_reproducible_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let hihat = dir.path().join("hh.wav");
        let snare = dir.path().join("snare.wav");
        let kick = dir.path().join("kick.wav");
        write_track(&hihat, &(0..16).map(|i| (0.02 + i as f64 * 0.25, 0.6)).collect::<Vec<_>>(), 4.2);
        write_track(&snare, &quarter_notes(4, 0.52), 4.2);
        write_track(&kick, &quarter_notes(8, 0.0), 4.2);

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![
                ("hihat".into(), hihat),
                ("snare".into(), snare),
                ("kick".into(), kick),
            ],
            ..Default::default()
        };
        let first = analyze_performance(&request, &Config::default()).unwrap();
        let second = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(first.stems, second.stems);
        assert_eq!(first.profile, second.profile);

        let order: Vec<&str> = first.stems.iter().map(|s| s.drum_type.as_str()).collect();
        assert_eq!(order, vec!["kick", "snare", "hihat"]);
    }

    #[test]
    fn tempo_is_estimated_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        write_track(&kick, &quarter_notes(12, 0.1), 6.5);

        let request = PerformanceRequest {
            stems: vec![("kick".into(), kick)],
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(report.tempo.method, EstimationMethod::BeatTracking);
        assert!((report.tempo.bpm - 120.0).abs() < 4.0);
        assert_ne!(report.stems[0].timing.timing_signature, TimingSignature::Unknown);
    }

    #[test]
    fn undecodable_stem_is_tagged_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        let crash = dir.path().join("crash.mp3");
        write_track(&kick, &quarter_notes(8, 0.05), 4.2);
        std::fs::write(&crash, b"definitely not an mp3 stream").unwrap();

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![("kick".into(), kick), ("crash".into(), crash)],
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(report.profile.synthetic_stems, BTreeSet::from(["crash".to_string()]));
        assert!(report.stems.iter().any(|s| s.drum_type == "crash" && s.is_synthetic()));
        assert!(report.failures.is_empty());
    }

    #[test]
    fn undecodable_bass_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        let snare = dir.path().join("snare.wav");
        let bass = dir.path().join("bass.mp3");
        write_track(&kick, &quarter_notes(8, 0.05), 4.2);
        write_track(&snare, &quarter_notes(4, 0.55), 4.2);
        std::fs::write(&bass, b"not an mp3").unwrap();

        let without_bass = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![("kick".into(), kick), ("snare".into(), snare)],
            ..Default::default()
        };
        let with_bad_bass = PerformanceRequest {
            bass: Some(bass),
            ..without_bass.clone()
        };

        let baseline = analyze_performance(&without_bass, &Config::default()).unwrap();
        let report = analyze_performance(&with_bad_bass, &Config::default()).unwrap();

        assert!(matches!(report.bass_origin, Some(DecodeOrigin::Synthetic { .. })));
        for stem in &report.stems {
            assert_eq!(stem.bass, BassInteraction::no_bass(), "{}", stem.drum_type);
        }
        assert_eq!(report.profile.bass_integration_score, 0.0);
        assert_eq!(report.key, baseline.key);
        assert_eq!(authenticity::validate(&report).verdict, Verdict::Placeholder);
    }

    #[test]
    fn tempo_ignores_synthetic_stems() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        let snare = dir.path().join("snare.wav");
        std::fs::write(&kick, b"RIFF but not really").unwrap();
        write_track(&snare, &quarter_notes(12, 0.1), 6.5);

        let request = PerformanceRequest {
            stems: vec![("kick".into(), kick), ("snare".into(), snare)],
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(report.stems[0].drum_type, "kick");
        assert!(report.stems[0].is_synthetic());
        assert_eq!(report.tempo.method, EstimationMethod::BeatTracking);
        assert!((report.tempo.bpm - 120.0).abs() < 4.0, "bpm {}", report.tempo.bpm);
    }

    #[test]
    fn only_synthetic_stems_use_default_tempo() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        std::fs::write(&kick, b"garbage").unwrap();

        let request = PerformanceRequest {
            stems: vec![("kick".into(), kick)],
            ..Default::default()
        };
        let report = analyze_performance(&request, &Config::default()).unwrap();
        assert_eq!(report.tempo, TempoEstimate::fallback(&Config::default().tempo));
        assert_eq!(report.key.method, EstimationMethod::Default);
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_track(&a, &quarter_notes(4, 0.0), 2.2);
        write_track(&b, &quarter_notes(4, 0.0), 2.2);

        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![("kick".into(), a), ("kick".into(), b)],
            ..Default::default()
        };
        let err = analyze_performance(&request, &Config::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateStem(ref label) if label == "kick"));
    }

    #[test]
    fn non_finite_timeout_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        write_track(&kick, &quarter_notes(4, 0.0), 2.2);

        let mut config = Config::default();
        config.decode.timeout_s = Some(f64::NAN);
        let request = PerformanceRequest {
            tempo_bpm: Some(120.0),
            stems: vec![("kick".into(), kick)],
            ..Default::default()
        };
        let err = analyze_performance(&request, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }
}
