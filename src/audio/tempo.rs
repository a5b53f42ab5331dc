//! Tempo and key estimation for runs without an externally supplied tempo.
//!
//! Both follow the same ladder: try the best method, validate the answer,
//! fall through on anything implausible, end on a fixed default.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use super::decode::AudioBuffer;
use super::onset::OnsetDetector;
use crate::config::TempoConfig;

const CHROMA_FFT_SIZE: usize = 4096;
const CHROMA_HOP_SIZE: usize = 2048;
const CHROMA_MIN_HZ: f32 = 65.0;
const CHROMA_MAX_HZ: f32 = 2000.0;
const MIN_KEY_CORRELATION: f64 = 0.5;

/// Krumhansl-Kessler major key profile.
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    Supplied,
    BeatTracking,
    Autocorrelation,
    Chroma,
    Default,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub method: EstimationMethod,
}

impl TempoEstimate {
    /// The configured default tempo, tagged as such.
    pub fn fallback(config: &TempoConfig) -> Self {
        Self {
            bpm: config.default_bpm,
            method: EstimationMethod::Default,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyEstimate {
    pub root: String,
    pub mode: KeyMode,
    pub confidence: f64,
    pub method: EstimationMethod,
}

impl KeyEstimate {
    pub fn supplied(label: &str) -> Self {
        let (root, mode) = match label.strip_suffix('m') {
            Some(root) if !root.is_empty() => (root.to_string(), KeyMode::Minor),
            _ => (label.to_string(), KeyMode::Major),
        };
        Self {
            root,
            mode,
            confidence: 1.0,
            method: EstimationMethod::Supplied,
        }
    }

    pub fn fallback(config: &TempoConfig) -> Self {
        Self {
            confidence: 0.0,
            method: EstimationMethod::Default,
            ..Self::supplied(&config.default_key)
        }
    }

    pub fn label(&self) -> String {
        match self.mode {
            KeyMode::Major => self.root.clone(),
            KeyMode::Minor => format!("{}m", self.root),
        }
    }
}

pub fn estimate_tempo(buffer: &AudioBuffer, detector: &OnsetDetector, config: &TempoConfig) -> TempoEstimate {
    if let Some(bpm) = beat_tracking_tempo(buffer, detector, config) {
        log::info!("Tempo {:.1} BPM (beat tracking)", bpm);
        return TempoEstimate {
            bpm,
            method: EstimationMethod::BeatTracking,
        };
    }
    log::warn!("Beat tracking gave no plausible tempo, trying autocorrelation");

    if let Some(bpm) = autocorrelation_tempo(buffer, detector, config) {
        log::info!("Tempo {:.1} BPM (autocorrelation)", bpm);
        return TempoEstimate {
            bpm,
            method: EstimationMethod::Autocorrelation,
        };
    }
    log::warn!(
        "Autocorrelation gave no plausible tempo, using default {:.1} BPM",
        config.default_bpm
    );

    TempoEstimate::fallback(config)
}

fn plausible(bpm: f64, config: &TempoConfig) -> bool {
    bpm.is_finite() && bpm >= config.min_bpm && bpm <= config.max_bpm
}

/// Median inter-onset tempo, octave-folded toward the plausible range.
fn beat_tracking_tempo(buffer: &AudioBuffer, detector: &OnsetDetector, config: &TempoConfig) -> Option<f64> {
    let onsets = detector.detect(buffer);
    if onsets.len() < 3 {
        return None;
    }

    let mut candidates: Vec<f64> = onsets
        .windows(2)
        .map(|w| w[1].time_s - w[0].time_s)
        .filter(|&i| i > 0.0)
        .map(|i| fold_octaves(60.0 / i, config))
        .filter(|&bpm| plausible(bpm, config))
        .collect();

    if candidates.len() < 2 {
        return None;
    }

    candidates.sort_by(|a, b| a.total_cmp(b));
    let bpm = candidates[candidates.len() / 2];
    plausible(bpm, config).then_some(bpm)
}

fn fold_octaves(mut bpm: f64, config: &TempoConfig) -> f64 {
    for _ in 0..4 {
        if bpm > config.max_bpm {
            bpm /= 2.0;
        } else if bpm < config.min_bpm {
            bpm *= 2.0;
        } else {
            break;
        }
    }
    bpm
}

/// Strongest periodicity of the onset-strength envelope within the BPM range.
fn autocorrelation_tempo(buffer: &AudioBuffer, detector: &OnsetDetector, config: &TempoConfig) -> Option<f64> {
    let envelope = detector.onset_strength_envelope(buffer);
    let frame_rate = detector.frame_rate(buffer.sample_rate);
    if envelope.len() < 4 || frame_rate <= 0.0 {
        return None;
    }

    let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
    let centered: Vec<f64> = envelope.iter().map(|v| v - mean).collect();

    let min_lag = ((60.0 * frame_rate / config.max_bpm).ceil() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / config.min_bpm).floor() as usize).min(centered.len() - 2);
    if min_lag >= max_lag {
        return None;
    }

    let acf = |lag: usize| -> f64 {
        let n = centered.len() - lag;
        (0..n).map(|i| centered[i] * centered[i + lag]).sum::<f64>() / n as f64
    };

    let scores: Vec<f64> = (min_lag - 1..=max_lag + 1).map(acf).collect();
    let (best, best_score) = (1..scores.len() - 1)
        .map(|k| (k, scores[k]))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if best_score <= 1e-12 {
        return None;
    }

    // Parabolic refinement around the peak lag
    let (l, c, r) = (scores[best - 1], scores[best], scores[best + 1]);
    let denom = l - 2.0 * c + r;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let lag = (min_lag - 1 + best) as f64 + offset;

    let bpm = 60.0 * frame_rate / lag;
    plausible(bpm, config).then_some(bpm)
}

pub fn estimate_key(buffer: &AudioBuffer, config: &TempoConfig) -> KeyEstimate {
    if let Some(estimate) = chroma_key(buffer) {
        log::info!("Key {} (chroma, r={:.3})", estimate.label(), estimate.confidence);
        return estimate;
    }
    log::warn!("Chroma key estimate unavailable, using default key {}", config.default_key);
    KeyEstimate::fallback(config)
}

/// Krumhansl-Schmuckler key finding over an FFT chroma histogram.
fn chroma_key(buffer: &AudioBuffer) -> Option<KeyEstimate> {
    let chroma = chroma_histogram(&buffer.samples, buffer.sample_rate)?;

    let mut best_root = 0usize;
    let mut best_mode = KeyMode::Major;
    let mut best_corr = -1.0f64;

    for root in 0..12 {
        let mut rotated = [0.0; 12];
        for (i, slot) in rotated.iter_mut().enumerate() {
            *slot = chroma[(i + root) % 12];
        }

        let major_corr = pearson(&rotated, &MAJOR_PROFILE);
        if major_corr > best_corr {
            best_corr = major_corr;
            best_root = root;
            best_mode = KeyMode::Major;
        }

        let minor_corr = pearson(&rotated, &MINOR_PROFILE);
        if minor_corr > best_corr {
            best_corr = minor_corr;
            best_root = root;
            best_mode = KeyMode::Minor;
        }
    }

    if best_corr < MIN_KEY_CORRELATION {
        return None;
    }

    Some(KeyEstimate {
        root: NOTE_NAMES[best_root].to_string(),
        mode: best_mode,
        confidence: best_corr,
        method: EstimationMethod::Chroma,
    })
}

fn chroma_histogram(samples: &[f32], sample_rate: u32) -> Option<[f64; 12]> {
    if samples.len() < CHROMA_FFT_SIZE || sample_rate == 0 {
        return None;
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(CHROMA_FFT_SIZE);
    let freq_resolution = sample_rate as f32 / CHROMA_FFT_SIZE as f32;
    let window: Vec<f32> = (0..CHROMA_FFT_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (CHROMA_FFT_SIZE - 1) as f32).cos()))
        .collect();

    // Pitch class of every bin inside the analysed band
    let bin_classes: Vec<Option<usize>> = (0..CHROMA_FFT_SIZE / 2)
        .map(|bin| {
            let freq = bin as f32 * freq_resolution;
            if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&freq) {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect();

    let mut histogram = [0.0f64; 12];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); CHROMA_FFT_SIZE];
    let mut pos = 0;
    while pos + CHROMA_FFT_SIZE <= samples.len() {
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[pos + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (bin, class) in bin_classes.iter().enumerate() {
            if let Some(pc) = class {
                histogram[*pc] += buffer[bin].norm_sqr() as f64;
            }
        }
        pos += CHROMA_HOP_SIZE;
    }

    let total: f64 = histogram.iter().sum();
    if total <= 1e-9 {
        return None;
    }
    for h in &mut histogram {
        *h /= total;
    }
    Some(histogram)
}

fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;
    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}
