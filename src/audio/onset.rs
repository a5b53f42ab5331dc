use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;

use super::decode::AudioBuffer;
use crate::config::OnsetConfig;

/// A single detected strike.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OnsetEvent {
    /// Frame-center time in seconds
    pub time_s: f64,
    /// Local RMS normalized by the loudest onset in the buffer (0.0-1.0)
    pub velocity: f64,
}

/// Spectral-flux onset detector with adaptive threshold peak picking.
///
/// Holds a pre-planned FFT and window, so one detector can be shared across
/// threads and reused for every stem of a run.
pub struct OnsetDetector {
    config: OnsetConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl OnsetDetector {
    pub fn new(config: &OnsetConfig) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_size);
        Self {
            config: config.clone(),
            fft,
            window: hann_window(config.frame_size),
        }
    }

    pub fn config(&self) -> &OnsetConfig {
        &self.config
    }

    /// Frames per second of the flux curve for a given sample rate.
    pub fn frame_rate(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.config.hop_size as f64
    }

    /// Half-wave rectified spectral flux, one value per hop.
    ///
    /// Frame `i` is centered on sample `i * hop`; samples outside the buffer
    /// are treated as zero.
    pub fn flux_curve(&self, buffer: &AudioBuffer) -> Vec<f64> {
        let samples = &buffer.samples;
        if samples.is_empty() {
            return Vec::new();
        }

        let frame = self.config.frame_size;
        let hop = self.config.hop_size;
        let half = frame / 2;
        let n_frames = samples.len() / hop + 1;

        let mut prev_magnitudes = vec![0.0f32; half];
        let mut fft_input = vec![Complex::new(0.0f32, 0.0); frame];
        let mut flux = Vec::with_capacity(n_frames);

        for i in 0..n_frames {
            let center = i * hop;
            for (j, slot) in fft_input.iter_mut().enumerate() {
                let idx = (center + j).checked_sub(half);
                let s = idx.and_then(|k| samples.get(k)).copied().unwrap_or(0.0);
                *slot = Complex::new(s * self.window[j], 0.0);
            }
            self.fft.process(&mut fft_input);

            let mut value = 0.0f64;
            for (bin, prev) in fft_input[..half].iter().zip(prev_magnitudes.iter_mut()) {
                let mag = bin.norm();
                value += (mag - *prev).max(0.0) as f64;
                *prev = mag;
            }
            flux.push(value);
        }

        flux
    }

    /// Smoothed flux curve, used both for peak picking and tempo estimation.
    pub fn onset_strength_envelope(&self, buffer: &AudioBuffer) -> Vec<f64> {
        moving_average(&self.flux_curve(buffer), self.config.smoothing_frames)
    }

    pub fn detect(&self, buffer: &AudioBuffer) -> Vec<OnsetEvent> {
        if buffer.is_empty() || buffer.sample_rate == 0 {
            return Vec::new();
        }
        if buffer.peak_amplitude() < self.config.silence_floor {
            log::debug!("Buffer below silence floor, no onsets");
            return Vec::new();
        }

        let curve = self.onset_strength_envelope(buffer);
        let (mean, std) = mean_std(&curve);
        let threshold = mean + self.config.threshold_k * std;

        let mut candidates: Vec<usize> = (0..curve.len())
            .filter(|&i| {
                let v = curve[i];
                v > threshold
                    && (i == 0 || v > curve[i - 1])
                    && (i + 1 == curve.len() || v >= curve[i + 1])
            })
            .collect();

        // Strongest first; ties resolved by earlier frame
        candidates.sort_by(|&a, &b| curve[b].total_cmp(&curve[a]).then(a.cmp(&b)));

        let hop_s = self.config.hop_size as f64 / buffer.sample_rate as f64;
        let min_sep = self.config.min_separation_s;
        let mut accepted: Vec<f64> = Vec::new();
        for idx in candidates {
            let time = idx as f64 * hop_s;
            let pos = accepted.partition_point(|&t| t < time);
            let clear_before = pos == 0 || time - accepted[pos - 1] >= min_sep;
            let clear_after = pos == accepted.len() || accepted[pos] - time >= min_sep;
            if clear_before && clear_after {
                accepted.insert(pos, time);
            }
        }

        let energies: Vec<f64> = accepted
            .iter()
            .map(|&t| local_rms(buffer, t, self.config.velocity_window_s))
            .collect();
        let max_energy = energies.iter().copied().fold(0.0f64, f64::max);

        let onsets: Vec<OnsetEvent> = accepted
            .into_iter()
            .zip(energies)
            .map(|(time_s, energy)| OnsetEvent {
                time_s,
                velocity: if max_energy > 0.0 {
                    (energy / max_energy).clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
            .collect();

        log::debug!(
            "Onsets: {} (threshold={:.4}, mean={:.4}, std={:.4})",
            onsets.len(),
            threshold,
            mean,
            std
        );

        onsets
    }
}

fn local_rms(buffer: &AudioBuffer, time: f64, window_s: f64) -> f64 {
    let sr = buffer.sample_rate as f64;
    let half = (window_s * sr / 2.0).max(1.0) as usize;
    let center = (time * sr) as usize;
    let start = center.saturating_sub(half).min(buffer.samples.len());
    let end = (center + half).min(buffer.samples.len());
    let slice = &buffer.samples[start..end];
    if slice.is_empty() {
        return 0.0;
    }
    (slice.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / slice.len() as f64).sqrt()
}

pub(crate) fn moving_average(values: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let before = (width - 1) / 2;
    let after = width - 1 - before;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(values.len());
            values[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
