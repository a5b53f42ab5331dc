use super::features::{TimingSignature, TimingStats};
use super::grid::BeatGrid;
use crate::audio::OnsetEvent;
use crate::config::TimingConfig;

/// Grid subdivisions per beat used when judging inter-onset intervals.
const STABILITY_SUBDIVISIONS: f64 = 4.0;

pub struct TimingAnalyzer {
    config: TimingConfig,
}

impl TimingAnalyzer {
    pub fn new(config: &TimingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn analyze(&self, onsets: &[OnsetEvent], grid: &BeatGrid) -> TimingStats {
        if onsets.is_empty() {
            return TimingStats::empty();
        }

        let mut stats = TimingStats::empty();
        let mut abs_sum = 0.0;
        let mut signed_sum = 0.0;

        for onset in onsets {
            let Some((idx, grid_time)) = grid.nearest(onset.time_s) else {
                continue;
            };
            let deviation = grid_time - onset.time_s;
            abs_sum += deviation.abs();
            signed_sum += deviation;
            stats.micro_deviations_ms.push(deviation * 1000.0);

            if deviation.abs() <= self.config.tolerance_s {
                // Beats 1 and 3 of a 4/4 bar are the strong beats
                if idx % 4 == 0 || idx % 4 == 2 {
                    stats.on_beat_count += 1;
                } else {
                    stats.off_beat_count += 1;
                }
            } else {
                stats.syncopated_count += 1;
            }
        }

        let n = stats.micro_deviations_ms.len();
        if n == 0 {
            return TimingStats::empty();
        }
        let mean_abs = abs_sum / n as f64;
        let mean_signed = signed_sum / n as f64;

        stats.precision_score = 1.0 / (1.0 + mean_abs);
        stats.mean_deviation_ms = mean_signed * 1000.0;
        stats.tempo_stability = tempo_stability(onsets, grid.interval());
        stats.timing_signature = if stats.on_beat_ratio() > self.config.on_beat_ratio {
            TimingSignature::On
        } else if mean_signed > 0.0 {
            TimingSignature::Ahead
        } else {
            TimingSignature::Behind
        };

        log::debug!(
            "Timing: on={} off={} sync={} precision={:.4} signature={:?}",
            stats.on_beat_count,
            stats.off_beat_count,
            stats.syncopated_count,
            stats.precision_score,
            stats.timing_signature
        );

        stats
    }
}

/// Inverse mean distance of each inter-onset interval from the nearest
/// sixteenth-note multiple of the beat interval.
fn tempo_stability(onsets: &[OnsetEvent], beat_interval: f64) -> f64 {
    if onsets.len() < 2 || beat_interval <= 0.0 {
        return 0.0;
    }
    let unit = beat_interval / STABILITY_SUBDIVISIONS;
    let deviations: Vec<f64> = onsets
        .windows(2)
        .map(|w| {
            let interval = w[1].time_s - w[0].time_s;
            let multiple = (interval / unit).round().max(1.0);
            (interval - multiple * unit).abs()
        })
        .collect();
    let mean = deviations.iter().sum::<f64>() / deviations.len() as f64;
    1.0 / (1.0 + mean)
}
