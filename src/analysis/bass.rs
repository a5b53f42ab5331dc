use super::features::{BassInteraction, BassPattern};
use crate::audio::{AudioBuffer, OnsetDetector, OnsetEvent};
use crate::config::BassConfig;

/// The bass track of a run: loaded and onset-detected once, then read by
/// every drum stem's analyzer.
#[derive(Clone, Debug)]
pub struct BassReference {
    pub buffer: AudioBuffer,
    pub onsets: Vec<OnsetEvent>,
}

impl BassReference {
    pub fn new(buffer: AudioBuffer, detector: &OnsetDetector) -> Self {
        let onsets = detector.detect(&buffer);
        log::info!("Bass reference: {} onsets over {:.1}s", onsets.len(), buffer.duration());
        Self { buffer, onsets }
    }

    pub fn from_parts(buffer: AudioBuffer, onsets: Vec<OnsetEvent>) -> Self {
        Self { buffer, onsets }
    }
}

pub struct BassInteractionAnalyzer {
    config: BassConfig,
}

impl BassInteractionAnalyzer {
    pub fn new(config: &BassConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn analyze(
        &self,
        drum: &AudioBuffer,
        bass: Option<&BassReference>,
        onsets: &[OnsetEvent],
    ) -> BassInteraction {
        let Some(bass) = bass else {
            return BassInteraction::no_bass();
        };

        let correlation = waveform_correlation(drum, &bass.buffer);
        let sync_events = count_sync_events(onsets, &bass.onsets, self.config.sync_window_s);
        let sync_percentage = if onsets.is_empty() {
            0.0
        } else {
            sync_events as f64 / onsets.len() as f64
        };
        let pocket_score = (correlation.abs() + sync_percentage) / 2.0;

        let pattern = if sync_percentage > self.config.synchronized_ratio {
            BassPattern::Synchronized
        } else if sync_percentage > self.config.complementary_ratio
            && pocket_score > self.config.complementary_pocket
        {
            BassPattern::Complementary
        } else if correlation.abs() < self.config.independent_correlation {
            BassPattern::Independent
        } else {
            BassPattern::Conflicting
        };

        BassInteraction {
            correlation,
            sync_events,
            sync_percentage,
            pocket_score,
            pattern,
        }
    }
}

/// Drum onsets with a bass onset within `window` seconds. Both sequences are
/// ascending, so each lookup is a binary search.
fn count_sync_events(drum: &[OnsetEvent], bass: &[OnsetEvent], window: f64) -> u32 {
    drum.iter()
        .filter(|onset| {
            let lo = onset.time_s - window;
            let idx = bass.partition_point(|b| b.time_s < lo);
            bass.get(idx).is_some_and(|b| b.time_s <= onset.time_s + window)
        })
        .count() as u32
}

/// Pearson correlation of two waveforms over their common duration.
/// Samples are paired by time when the rates differ.
pub fn waveform_correlation(a: &AudioBuffer, b: &AudioBuffer) -> f64 {
    if a.sample_rate == 0 || b.sample_rate == 0 {
        return 0.0;
    }
    let duration = a.duration().min(b.duration());
    let n = ((duration * a.sample_rate as f64) as usize).min(a.samples.len());
    if n < 2 {
        return 0.0;
    }

    let rate_ratio = b.sample_rate as f64 / a.sample_rate as f64;
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    let mut sum_aa = 0.0;
    let mut sum_bb = 0.0;
    let mut sum_ab = 0.0;
    let mut count = 0usize;

    for i in 0..n {
        let j = if a.sample_rate == b.sample_rate {
            i
        } else {
            (i as f64 * rate_ratio) as usize
        };
        let Some(&y) = b.samples.get(j) else { break };
        let x = a.samples[i] as f64;
        let y = y as f64;
        sum_a += x;
        sum_b += y;
        sum_aa += x * x;
        sum_bb += y * y;
        sum_ab += x * y;
        count += 1;
    }

    if count < 2 {
        return 0.0;
    }
    let n = count as f64;
    let cov = sum_ab - sum_a * sum_b / n;
    let var_a = sum_aa - sum_a * sum_a / n;
    let var_b = sum_bb - sum_b * sum_b / n;
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::onset::tests::burst_track;

    fn onsets_at(times: &[f64]) -> Vec<OnsetEvent> {
        times
            .iter()
            .map(|&time_s| OnsetEvent { time_s, velocity: 1.0 })
            .collect()
    }

    fn analyzer() -> BassInteractionAnalyzer {
        BassInteractionAnalyzer::new(&BassConfig::default())
    }

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> AudioBuffer {
        let len = (seconds * sample_rate as f32) as usize;
        AudioBuffer::new(
            (0..len)
                .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
                .collect(),
            sample_rate,
        )
    }

    #[test]
    fn missing_bass_is_exactly_no_bass() {
        let drum = burst_track(&[(0.1, 0.8), (0.6, 0.8)], 22050, 1.0);
        let onsets = onsets_at(&[0.1, 0.6]);
        let result = analyzer().analyze(&drum, None, &onsets);
        assert_eq!(result, BassInteraction::no_bass());
        assert_eq!(result.correlation, 0.0);
        assert_eq!(result.sync_events, 0);
        assert_eq!(result.sync_percentage, 0.0);
        assert_eq!(result.pocket_score, 0.0);
        assert_eq!(result.pattern, BassPattern::NoBass);

        let empty = analyzer().analyze(&AudioBuffer::new(Vec::new(), 44100), None, &[]);
        assert_eq!(empty, BassInteraction::no_bass());
    }

    #[test]
    fn identical_lines_are_synchronized() {
        let times = [0.0, 1.0, 2.0, 3.0];
        let hits: Vec<(f64, f32)> = times.iter().map(|&t| (t, 0.8)).collect();
        let drum = burst_track(&hits, 22050, 3.5);
        let bass = BassReference::from_parts(drum.clone(), onsets_at(&times));

        let result = analyzer().analyze(&drum, Some(&bass), &onsets_at(&times));
        assert_eq!(result.sync_events, 4);
        assert_eq!(result.sync_percentage, 1.0);
        assert!((result.correlation - 1.0).abs() < 1e-9);
        assert!((result.pocket_score - 1.0).abs() < 1e-9);
        assert_eq!(result.pattern, BassPattern::Synchronized);
    }

    #[test]
    fn sync_window_is_inclusive_of_nearby_hits() {
        let drum = onsets_at(&[0.0, 0.5, 1.0, 1.5]);
        let bass = onsets_at(&[0.04, 0.58, 1.2]);
        assert_eq!(count_sync_events(&drum, &bass, 0.05), 1);
        assert_eq!(count_sync_events(&drum, &bass, 0.1), 2);
        assert_eq!(count_sync_events(&drum, &[], 0.1), 0);
    }

    #[test]
    fn unrelated_signals_are_independent() {
        let drum = sine(100.0, 8000, 2.0);
        let bass_buffer = sine(1370.0, 8000, 2.0);
        let bass = BassReference::from_parts(bass_buffer, onsets_at(&[1.7]));
        let result = analyzer().analyze(&drum, Some(&bass), &onsets_at(&[0.2, 0.9]));
        assert!(result.correlation.abs() < 0.05, "corr {}", result.correlation);
        assert_eq!(result.sync_events, 0);
        assert_eq!(result.pattern, BassPattern::Independent);
    }

    #[test]
    fn inverted_waveform_conflicts() {
        let drum = sine(50.0, 8000, 1.0);
        let inverted = AudioBuffer::new(drum.samples.iter().map(|s| -s).collect(), 8000);
        let bass = BassReference::from_parts(inverted, onsets_at(&[0.9]));
        let result = analyzer().analyze(&drum, Some(&bass), &onsets_at(&[0.1, 0.4]));
        assert!((result.correlation + 1.0).abs() < 1e-6);
        assert!((result.pocket_score - 0.5).abs() < 1e-6);
        assert_eq!(result.pattern, BassPattern::Conflicting);
    }

    #[test]
    fn correlation_pairs_by_time_across_rates() {
        let a = sine(5.0, 8000, 1.0);
        let b = sine(5.0, 16000, 1.5);
        assert!(waveform_correlation(&a, &b) > 0.99);
        assert_eq!(waveform_correlation(&a, &AudioBuffer::new(vec![0.3; 8000], 8000)), 0.0);
    }
}
