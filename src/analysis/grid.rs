use serde::Serialize;

use crate::error::AnalysisError;

/// Evenly spaced beat times implied by a tempo, starting at t=0.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BeatGrid {
    pub tempo_bpm: f64,
    pub beat_times: Vec<f64>,
}

impl BeatGrid {
    /// Beats at `i * 60/tempo` for every beat strictly before `duration_s`.
    /// A non-positive duration still yields the beat at 0.0.
    pub fn new(tempo_bpm: f64, duration_s: f64) -> Result<Self, AnalysisError> {
        if !tempo_bpm.is_finite() || tempo_bpm <= 0.0 {
            return Err(AnalysisError::InvalidTempo(tempo_bpm));
        }
        let interval = 60.0 / tempo_bpm;
        let duration = if duration_s.is_finite() { duration_s } else { 0.0 };

        let mut beat_times = vec![0.0];
        let mut i = 1usize;
        loop {
            let t = i as f64 * interval;
            if t >= duration {
                break;
            }
            beat_times.push(t);
            i += 1;
        }

        Ok(Self { tempo_bpm, beat_times })
    }

    pub fn interval(&self) -> f64 {
        60.0 / self.tempo_bpm
    }

    /// Index and time of the grid point closest to `time`, clamped to the grid.
    ///
    /// The grid stops at the last beat before the duration, so an onset in the
    /// final partial beat is measured against that last beat and may land
    /// outside the timing tolerance.
    pub fn nearest(&self, time: f64) -> Option<(usize, f64)> {
        let last = self.beat_times.len().checked_sub(1)?;
        let idx = (time / self.interval()).round().clamp(0.0, last as f64) as usize;
        Some((idx, self.beat_times[idx]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_is_exact_and_last_beat_before_duration() {
        for &(tempo, duration) in &[(120.0, 10.0), (97.3, 31.7), (60.0, 4.0), (200.0, 0.31), (143.0, 0.001)] {
            let grid = BeatGrid::new(tempo, duration).unwrap();
            let interval = 60.0 / tempo;
            assert_eq!(grid.beat_times[0], 0.0);
            for pair in grid.beat_times.windows(2) {
                assert!((pair[1] - pair[0] - interval).abs() < 1e-9);
            }
            assert!(*grid.beat_times.last().unwrap() < duration);
            // The next beat would fall at or past the end
            assert!(grid.beat_times.len() as f64 * interval >= duration);
        }
    }

    #[test]
    fn zero_duration_keeps_downbeat() {
        let grid = BeatGrid::new(120.0, 0.0).unwrap();
        assert_eq!(grid.beat_times, vec![0.0]);
    }

    #[test]
    fn rejects_bad_tempo() {
        assert!(matches!(BeatGrid::new(0.0, 4.0), Err(AnalysisError::InvalidTempo(_))));
        assert!(BeatGrid::new(-90.0, 4.0).is_err());
        assert!(BeatGrid::new(f64::NAN, 4.0).is_err());
    }

    #[test]
    fn nearest_rounds_and_clamps() {
        let grid = BeatGrid::new(120.0, 4.0).unwrap();
        assert_eq!(grid.nearest(0.74), Some((1, 0.5)));
        assert_eq!(grid.nearest(0.76), Some((2, 1.0)));
        assert_eq!(grid.nearest(-0.2), Some((0, 0.0)));
        assert_eq!(grid.nearest(9.0), Some((7, 3.5)));
    }

    #[test]
    fn final_partial_beat_clamps_to_last_beat() {
        let grid = BeatGrid::new(120.0, 4.0).unwrap();
        assert_eq!(grid.beat_times.last(), Some(&3.5));
        let (idx, beat) = grid.nearest(3.9).unwrap();
        assert_eq!((idx, beat), (7, 3.5));
        assert!((3.9 - beat) > 0.1);
    }
}
