//! Post-hoc plausibility check over a finished report.
//!
//! Flags runs whose numbers look fabricated or hollow. It only labels; the
//! report itself is never altered.

use serde::Serialize;

use crate::analysis::StemAnalysis;
use crate::audio::DecodeOrigin;
use crate::pipeline::PerformanceReport;

const ROUND_VALUES: [f64; 3] = [0.25, 0.5, 0.75];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Authentic,
    Suspicious,
    Failed,
    Placeholder,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthenticityReport {
    pub verdict: Verdict,
    pub findings: Vec<String>,
}

pub fn validate(report: &PerformanceReport) -> AuthenticityReport {
    let mut findings = Vec::new();
    let verdict = classify(report, &mut findings);
    AuthenticityReport { verdict, findings }
}

fn classify(report: &PerformanceReport, findings: &mut Vec<String>) -> Verdict {
    let profile = &report.profile;
    let metrics = [
        ("kit_timing_cohesion", profile.kit_timing_cohesion),
        ("collective_groove_score", profile.collective_groove_score),
        ("bass_integration_score", profile.bass_integration_score),
        ("rhythmic_complexity_score", profile.rhythmic_complexity_score),
    ];

    if report.stems.iter().all(|s| s.onsets.is_empty()) {
        findings.push("no stem produced a single onset".to_string());
        return Verdict::Failed;
    }
    if metrics.iter().all(|&(_, v)| v == 0.0) {
        findings.push("every profile metric is zero".to_string());
        return Verdict::Failed;
    }

    if let Some(DecodeOrigin::Synthetic { .. }) = report.bass_origin {
        findings.push("bass track was a synthetic placeholder and was left out".to_string());
    }
    for stem in report.stems.iter().filter(|s| s.is_synthetic()) {
        findings.push(format!("{} was analysed from a synthetic placeholder", stem.drum_type));
    }
    let stems_with_onsets: Vec<&StemAnalysis> =
        report.stems.iter().filter(|s| !s.onsets.is_empty()).collect();
    for (i, a) in stems_with_onsets.iter().enumerate() {
        for b in &stems_with_onsets[i + 1..] {
            if metric_tuple(a) == metric_tuple(b) {
                findings.push(format!(
                    "{} and {} report identical metrics",
                    a.drum_type, b.drum_type
                ));
            }
        }
    }
    if !findings.is_empty() {
        return Verdict::Placeholder;
    }

    let round: Vec<&str> = metrics
        .iter()
        .filter(|&&(_, v)| ROUND_VALUES.contains(&v))
        .map(|&(name, _)| name)
        .collect();
    if round.len() >= 2 {
        findings.push(format!("metrics on round values: {}", round.join(", ")));
        return Verdict::Suspicious;
    }

    Verdict::Authentic
}

fn metric_tuple(stem: &StemAnalysis) -> [f64; 6] {
    [
        stem.timing.precision_score,
        stem.timing.tempo_stability,
        stem.bass.pocket_score,
        stem.role.complexity,
        stem.role.repetition_score,
        stem.role.syncopation_ratio,
    ]
}
