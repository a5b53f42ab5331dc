//! Drum-stem performance analysis.
//!
//! Each stem of a separated drum recording is decoded, its onsets detected
//! and measured against a shared beat grid and an optional bass line, then the
//! per-stem results are folded into a [`CollectiveProfile`](analysis::CollectiveProfile)
//! describing how the kit plays together.

pub mod analysis;
pub mod audio;
pub mod authenticity;
pub mod config;
pub mod error;
pub mod pipeline;

pub use config::Config;
pub use error::{AnalysisError, Result};
pub use pipeline::{
    analyze_performance, analyze_performance_with_progress, PerformanceReport, PerformanceRequest,
};
