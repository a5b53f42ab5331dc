use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a single stem or a whole analysis run.
///
/// Anything not listed here degrades instead of failing: decoder rungs fall
/// through to the next strategy, and missing data surfaces as an explicit
/// neutral value on the record.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("audio file is empty: {}", .0.display())]
    EmptyFile(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {} exceeded {seconds:.1}s", path.display())]
    DecodeTimeout { path: PathBuf, seconds: f64 },
    #[error("no usable stems were available for this performance")]
    NoStemsAvailable,
    #[error("stem label '{0}' was given more than once")]
    DuplicateStem(String),
    #[error("invalid tempo: {0} BPM")]
    InvalidTempo(f64),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
