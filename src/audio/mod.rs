pub mod decode;
pub mod onset;
pub mod tempo;

pub use decode::{AudioBuffer, DecodeOrigin, DecodedAudio};
pub use onset::{OnsetDetector, OnsetEvent};
