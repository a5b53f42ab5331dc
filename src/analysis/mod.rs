pub mod bass;
pub mod features;
pub mod grid;
pub mod profile;
pub mod role;
pub mod stem;
pub mod timing;

pub use bass::{BassInteractionAnalyzer, BassReference};
pub use features::{
    BassInteraction, BassPattern, Role, RoleInfo, StemAnalysis, TimingSignature, TimingStats,
};
pub use grid::BeatGrid;
pub use profile::{
    CollectiveProfile, GrooveStyle, PlayingApproach, ProfileAggregator, SignaturePattern,
};
pub use role::{DrumType, RoleClassifier};
pub use stem::StemAnalyzer;
pub use timing::TimingAnalyzer;
