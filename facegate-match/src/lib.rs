pub mod descriptor;
pub mod liveness;
pub mod quality;
pub mod similarity;

// Re-export commonly used types
pub use descriptor::{DescriptorError, DescriptorRules};
pub use liveness::{LivenessAssessment, LivenessPolicy, LivenessSignals};
pub use quality::{QualitySignals, QualityWeights};
pub use similarity::{cosine_similarity, find_best_match, BestMatch};
