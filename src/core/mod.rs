pub mod candidates;
pub mod engine;
pub mod fingerprint;
pub mod index;
pub mod normalize;
pub mod ssim;

pub use candidates::CandidatePair;
pub use engine::{Decision, MatchEngine, MatchQuality, MatchRecord};
pub use fingerprint::{CorpusEntry, Fingerprint, PerceptualHasher};
pub use index::HashIndex;
pub use normalize::{FileLoader, ImageLoader};
pub use ssim::{ConvolvedSsim, SimilarityScorer, WindowedSsim};
