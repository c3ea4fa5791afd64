//! Two-stage matching: Hamming shortlist, then SSIM confirmation.

use crate::config::MatchConfig;
use crate::core::candidates::CandidatePair;
use crate::core::fingerprint::{CorpusEntry, Fingerprint};
use crate::core::index::HashIndex;
use crate::core::normalize::{FileLoader, ImageLoader};
use crate::core::ssim::{SimilarityScorer, scorer_for};
use crate::error::ConfigError;
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Confidence band attached to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    /// Scored and at or above the SSIM threshold.
    Confirmed,
    /// Scored but below the SSIM threshold.
    Weak,
    /// Nearest by Hamming distance only.
    Unconfirmed,
    None,
}

/// Terminal output for one query. Never updated once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub query_id: String,
    pub query_path: PathBuf,
    pub reference_id: Option<String>,
    pub reference_path: Option<PathBuf>,
    pub hamming_distance: Option<u32>,
    pub similarity: Option<f64>,
    pub used_similarity: bool,
    pub quality: MatchQuality,
}

/// Outcome of folding one query's shortlist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    NoMatch,
    /// First candidate at or above the threshold, kept only while nothing was scored.
    Fallback { reference: usize, distance: u32 },
    /// Highest-scoring candidate below the threshold.
    Scored {
        reference: usize,
        distance: u32,
        similarity: f64,
    },
}

/// Fold a shortlist into a decision.
///
/// Candidates strictly below `threshold` are handed to `score`; `None` means
/// the pair could not be scored and the candidate is skipped. A scored
/// candidate replaces the current best only with a strictly greater score, so
/// ties go to the earliest one. Candidates at or above the threshold become
/// the answer only if nothing has been accepted yet, and any later scored
/// candidate displaces them.
pub fn decide<F>(candidates: &[CandidatePair], threshold: u32, mut score: F) -> Decision
where
    F: FnMut(&CandidatePair) -> Option<f64>,
{
    candidates.iter().fold(Decision::NoMatch, |state, cand| {
        if cand.distance < threshold {
            let Some(similarity) = score(cand) else {
                return state;
            };
            match state {
                Decision::Scored { similarity: best, .. } if best >= similarity => state,
                _ => Decision::Scored {
                    reference: cand.reference,
                    distance: cand.distance,
                    similarity,
                },
            }
        } else {
            match state {
                Decision::NoMatch => Decision::Fallback {
                    reference: cand.reference,
                    distance: cand.distance,
                },
                kept => kept,
            }
        }
    })
}

pub struct MatchEngine {
    config: MatchConfig,
    index: HashIndex,
    scorer: Box<dyn SimilarityScorer>,
    loader: Box<dyn ImageLoader>,
}

impl MatchEngine {
    /// Validate `config` against `index` and pick the configured scorer.
    pub fn new(config: MatchConfig, index: HashIndex) -> Result<Self, ConfigError> {
        config.validate()?;
        if index.bit_width() != config.bit_width {
            return Err(ConfigError::BitWidthMismatch {
                expected: config.bit_width,
                found: index.bit_width(),
                id: "reference index".to_string(),
            });
        }
        let scorer = scorer_for(config.device_mode);
        tracing::info!(
            references = index.len(),
            scorer = scorer.name(),
            top_k = config.top_k,
            hamming_threshold = config.hamming_threshold,
            "match engine ready"
        );
        Ok(Self {
            config,
            index,
            scorer,
            loader: Box::new(FileLoader),
        })
    }

    pub fn with_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_scorer(mut self, scorer: impl SimilarityScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    fn check_queries(&self, queries: &[CorpusEntry]) -> Result<(), ConfigError> {
        let expected = self.index.bit_width();
        match queries
            .iter()
            .find(|q| q.fingerprint.bit_width() != expected)
        {
            Some(q) => Err(ConfigError::BitWidthMismatch {
                expected,
                found: q.fingerprint.bit_width(),
                id: q.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Match a single query.
    pub fn match_query(&self, query: &CorpusEntry) -> Result<MatchRecord, ConfigError> {
        let candidates = self.index.query_top_k(&query.fingerprint, self.config.top_k)?;
        Ok(self.resolve(query, &candidates))
    }

    /// Match every query, one record per query in input order.
    pub fn run(&self, queries: &[CorpusEntry]) -> Result<Vec<MatchRecord>, ConfigError> {
        self.run_with_progress(queries, |_| {})
    }

    /// Like [`MatchEngine::run`], reporting the size of each finished batch.
    pub fn run_with_progress<P>(
        &self,
        queries: &[CorpusEntry],
        progress: P,
    ) -> Result<Vec<MatchRecord>, ConfigError>
    where
        P: Fn(usize),
    {
        self.check_queries(queries)?;

        let batch_size = self.config.batch_size;
        let mut records = Vec::with_capacity(queries.len());
        for (n, batch) in queries.chunks(batch_size).enumerate() {
            let fingerprints: Vec<&Fingerprint> = batch.iter().map(|q| &q.fingerprint).collect();
            let shortlists = self
                .index
                .query_batch(n * batch_size, &fingerprints, self.config.top_k)?;

            let decided: Vec<MatchRecord> = batch
                .par_iter()
                .zip(shortlists.par_iter())
                .map(|(query, candidates)| self.resolve(query, candidates))
                .collect();

            tracing::debug!(batch = n, size = batch.len(), "batch matched");
            records.extend(decided);
            progress(batch.len());
        }
        Ok(records)
    }

    fn resolve(&self, query: &CorpusEntry, candidates: &[CandidatePair]) -> MatchRecord {
        let mut query_image: Option<GrayImage> = None;
        let mut query_unavailable = false;

        let decision = decide(candidates, self.config.hamming_threshold, |cand| {
            if query_unavailable {
                return None;
            }
            if query_image.is_none() {
                match self.loader.load(&query.path) {
                    Ok(img) => query_image = Some(img),
                    Err(e) => {
                        tracing::warn!(query = %query.id, "query image unavailable: {e}");
                        query_unavailable = true;
                        return None;
                    }
                }
            }

            let reference = self.index.entry(cand.reference);
            match self.loader.load(&reference.path) {
                Ok(ref_img) => {
                    let similarity = self.scorer.score(&ref_img, query_image.as_ref()?);
                    tracing::trace!(
                        query = %query.id,
                        reference = %reference.id,
                        distance = cand.distance,
                        similarity,
                        "scored candidate"
                    );
                    Some(similarity)
                }
                Err(e) => {
                    tracing::warn!(reference = %reference.id, "skipping candidate: {e}");
                    None
                }
            }
        });

        let decision = if query_unavailable {
            Decision::NoMatch
        } else {
            decision
        };
        self.record(query, decision)
    }

    fn record(&self, query: &CorpusEntry, decision: Decision) -> MatchRecord {
        let mut record = MatchRecord {
            query_id: query.id.clone(),
            query_path: query.path.clone(),
            reference_id: None,
            reference_path: None,
            hamming_distance: None,
            similarity: None,
            used_similarity: false,
            quality: MatchQuality::None,
        };

        let (reference, distance) = match decision {
            Decision::NoMatch => return record,
            Decision::Fallback {
                reference,
                distance,
            } => {
                record.quality = MatchQuality::Unconfirmed;
                (reference, distance)
            }
            Decision::Scored {
                reference,
                distance,
                similarity,
            } => {
                record.similarity = Some(similarity);
                record.used_similarity = true;
                record.quality = if similarity >= self.config.ssim_threshold {
                    MatchQuality::Confirmed
                } else {
                    MatchQuality::Weak
                };
                (reference, distance)
            }
        };

        let entry = self.index.entry(reference);
        record.reference_id = Some(entry.id.clone());
        record.reference_path = Some(entry.path.clone());
        record.hamming_distance = Some(distance);
        record
    }
}
