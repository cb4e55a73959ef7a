//! Scoring and ranking of candidate embeddings against a query embedding.
//!
//! Every candidate is scored as `100 * dot(query, candidate)` (see
//! [`Similarity`] for the cosine alternative), then candidates are ordered by
//! descending score. The sort is stable: on an exact tie, the candidate that
//! appeared first in the input keeps the better rank.

use std::cmp::Ordering;

use rayon::prelude::*;

pub mod score;

pub use score::{SCORE_SCALE, Similarity};

/// A candidate vector whose length differs from the query's.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "dimension mismatch for candidate {id:?}: query has dim {expected}, candidate has dim {actual}"
)]
pub struct DimensionMismatch {
    /// Identifier of the offending candidate.
    pub id: String,
    /// Dimensionality of the query.
    pub expected: usize,
    /// Dimensionality of the candidate.
    pub actual: usize,
}

/// Result of [`Ranker::rank_skipping`]: the ranking over all well-formed
/// candidates plus every candidate that was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub results: Vec<cliclip_core::RankedResult>,
    pub skipped: Vec<DimensionMismatch>,
}

/// Stateless ranker. Holds only the similarity mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ranker {
    similarity: Similarity,
}

impl Ranker {
    #[must_use]
    pub fn new(similarity: Similarity) -> Self {
        Self { similarity }
    }

    #[must_use]
    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    /// Rank `candidates` against `query` and keep the best `top_n`.
    ///
    /// Fails on the first candidate whose dimensionality differs from the
    /// query's. All candidates are checked before anything is scored, so a
    /// mismatch never yields a partial result.
    pub fn rank(
        &self,
        query: &cliclip_core::Embedding,
        candidates: &[cliclip_core::Candidate],
        top_n: usize,
    ) -> Result<Vec<cliclip_core::RankedResult>, DimensionMismatch> {
        if let Some(mismatch) = candidates.iter().find_map(|c| check_dim(query, c)) {
            return Err(mismatch);
        }

        let candidates: Vec<_> = candidates.iter().collect();
        Ok(self.rank_checked(query, &candidates, top_n))
    }

    /// Rank like [`Ranker::rank`], but exclude mismatched candidates instead
    /// of failing. Excluded candidates are reported in [`Ranking::skipped`]
    /// in input order.
    #[must_use]
    pub fn rank_skipping(
        &self,
        query: &cliclip_core::Embedding,
        candidates: &[cliclip_core::Candidate],
        top_n: usize,
    ) -> Ranking {
        let mut valid = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();

        for candidate in candidates {
            match check_dim(query, candidate) {
                Some(mismatch) => skipped.push(mismatch),
                None => valid.push(candidate),
            }
        }

        Ranking {
            results: self.rank_checked(query, &valid, top_n),
            skipped,
        }
    }

    fn rank_checked(
        &self,
        query: &cliclip_core::Embedding,
        candidates: &[&cliclip_core::Candidate],
        top_n: usize,
    ) -> Vec<cliclip_core::RankedResult> {
        if top_n == 0 || candidates.is_empty() {
            return Vec::new();
        }

        // Indexed parallel collect keeps input order.
        let mut scored: Vec<(&cliclip_core::Candidate, f32)> = candidates
            .par_iter()
            .map(|&candidate| {
                let score = score::score(
                    query.as_slice(),
                    candidate.embedding.as_slice(),
                    self.similarity,
                );
                (candidate, score)
            })
            .collect();

        // `sort_by` is stable, which is what breaks ties by input order.
        scored.sort_by(|a, b| descending(a.1, b.1));

        scored
            .into_iter()
            .take(top_n)
            .enumerate()
            .map(|(i, (candidate, score))| cliclip_core::RankedResult {
                rank: i + 1,
                id: candidate.id.clone(),
                score,
            })
            .collect()
    }
}

/// Rank with the default scaled dot-product similarity.
pub fn rank(
    query: &cliclip_core::Embedding,
    candidates: &[cliclip_core::Candidate],
    top_n: usize,
) -> Result<Vec<cliclip_core::RankedResult>, DimensionMismatch> {
    Ranker::default().rank(query, candidates, top_n)
}

fn check_dim(
    query: &cliclip_core::Embedding,
    candidate: &cliclip_core::Candidate,
) -> Option<DimensionMismatch> {
    (candidate.embedding.dim() != query.dim()).then(|| DimensionMismatch {
        id: candidate.id.clone(),
        expected: query.dim(),
        actual: candidate.embedding.dim(),
    })
}

/// Descending order on scores. NaN sorts after every number and `0.0 == -0.0`.
fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
