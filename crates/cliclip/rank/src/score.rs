//! Similarity scoring between a query and a single candidate vector.

/// Fixed factor applied to every similarity, matching CLIP's logit scale.
pub const SCORE_SCALE: f32 = 100.0;

/// How a query and a candidate are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Similarity {
    /// Scaled raw inner product. Embeddings are not normalized first.
    #[default]
    Dot,
    /// Scaled cosine similarity; zero-length vectors score 0.0.
    Cosine,
}

/// Compute dot product between two vectors.
pub(crate) fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Score `candidate` against `query`. Both slices must have equal length.
pub fn score(query: &[f32], candidate: &[f32], similarity: Similarity) -> f32 {
    let dot = dot_product(query, candidate);
    match similarity {
        Similarity::Dot => SCORE_SCALE * dot,
        Similarity::Cosine => {
            let denom = norm(query) * norm(candidate);
            if denom > 0.0 {
                SCORE_SCALE * (dot / denom)
            } else {
                0.0
            }
        }
    }
}
