//! Core types and traits for cliclip.

/// An embedding vector produced by an [`EmbeddingProvider`].
///
/// Vectors are only comparable when they come from the same model checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from raw values.
    #[must_use]
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// The dimensionality of this embedding.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean norm of the vector.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// An item being scored against a query, e.g. an image file.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Opaque identifier (usually a file path). Not required to be unique.
    pub id: String,
    pub embedding: Embedding,
}

impl Candidate {
    pub fn new(id: impl Into<String>, embedding: impl Into<Embedding>) -> Self {
        Self {
            id: id.into(),
            embedding: embedding.into(),
        }
    }
}

/// A ranked result with 1-based rank, identifier and score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    /// 1-based position in the ranking.
    pub rank: usize,
    /// The candidate identifier.
    pub id: String,
    /// The similarity score.
    pub score: f32,
}

/// Converts text and images into embeddings in a shared similarity space.
///
/// Providers are constructed explicitly by the caller and passed to whatever
/// needs embeddings; text and image vectors from one provider share the same
/// dimensionality.
pub trait EmbeddingProvider {
    /// Embed a text prompt.
    fn embed_text(&mut self, text: &str) -> eyre::Result<Embedding>;

    /// Embed a single decoded image.
    fn embed_image(&mut self, image: &image::DynamicImage) -> eyre::Result<Embedding>;

    /// Embed several images, returning one embedding per image in input order.
    fn embed_images(&mut self, images: &[image::DynamicImage]) -> eyre::Result<Vec<Embedding>> {
        images.iter().map(|image| self.embed_image(image)).collect()
    }
}
