//! # Embedding Module
//!
//! Provides the [`EmbeddingModel`] trait that abstracts over different
//! embedding providers, so the reflective memory core can swap providers
//! without touching retrieval or reranking logic.
//!
//! ```rust
//! use rmm_core::EmbeddingModel;
//!
//! async fn example<T: EmbeddingModel>(model: &T) -> rmm_core::Result<()> {
//!     let dim = model.dim();
//!     let embedding = model.embed("Hello, world!").await?;
//!     assert_eq!(embedding.len(), dim);
//!     Ok(())
//! }
//! ```

use alloc::vec::Vec;
use core::future::Future;

/// A dense embedding vector of 32-bit floats.
pub type Embedding = Vec<f32>;

/// Converts text to vector representations.
///
/// # Implementation Requirements
///
/// - [`embed`](EmbeddingModel::embed) must return vectors with length equal
///   to [`dim`](EmbeddingModel::dim).
/// - Implementations should handle provider errors (network issues, rate
///   limits) by returning `Err` rather than panicking; the memory core
///   treats embedding failure as a degrade-and-continue condition, not a
///   crash.
pub trait EmbeddingModel: Send + Sync {
    /// Returns the embedding vector dimension `d`.
    fn dim(&self) -> usize;

    /// Converts text to an embedding vector of length [`Self::dim`].
    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Vec<f32>>> + Send;

    /// Converts a batch of texts to embedding vectors, one per input.
    ///
    /// The default implementation embeds sequentially; providers with a
    /// native batch endpoint should override this for efficiency.
    fn embed_many(
        &self,
        texts: &[&str],
    ) -> impl Future<Output = crate::Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }
}
