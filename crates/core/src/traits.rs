use crate::error::{ApiError, IndexError};
use crate::SearchHit;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder {
    /// Model identifier recorded in the index manifest.
    fn model(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

#[async_trait]
pub trait Generator {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ApiError>;
}

pub trait VectorIndex {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    fn embedding_model(&self) -> &str;

    fn search_vector(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError>;
}
