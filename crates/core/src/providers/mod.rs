pub mod gemini;

pub use gemini::{
    GeminiClient, GeminiEmbedder, GeminiGenerator, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_GENERATION_MODEL, DEFAULT_TEMPERATURE, GEMINI_API_BASE,
};

use crate::embeddings::CharacterNgramEmbedder;
use crate::error::ApiError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub fn http_client(timeout: Duration) -> Result<Client, ApiError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pdf-rag/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Embedder chosen at startup: the hosted model or the offline trigram hasher.
#[derive(Debug, Clone)]
pub enum EmbeddingProvider {
    Gemini(GeminiEmbedder),
    Local(CharacterNgramEmbedder),
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn model(&self) -> &str {
        match self {
            EmbeddingProvider::Gemini(embedder) => embedder.model(),
            EmbeddingProvider::Local(embedder) => embedder.model(),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        match self {
            EmbeddingProvider::Gemini(embedder) => embedder.embed_documents(texts).await,
            EmbeddingProvider::Local(embedder) => embedder.embed_documents(texts).await,
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        match self {
            EmbeddingProvider::Gemini(embedder) => embedder.embed_query(text).await,
            EmbeddingProvider::Local(embedder) => embedder.embed_query(text).await,
        }
    }
}
