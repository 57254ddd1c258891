pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod retriever;
#[cfg(test)]
mod test_support;
pub mod traits;

pub use chat::{AnswerSource, ChatInput, ChatSession, ChatState, ChatSummary, ThreadedLineReader};
pub use chunking::{build_chunks, chunk_text, normalize_whitespace, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, LOCAL_EMBEDDING_MODEL};
pub use error::{ApiError, IndexError, IngestError, RagError};
pub use extractor::{
    DocumentLoader, DocumentText, LopdfExtractor, OcrEndpointConfig, PageText, PdfExtractor,
};
pub use index::{FlatIndex, IndexManifest};
pub use ingest::{ingest_document, BuildSummary, IndexBuilder, IngestionReport};
pub use models::{
    Answer, DistanceMetric, DocumentChunk, DocumentFingerprint, IngestionOptions, SearchHit,
    SearchQuery,
};
pub use orchestrator::RagCoordinator;
pub use prompt::PromptTemplate;
pub use providers::{http_client, EmbeddingProvider, GeminiClient, GeminiEmbedder, GeminiGenerator};
pub use retriever::{Retriever, DEFAULT_TOP_K};
pub use traits::{Embedder, Generator, VectorIndex};
