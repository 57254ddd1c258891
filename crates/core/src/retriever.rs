use crate::error::RagError;
use crate::models::{SearchHit, SearchQuery};
use crate::traits::{Embedder, VectorIndex};

pub const DEFAULT_TOP_K: usize = 5;

pub struct Retriever<E, I> {
    embedder: E,
    index: I,
    top_k: usize,
}

impl<E, I> Retriever<E, I>
where
    E: Embedder + Send + Sync,
    I: VectorIndex,
{
    pub fn new(embedder: E, index: I, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub async fn retrieve(&self, text: &str) -> Result<Vec<SearchHit>, RagError> {
        self.search(&SearchQuery::new(text, self.top_k)).await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, RagError> {
        if query.text.trim().is_empty() {
            return Err(RagError::Request("query is empty".to_string()));
        }

        let query_vector = self.embedder.embed_query(query.text.trim()).await?;
        Ok(self.index.search_vector(&query_vector, query.top_k)?)
    }
}
