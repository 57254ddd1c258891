use crate::error::RagError;
use crate::models::{Answer, SearchHit, SearchQuery};
use crate::prompt::PromptTemplate;
use crate::retriever::Retriever;
use crate::traits::{Embedder, Generator, VectorIndex};
use tracing::debug;

/// Query-phase context: owns the loaded index and both API clients.
pub struct RagCoordinator<E, I, G> {
    retriever: Retriever<E, I>,
    generator: G,
    template: PromptTemplate,
}

impl<E, I, G> RagCoordinator<E, I, G>
where
    E: Embedder + Send + Sync,
    I: VectorIndex,
    G: Generator + Send + Sync,
{
    pub fn new(embedder: E, index: I, generator: G, top_k: usize) -> Self {
        Self {
            retriever: Retriever::new(embedder, index, top_k),
            generator,
            template: PromptTemplate::default(),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn index(&self) -> &I {
        self.retriever.index()
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, RagError> {
        self.retriever.search(query).await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, RagError> {
        let hits = self.retriever.retrieve(question).await?;
        debug!(
            question = question.trim(),
            hits = hits.len(),
            top_k = self.retriever.top_k(),
            "retrieved context"
        );

        let prompt = self.template.render(question, &hits);
        let text = self.generator.generate(&prompt).await?;

        Ok(Answer {
            question: question.trim().to_string(),
            text,
            sources: hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ApiError;
    use crate::index::FlatIndex;
    use crate::models::{DistanceMetric, DocumentChunk, DocumentFingerprint};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn model(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
            self.prompts
                .lock()
                .expect("prompt log poisoned")
                .push(prompt.to_string());
            Ok("The ogres first marched in the Third Age.".to_string())
        }
    }

    fn index(embedder: &CharacterNgramEmbedder, texts: &[&str]) -> FlatIndex {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(index, text)| DocumentChunk {
                chunk_id: format!("chunk-{index}"),
                document_id: "lore".to_string(),
                source_path: "eldoria.pdf".to_string(),
                page_start: 1,
                page_end: 1,
                chunk_index: index as u64,
                text: text.to_string(),
            })
            .collect();
        let vectors = texts.iter().map(|text| embedder.embed(text)).collect();
        FlatIndex::build(
            DocumentFingerprint {
                document_id: "lore".to_string(),
                document_title: "eldoria.pdf".to_string(),
                source_path: "eldoria.pdf".to_string(),
                checksum: "sum".to_string(),
                ingested_at: chrono::Utc::now(),
            },
            "local-char-trigram",
            DistanceMetric::Euclidean,
            chunks,
            vectors,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ask_grounds_the_prompt_in_retrieved_chunks() {
        let embedder = CharacterNgramEmbedder::default();
        let index = index(
            &embedder,
            &[
                "Harvest festivals are held in the river towns each autumn.",
                "The ogres first marched on Eldoria in the Third Age.",
            ],
        );
        let coordinator = RagCoordinator::new(embedder, index, RecordingGenerator::default(), 1);

        let answer = coordinator.ask("When did the ogres first march?").await.unwrap();

        assert!(answer.text.contains("Third Age"));
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.sources[0].chunk.text.contains("ogres"));

        let prompts = coordinator.generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("The ogres first marched on Eldoria in the Third Age."));
        assert!(!prompts[0].contains("Harvest festivals"));
    }

    #[tokio::test]
    async fn empty_question_never_reaches_the_generator() {
        let embedder = CharacterNgramEmbedder::default();
        let coordinator = RagCoordinator::new(
            embedder,
            index(&embedder, &["anything"]),
            RecordingGenerator::default(),
            3,
        );

        assert!(matches!(coordinator.ask("  ").await, Err(RagError::Request(_))));
        assert!(coordinator.generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_template_is_used() {
        let embedder = CharacterNgramEmbedder::default();
        let coordinator = RagCoordinator::new(
            embedder,
            index(&embedder, &["Eldoria lies north of the sea."]),
            RecordingGenerator::default(),
            1,
        )
        .with_template(PromptTemplate::new("CTX={context} Q={question}").unwrap());

        coordinator.ask("Where is Eldoria?").await.unwrap();

        let prompts = coordinator.generator.prompts.lock().unwrap();
        assert_eq!(prompts[0], "CTX=Eldoria lies north of the sea. Q=Where is Eldoria?");
    }
}
