use crate::error::ApiError;
use crate::traits::Embedder;
use async_trait::async_trait;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

pub const LOCAL_EMBEDDING_MODEL: &str = "local-char-trigram";

/// Offline embedder: hashed character trigrams, L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl CharacterNgramEmbedder {
    /// Runs of whitespace count as a single space and the text is padded so that
    /// word boundaries at either end contribute trigrams too.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];

        let folded: Vec<char> = std::iter::once(' ')
            .chain(text.split_whitespace().flat_map(|word| {
                word.chars()
                    .flat_map(char::to_lowercase)
                    .chain(std::iter::once(' '))
            }))
            .collect();
        if folded.len() < 3 {
            return vector;
        }

        for trigram in folded.windows(3) {
            vector[(fnv1a(trigram) % buckets as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut utf8 = [0u8; 4];
    chars.iter().fold(FNV_OFFSET, |hash, ch| {
        ch.encode_utf8(&mut utf8)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    })
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::{CharacterNgramEmbedder, Embedder};

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("The ogres first marched on Eldoria");
        let second = embedder.embed("The ogres first marched on Eldoria");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn case_and_spacing_do_not_change_the_vector() {
        let embedder = CharacterNgramEmbedder::default();
        assert_eq!(
            embedder.embed("Third   Age\n"),
            embedder.embed("third age")
        );
    }

    #[test]
    fn blank_text_embeds_to_zero_vector() {
        let embedder = CharacterNgramEmbedder { dimensions: 8 };
        assert_eq!(embedder.embed("  \n "), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn document_batch_preserves_input_order() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["dragons".to_string(), "ogres".to_string()];

        let vectors = embedder.embed_documents(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed("dragons"));
        assert_eq!(vectors[1], embedder.embed_query("ogres").await.unwrap());
    }
}
