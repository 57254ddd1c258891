use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub document_title: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub page_start: u32,
    pub page_end: u32,
    pub chunk_index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

/// A stored chunk returned for a query, ranked from 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub rank: usize,
    pub distance: f32,
    pub chunk: DocumentChunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub sources: Vec<SearchHit>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared L2 distance.
    #[default]
    Euclidean,
    /// Negated dot product, so a larger product ranks first.
    InnerProduct,
}

impl DistanceMetric {
    pub fn distance(self, left: &[f32], right: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => left
                .iter()
                .zip(right)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            DistanceMetric::InnerProduct => -left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub metric: DistanceMetric,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 500,
            chunk_overlap_chars: 50,
            metric: DistanceMetric::Euclidean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DistanceMetric;

    #[test]
    fn euclidean_is_zero_for_identical_vectors() {
        let vector = [0.5, 0.25, 1.0];
        assert_eq!(DistanceMetric::Euclidean.distance(&vector, &vector), 0.0);
        assert_eq!(DistanceMetric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
    }

    #[test]
    fn inner_product_prefers_aligned_vectors() {
        let query = [1.0, 0.0];
        let aligned = DistanceMetric::InnerProduct.distance(&query, &[1.0, 0.0]);
        let orthogonal = DistanceMetric::InnerProduct.distance(&query, &[0.0, 1.0]);
        assert!(aligned < orthogonal);
    }
}
