use crate::error::IndexError;
use crate::models::{DistanceMetric, DocumentChunk, DocumentFingerprint, SearchHit};
use crate::traits::VectorIndex;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const INDEX_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.json";
const DOCSTORE_FILE: &str = "docstore.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub format_version: u32,
    pub metric: DistanceMetric,
    pub dimensions: usize,
    pub embedding_model: String,
    pub entry_count: usize,
    pub document: DocumentFingerprint,
    pub built_at: DateTime<Utc>,
}

/// Exact nearest-neighbour index over every stored vector.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    manifest: IndexManifest,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<DocumentChunk>,
}

impl FlatIndex {
    pub fn build(
        document: DocumentFingerprint,
        embedding_model: &str,
        metric: DistanceMetric,
        chunks: Vec<DocumentChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: vectors.len(),
            });
        }

        let dimensions = vectors.first().map(Vec::len).ok_or(IndexError::Empty)?;
        if dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                actual: bad.len(),
            });
        }

        Ok(Self {
            manifest: IndexManifest {
                format_version: INDEX_FORMAT_VERSION,
                metric,
                dimensions,
                embedding_model: embedding_model.to_string(),
                entry_count: chunks.len(),
                document,
                built_at: Utc::now(),
            },
            vectors,
            chunks,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn ensure_embedding_model(&self, configured: &str) -> Result<(), IndexError> {
        if self.manifest.embedding_model != configured {
            return Err(IndexError::ModelMismatch {
                indexed: self.manifest.embedding_model.clone(),
                configured: configured.to_string(),
            });
        }
        Ok(())
    }

    /// Writes the index next to `dir` first and renames it into place, so `dir` holds either the
    /// previous index or the complete new one.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        let parent = match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_error(&parent))?;

        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| IndexError::Corrupt {
                path: dir.display().to_string(),
                details: "index directory has no name".to_string(),
            })?;
        let staging = parent.join(format!(".{name}.staging-{}", Uuid::new_v4()));

        if let Err(error) = self.write_files(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(error);
        }

        let previous = if dir.exists() {
            let backup = parent.join(format!(".{name}.previous-{}", Uuid::new_v4()));
            fs::rename(dir, &backup).map_err(io_error(dir))?;
            Some(backup)
        } else {
            None
        };

        if let Err(error) = fs::rename(&staging, dir) {
            if let Some(backup) = &previous {
                let _ = fs::rename(backup, dir);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(io_error(dir)(error));
        }

        // the new index is committed; a stale backup is only worth a warning
        if let Some(backup) = previous {
            let removed = if backup.is_dir() {
                fs::remove_dir_all(&backup)
            } else {
                fs::remove_file(&backup)
            };
            if let Err(error) = removed {
                warn!(path = %backup.display(), error = %error, "could not remove previous index");
            }
        }

        info!(
            path = %dir.display(),
            entries = self.len(),
            dimensions = self.manifest.dimensions,
            "persisted vector index"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest: IndexManifest = read_json(&dir.join(MANIFEST_FILE))?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(corrupt(
                dir,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let vectors: Vec<Vec<f32>> = read_json(&dir.join(VECTORS_FILE))?;
        let chunks: Vec<DocumentChunk> = read_json(&dir.join(DOCSTORE_FILE))?;

        if vectors.len() != manifest.entry_count || chunks.len() != manifest.entry_count {
            return Err(corrupt(
                dir,
                format!(
                    "manifest lists {} entries but found {} vectors and {} chunks",
                    manifest.entry_count,
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != manifest.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: manifest.dimensions,
                actual: bad.len(),
            });
        }

        debug!(path = %dir.display(), entries = manifest.entry_count, "loaded vector index");
        Ok(Self {
            manifest,
            vectors,
            chunks,
        })
    }

    fn write_files(&self, staging: &Path) -> Result<(), IndexError> {
        fs::create_dir(staging).map_err(io_error(staging))?;
        write_json(&staging.join(MANIFEST_FILE), &self.manifest)?;
        write_json(&staging.join(VECTORS_FILE), &self.vectors)?;
        write_json(&staging.join(DOCSTORE_FILE), &self.chunks)?;
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }

    fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    fn search_vector(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query_vector.len() != self.manifest.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: query_vector.len(),
            });
        }

        let metric = self.manifest.metric;
        let mut scored = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, metric.distance(query_vector, vector)))
            .collect::<Vec<_>>();

        // stable sort keeps insertion order for equal distances
        scored.sort_by(|left, right| left.1.total_cmp(&right.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(rank, (position, distance))| SearchHit {
                rank: rank + 1,
                distance,
                chunk: self.chunks[position].clone(),
            })
            .collect())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> IndexError + '_ {
    move |source| IndexError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn corrupt(dir: &Path, details: String) -> IndexError {
    IndexError::Corrupt {
        path: dir.display().to_string(),
        details,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(io_error(path))?;
    writer.get_ref().sync_all().map_err(io_error(path))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let file = File::open(path).map_err(io_error(path))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fingerprint() -> DocumentFingerprint {
        DocumentFingerprint {
            document_id: "doc-1".to_string(),
            document_title: "eldoria.pdf".to_string(),
            source_path: "data/eldoria.pdf".to_string(),
            checksum: "abc".to_string(),
            ingested_at: Utc::now(),
        }
    }

    fn chunk(index: u64, text: &str) -> DocumentChunk {
        DocumentChunk {
            chunk_id: format!("chunk-{index}"),
            document_id: "doc-1".to_string(),
            source_path: "data/eldoria.pdf".to_string(),
            page_start: 1,
            page_end: 1,
            chunk_index: index,
            text: text.to_string(),
        }
    }

    fn sample_index() -> FlatIndex {
        FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            vec![chunk(0, "north"), chunk(1, "east"), chunk(2, "south")],
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, -1.0]],
        )
        .expect("index should build")
    }

    #[test]
    fn build_rejects_mismatched_lengths() {
        let result = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            vec![chunk(0, "a"), chunk(1, "b")],
            vec![vec![1.0]],
        );
        assert!(matches!(
            result,
            Err(IndexError::LengthMismatch {
                chunks: 2,
                embeddings: 1
            })
        ));
    }

    #[test]
    fn build_rejects_ragged_vectors_and_empty_input() {
        let ragged = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            vec![chunk(0, "a"), chunk(1, "b")],
            vec![vec![1.0, 0.0], vec![1.0]],
        );
        assert!(matches!(ragged, Err(IndexError::DimensionMismatch { .. })));

        let empty = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(empty, Err(IndexError::Empty)));
    }

    #[test]
    fn search_orders_by_distance() {
        let index = sample_index();
        let hits = index.search_vector(&[0.1, 0.9], 2).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "north");
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].chunk.text, "east");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn top_k_larger_than_index_returns_everything() {
        let index = sample_index();
        assert_eq!(index.search_vector(&[0.0, 0.0], 50).unwrap().len(), 3);
        assert!(index.search_vector(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            vec![chunk(0, "first"), chunk(1, "second"), chunk(2, "third")],
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();

        let hits = index.search_vector(&[0.0, 0.0], 3).unwrap();
        let order: Vec<_> = hits.iter().map(|hit| hit.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn inner_product_metric_ranks_largest_dot_product_first() {
        let index = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::InnerProduct,
            vec![chunk(0, "small"), chunk(1, "large")],
            vec![vec![1.0, 0.0], vec![3.0, 0.0]],
        )
        .unwrap();

        let hits = index.search_vector(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].chunk.text, "large");
    }

    #[test]
    fn query_with_wrong_dimension_is_rejected() {
        let index = sample_index();
        assert!(matches!(
            index.search_vector(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn persisted_index_round_trips_all_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index");
        let index = sample_index();

        index.persist(&path)?;
        let loaded = FlatIndex::load(&path)?;

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.chunks(), index.chunks());
        assert_eq!(
            loaded.search_vector(&[0.0, -1.0], 1)?[0].chunk.text,
            "south"
        );
        Ok(())
    }

    #[test]
    fn persist_replaces_existing_index_without_leftovers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index");
        sample_index().persist(&path)?;

        let smaller = FlatIndex::build(
            fingerprint(),
            "test-model",
            DistanceMetric::Euclidean,
            vec![chunk(0, "only")],
            vec![vec![0.5, 0.5]],
        )?;
        smaller.persist(&path)?;

        assert_eq!(FlatIndex::load(&path)?.len(), 1);
        let entries: Vec<_> = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["index".to_string()]);
        Ok(())
    }

    #[test]
    fn persist_over_a_regular_file_succeeds_and_cleans_up() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index");
        fs::write(&path, b"not an index")?;

        sample_index().persist(&path)?;

        assert!(path.is_dir());
        assert_eq!(FlatIndex::load(&path)?.len(), 3);
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn loading_missing_directory_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = FlatIndex::load(&dir.path().join("absent"));
        assert!(matches!(result, Err(IndexError::Io { .. })));
    }

    #[test]
    fn loading_truncated_docstore_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("index");
        sample_index().persist(&path)?;
        fs::write(path.join(DOCSTORE_FILE), "[]")?;

        assert!(matches!(
            FlatIndex::load(&path),
            Err(IndexError::Corrupt { .. })
        ));
        Ok(())
    }

    #[test]
    fn embedding_model_must_match() {
        let index = sample_index();
        assert!(index.ensure_embedding_model("test-model").is_ok());
        assert!(matches!(
            index.ensure_embedding_model("other-model"),
            Err(IndexError::ModelMismatch { .. })
        ));
    }
}
