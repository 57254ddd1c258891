use crate::chunking::{build_chunks, ChunkingConfig};
use crate::error::{IngestError, RagError};
use crate::extractor::{DocumentLoader, LopdfExtractor, PdfExtractor};
use crate::index::FlatIndex;
use crate::models::{DocumentChunk, DocumentFingerprint, IngestionOptions};
use crate::traits::{Embedder, VectorIndex};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

/// Hex SHA-256 of the file contents.
pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    Ok(format!("{:x}", Sha256::digest(fs::read(path)?)))
}

pub struct IngestionReport {
    pub fingerprint: DocumentFingerprint,
    pub page_count: usize,
    pub chunks: Vec<DocumentChunk>,
}

/// Loads and chunks one PDF. An empty result is an error, never an empty report.
pub async fn ingest_document<X: PdfExtractor>(
    loader: &DocumentLoader<X>,
    path: &Path,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    ChunkingConfig::from(options).validate()?;

    let fingerprint = fingerprint(path)?;
    let text = loader.load(path).await?;
    let chunks = build_chunks(&fingerprint, &text, options)?;

    if chunks.is_empty() {
        return Err(IngestError::EmptyDocument(path.display().to_string()));
    }

    Ok(IngestionReport {
        fingerprint,
        page_count: text.page_count(),
        chunks,
    })
}

#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub source_path: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub dimensions: usize,
    pub embedding_model: String,
}

/// Build-phase context: load, chunk, embed and index one document.
pub struct IndexBuilder<E, X = LopdfExtractor> {
    embedder: E,
    loader: DocumentLoader<X>,
    options: IngestionOptions,
}

impl<E, X> IndexBuilder<E, X>
where
    E: Embedder + Send + Sync,
    X: PdfExtractor,
{
    pub fn new(embedder: E, loader: DocumentLoader<X>, options: IngestionOptions) -> Self {
        Self {
            embedder,
            loader,
            options,
        }
    }

    pub async fn build(&self, pdf: &Path) -> Result<(FlatIndex, usize), RagError> {
        let report = ingest_document(&self.loader, pdf, &self.options).await?;
        info!(
            path = %pdf.display(),
            pages = report.page_count,
            chunks = report.chunks.len(),
            model = self.embedder.model(),
            "embedding chunks"
        );

        let texts = report
            .chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        let index = FlatIndex::build(
            report.fingerprint,
            self.embedder.model(),
            self.options.metric,
            report.chunks,
            embeddings,
        )?;

        Ok((index, report.page_count))
    }

    /// Nothing is written unless every chunk was embedded.
    pub async fn build_and_persist(&self, pdf: &Path, index_dir: &Path) -> Result<BuildSummary, RagError> {
        let (index, page_count) = self.build(pdf).await?;
        index.persist(index_dir)?;

        Ok(BuildSummary {
            source_path: index.manifest().document.source_path.clone(),
            page_count,
            chunk_count: index.len(),
            dimensions: index.dimensions(),
            embedding_model: index.embedding_model().to_string(),
        })
    }
}

/// The document id is derived from the file contents, so a renamed copy indexes identically.
fn fingerprint(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let title = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    let checksum = digest_file(path)?;

    Ok(DocumentFingerprint {
        document_id: format!("doc-{}", &checksum[..16]),
        document_title: title,
        source_path: path.display().to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}
