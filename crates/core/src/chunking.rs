use crate::error::IngestError;
use crate::extractor::DocumentText;
use crate::models::{DocumentChunk, DocumentFingerprint, IngestionOptions};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.max_chars - self.overlap_chars
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Character windows of `max_chars`, each starting `max_chars - overlap_chars` after the last.
/// Returned as `(char_offset, text)` pairs.
pub fn chunk_windows(text: &str, config: ChunkingConfig) -> Result<Vec<(usize, String)>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    if chars.iter().all(|c| c.is_whitespace()) {
        return Ok(Vec::new());
    }

    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        windows.push((start, chars[start..end].iter().collect()));
        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    Ok(windows)
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    Ok(chunk_windows(text, config)?
        .into_iter()
        .map(|(_, chunk)| chunk)
        .collect())
}

/// Splits the whole document into chunks, tagging each with the pages its span covers.
pub fn build_chunks(
    document: &DocumentFingerprint,
    text: &DocumentText,
    options: &IngestionOptions,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let config = ChunkingConfig::from(options);

    let chunks = chunk_windows(&text.text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, (offset, raw))| {
            let length = raw.chars().count();
            let chunk_index = index as u64;
            DocumentChunk {
                chunk_id: make_chunk_id(&document.document_id, chunk_index, &raw),
                document_id: document.document_id.clone(),
                source_path: document.source_path.clone(),
                page_start: text.page_at(offset),
                page_end: text.page_at(offset + length.saturating_sub(1)),
                chunk_index,
                text: raw,
            }
        })
        .collect();

    Ok(chunks)
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
