use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Whole-document text in page order, with the char offset where each page begins.
#[derive(Debug, Clone, Default)]
pub struct DocumentText {
    pub text: String,
    page_starts: Vec<(u32, usize)>,
}

impl DocumentText {
    pub fn from_pages(pages: Vec<PageText>) -> Self {
        let mut text = String::new();
        let mut page_starts = Vec::new();
        let mut offset = 0usize;

        for page in pages {
            let normalized = normalize_whitespace(&page.text);
            if normalized.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str(PAGE_SEPARATOR);
                offset += PAGE_SEPARATOR.chars().count();
            }
            page_starts.push((page.number, offset));
            offset += normalized.chars().count();
            text.push_str(&normalized);
        }

        Self { text, page_starts }
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn page_at(&self, char_offset: usize) -> u32 {
        self.page_starts
            .iter()
            .take_while(|(_, start)| *start <= char_offset)
            .last()
            .or_else(|| self.page_starts.first())
            .map(|(number, _)| *number)
            .unwrap_or(1)
    }
}

const FORM_FEED: char = '\u{000c}';

#[derive(Serialize)]
struct OcrRequest<'a> {
    pdf_base64: String,
    source_path: &'a str,
}

/// Either per-page text or one blob with pages separated by form feeds.
#[derive(Debug, Default, Deserialize)]
struct OcrReply {
    #[serde(default)]
    pages: Vec<OcrReplyPage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcrReplyPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: String,
}

impl OcrReply {
    fn into_pages(self) -> Vec<PageText> {
        let listed: Vec<PageText> = self
            .pages
            .into_iter()
            .filter_map(|page| non_blank_page(page.page.unwrap_or(1), &page.text))
            .collect();
        if !listed.is_empty() {
            return listed;
        }

        self.text
            .as_deref()
            .unwrap_or_default()
            .split(FORM_FEED)
            .zip(1u32..)
            .filter_map(|(text, number)| non_blank_page(number, text))
            .collect()
    }
}

fn non_blank_page(number: u32, text: &str) -> Option<PageText> {
    let text = text.trim();
    (!text.is_empty()).then(|| PageText {
        number,
        text: text.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Blank endpoints and keys count as unset.
    pub fn from_parts(endpoint: Option<String>, api_key: Option<String>) -> Option<Self> {
        let endpoint = endpoint?.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self { endpoint, api_key })
    }
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let parse_error = |error: lopdf::Error| IngestError::PdfParse(format!("{}: {error}", path.display()));
        let document = Document::load(path).map_err(parse_error)?;

        let mut pages = Vec::new();
        for number in document.get_pages().into_keys() {
            let text = document.extract_text(&[number]).map_err(parse_error)?;
            pages.extend(non_blank_page(number, &text));
        }

        if pages.is_empty() {
            Err(IngestError::PdfParse(format!(
                "{} contains no extractable text",
                path.display()
            )))
        } else {
            Ok(pages)
        }
    }
}

/// Reads a PDF with `lopdf`, falling back to the OCR endpoint when one is configured.
pub struct DocumentLoader<X = LopdfExtractor> {
    extractor: X,
    ocr: Option<OcrEndpointConfig>,
    client: Client,
}

impl DocumentLoader<LopdfExtractor> {
    pub fn new(client: Client, ocr: Option<OcrEndpointConfig>) -> Self {
        Self::with_extractor(LopdfExtractor, client, ocr)
    }
}

impl<X: PdfExtractor> DocumentLoader<X> {
    pub fn with_extractor(extractor: X, client: Client, ocr: Option<OcrEndpointConfig>) -> Self {
        Self {
            extractor,
            ocr,
            client,
        }
    }

    pub async fn load_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        std::fs::metadata(path)?;

        match self.extractor.extract_pages(path) {
            Ok(pages) => {
                debug!(path = %path.display(), pages = pages.len(), "extracted pdf text");
                Ok(pages)
            }
            Err(IngestError::PdfParse(parse_error)) => {
                let Some(cfg) = &self.ocr else {
                    return Err(IngestError::PdfParse(parse_error));
                };
                warn!(path = %path.display(), error = %parse_error, "pdf text extraction failed, trying OCR");
                self.ocr_pages(cfg, path).await.map_err(|ocr_error| {
                    IngestError::PdfParse(format!("{parse_error} (OCR fallback: {ocr_error})"))
                })
            }
            Err(error) => Err(error),
        }
    }

    pub async fn load(&self, path: &Path) -> Result<DocumentText, IngestError> {
        Ok(DocumentText::from_pages(self.load_pages(path).await?))
    }

    async fn ocr_pages(
        &self,
        cfg: &OcrEndpointConfig,
        path: &Path,
    ) -> Result<Vec<PageText>, IngestError> {
        let source_path = path.to_string_lossy();
        let body = OcrRequest {
            pdf_base64: STANDARD.encode(std::fs::read(path)?),
            source_path: &source_path,
        };

        let request = self.client.post(&cfg.endpoint).json(&body);
        let request = match &cfg.api_key {
            Some(api_key) => request.bearer_auth(api_key),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::OcrFailed(format!(
                "{} answered {status}",
                cfg.endpoint
            )));
        }

        let pages = response.json::<OcrReply>().await?.into_pages();
        if pages.is_empty() {
            return Err(IngestError::OcrFailed(format!(
                "no text recognised in {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), pages = pages.len(), "ocr recognised pdf text");
        Ok(pages)
    }
}
