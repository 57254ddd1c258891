use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("document produced no chunks: {0}")]
    EmptyDocument(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api key is not configured; set GOOGLE_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("{backend} rejected the api key ({status}): {message}")]
    Unauthorized {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} rate limited the request{}", retry_hint(.retry_after_secs))]
    RateLimited {
        backend: String,
        retry_after_secs: Option<u64>,
    },

    #[error("invalid response from {backend} ({status}): {message}")]
    BackendResponse {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed response from {backend}: {details}")]
    InvalidResponse { backend: String, details: String },
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {secs}s"))
        .unwrap_or_default()
}

impl ApiError {
    /// True when every later call with the same credentials fails the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::MissingApiKey | ApiError::Unauthorized { .. })
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    LengthMismatch { chunks: usize, embeddings: usize },

    #[error("index at {path} is corrupt: {details}")]
    Corrupt { path: String, details: String },

    #[error("cannot build an index without entries")]
    Empty,

    #[error("index was built with embedding model {indexed}, but {configured} is configured")]
    ModelMismatch { indexed: String, configured: String },
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("request rejected: {0}")]
    Request(String),

    #[error("terminal io error: {0}")]
    Terminal(#[from] std::io::Error),
}

impl RagError {
    pub fn is_fatal(&self) -> bool {
        match self {
            RagError::Api(error) => error.is_fatal(),
            RagError::Index(_) | RagError::Ingest(_) | RagError::Terminal(_) => true,
            RagError::Request(_) => false,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
