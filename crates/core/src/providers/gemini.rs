use crate::error::ApiError;
use crate::traits::{Embedder, Generator};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Upper bound on requests in one `batchEmbedContents` call.
const MAX_EMBED_BATCH: usize = 100;
const BACKEND: &str = "gemini";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'a str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

/// HTTP access to the Generative Language API; one key serves embedding and generation.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Result<Self, ApiError> {
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(&format!("{}:{method}", model_path(model)))?)
    }

    async fn post<B, R>(&self, model: &str, method: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let api_key = self.api_key.as_deref().ok_or(ApiError::MissingApiKey)?;
        let url = self.endpoint(model, method)?;

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, retry_after, &body));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|error| ApiError::InvalidResponse {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        })
    }
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn classify_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|envelope| envelope.error);
    let message = parsed
        .as_ref()
        .map(|error| error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let key_rejected = parsed.as_ref().is_some_and(|error| {
        error
            .details
            .iter()
            .any(|detail| detail.reason.as_deref() == Some("API_KEY_INVALID"))
            || error.status.as_deref() == Some("PERMISSION_DENIED")
            || error.status.as_deref() == Some("UNAUTHENTICATED")
    });

    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            backend: BACKEND.to_string(),
            retry_after_secs,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            backend: BACKEND.to_string(),
            status: status.as_u16(),
            message,
        },
        _ if key_rejected => ApiError::Unauthorized {
            backend: BACKEND.to_string(),
            status: status.as_u16(),
            message,
        },
        _ => ApiError::BackendResponse {
            backend: BACKEND.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn embed_batch(&self, texts: &[String], task_type: TaskType) -> Result<Vec<Vec<f32>>, ApiError> {
        let model = model_path(&self.model);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_EMBED_BATCH) {
            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|text| EmbedContentRequest {
                        model: &model,
                        content: Content::text(None, text),
                        task_type,
                    })
                    .collect(),
            };

            let response: BatchEmbedResponse = self
                .client
                .post(&self.model, "batchEmbedContents", &request)
                .await?;
            vectors.extend(vectors_from_response(response, batch.len())?);
            debug!(model = %self.model, embedded = vectors.len(), total = texts.len(), "embedding batch done");
        }

        Ok(vectors)
    }
}

fn vectors_from_response(response: BatchEmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    if response.embeddings.len() != expected {
        return Err(ApiError::InvalidResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "expected {expected} embeddings, got {}",
                response.embeddings.len()
            ),
        });
    }

    Ok(response
        .embeddings
        .into_iter()
        .map(|embedding| embedding.values)
        .collect())
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_batch(texts, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self
            .embed_batch(&[text.to_string()], TaskType::RetrievalQuery)
            .await?;
        vectors.pop().ok_or_else(|| ApiError::InvalidResponse {
            backend: BACKEND.to_string(),
            details: "empty embedding response".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(client: GeminiClient, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }
}

fn answer_text(response: GenerateContentResponse) -> Result<String, ApiError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::InvalidResponse {
            backend: BACKEND.to_string(),
            details: "response has no candidates".to_string(),
        })?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ApiError::InvalidResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        });
    }

    Ok(text.trim().to_string())
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(Some("user"), prompt)],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response: GenerateContentResponse = self
            .client
            .post(&self.model, "generateContent", &request)
            .await?;
        answer_text(response)
    }
}
