use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_rag_core::providers::{
    DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL, DEFAULT_TEMPERATURE, GEMINI_API_BASE,
};
use pdf_rag_core::{
    http_client, ingest_document, ApiError, Answer, CharacterNgramEmbedder, ChatSession,
    DistanceMetric, DocumentLoader, Embedder, EmbeddingProvider, FlatIndex, GeminiClient, GeminiEmbedder,
    GeminiGenerator, IndexBuilder, IngestionOptions, OcrEndpointConfig, RagCoordinator,
    SearchQuery, ThreadedLineReader, VectorIndex, DEFAULT_TOP_K,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector index
    #[arg(long, default_value = "data/index")]
    index_dir: PathBuf,

    /// API key used for both embedding and generation calls
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Generative Language API base URL
    #[arg(long, default_value = GEMINI_API_BASE)]
    api_base_url: String,

    /// Which embedder to use; the index remembers the model it was built with
    #[arg(long, value_enum, env = "PDF_RAG_EMBEDDING_PROVIDER", default_value_t = EmbeddingBackend::Gemini)]
    embedding_provider: EmbeddingBackend,

    /// Hosted embedding model
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Hosted chat-completion model
    #[arg(long, default_value = DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    /// Sampling temperature for answers
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K, value_parser = parse_top_k)]
    top_k: usize,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Multimodal OCR endpoint used when a PDF has no extractable text
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the OCR endpoint
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed a PDF, then write the vector index.
    Build {
        /// Source PDF.
        #[arg(long, default_value = "data/eldoria.pdf")]
        pdf: PathBuf,
        /// Maximum characters per chunk.
        #[arg(long, default_value = "500")]
        chunk_size: usize,
        /// Characters shared by neighbouring chunks.
        #[arg(long, default_value = "50")]
        chunk_overlap: usize,
        /// Distance used to rank chunks.
        #[arg(long, value_enum, default_value_t = MetricArg::Euclidean)]
        metric: MetricArg,
    },
    /// Chat with the indexed document until `exit`.
    Chat {
        /// Name printed in front of answers.
        #[arg(long, default_value = "Bot")]
        bot_name: String,
        /// Print the page span and distance of each retrieved chunk.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
    },
    /// Answer one question and exit.
    Ask {
        /// Question to answer.
        #[arg(long)]
        question: String,
        /// Print the retrieved chunks after the answer.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
    },
    /// Retrieve the closest chunks without calling the chat model.
    Search {
        /// Search query.
        #[arg(long)]
        query: String,
        /// Number of chunks to return (defaults to --top-k).
        #[arg(long, value_parser = parse_top_k)]
        limit: Option<usize>,
    },
    /// Extract and chunk a PDF without any embedding or generation call.
    Inspect {
        /// Source PDF.
        #[arg(long, default_value = "data/eldoria.pdf")]
        pdf: PathBuf,
        #[arg(long, default_value = "500")]
        chunk_size: usize,
        #[arg(long, default_value = "50")]
        chunk_overlap: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbeddingBackend {
    Gemini,
    Local,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    Euclidean,
    InnerProduct,
}

impl From<MetricArg> for DistanceMetric {
    fn from(value: MetricArg) -> Self {
        match value {
            MetricArg::Euclidean => DistanceMetric::Euclidean,
            MetricArg::InnerProduct => DistanceMetric::InnerProduct,
        }
    }
}

type Coordinator = RagCoordinator<EmbeddingProvider, FlatIndex, GeminiGenerator>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let http = http_client(Duration::from_secs(cli.timeout_secs))?;
    let gemini = GeminiClient::new(http.clone(), &cli.api_base_url, cli.api_key.clone())?;
    let embedder = match cli.embedding_provider {
        EmbeddingBackend::Gemini => {
            EmbeddingProvider::Gemini(GeminiEmbedder::new(gemini.clone(), cli.embedding_model.as_str()))
        }
        EmbeddingBackend::Local => EmbeddingProvider::Local(CharacterNgramEmbedder::default()),
    };
    let ocr = ocr_config(&cli);

    match &cli.command {
        Command::Build {
            pdf,
            chunk_size,
            chunk_overlap,
            metric,
        } => {
            if matches!(embedder, EmbeddingProvider::Gemini(_)) {
                require_api_key(&gemini)?;
            }

            let options = IngestionOptions {
                chunk_max_chars: *chunk_size,
                chunk_overlap_chars: *chunk_overlap,
                metric: (*metric).into(),
            };
            let builder = IndexBuilder::new(embedder, DocumentLoader::new(http, ocr), options);
            let summary = builder
                .build_and_persist(pdf, &cli.index_dir)
                .await
                .with_context(|| format!("index build failed for {}", pdf.display()))?;

            info!(
                source = %summary.source_path,
                model = %summary.embedding_model,
                dimensions = summary.dimensions,
                "index built"
            );
            println!(
                "{} chunks from {} page(s) indexed into {} at {}",
                summary.chunk_count,
                summary.page_count,
                cli.index_dir.display(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Chat {
            bot_name,
            show_sources,
        } => {
            require_api_key(&gemini)?;
            let coordinator = load_coordinator(embedder, &gemini, &cli)?;
            let input = ThreadedLineReader::stdin()?;
            let mut session = ChatSession::new(input, tokio::io::stdout())
                .with_bot_name(bot_name.as_str())
                .with_sources(*show_sources);

            tokio::select! {
                result = session.run(&coordinator) => {
                    let summary = result?;
                    info!(answered = summary.answered, failed = summary.failed, "chat finished");
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("\nBye!");
                }
            }
        }
        Command::Ask {
            question,
            show_sources,
        } => {
            require_api_key(&gemini)?;
            let coordinator = load_coordinator(embedder, &gemini, &cli)?;
            let answer = coordinator.ask(question).await?;
            print_answer(&answer, *show_sources);
        }
        Command::Search { query, limit } => {
            if matches!(embedder, EmbeddingProvider::Gemini(_)) {
                require_api_key(&gemini)?;
            }
            let coordinator = load_coordinator(embedder, &gemini, &cli)?;
            let hits = coordinator
                .search(&SearchQuery::new(query.as_str(), limit.unwrap_or(cli.top_k)))
                .await?;

            println!("query: {query}");
            for hit in hits {
                println!(
                    "[{}] distance={:.4} chunk={} pages={}-{}",
                    hit.rank, hit.distance, hit.chunk.chunk_index, hit.chunk.page_start, hit.chunk.page_end
                );
                println!("  chunk_text:\n{}", hit.chunk.text);
            }
        }
        Command::Inspect {
            pdf,
            chunk_size,
            chunk_overlap,
        } => {
            let options = IngestionOptions {
                chunk_max_chars: *chunk_size,
                chunk_overlap_chars: *chunk_overlap,
                ..IngestionOptions::default()
            };
            let report = ingest_document(&DocumentLoader::new(http, ocr), pdf, &options)
                .await
                .with_context(|| format!("unable to read {}", pdf.display()))?;

            println!("document: {}", report.fingerprint.document_title);
            println!("checksum: {}", report.fingerprint.checksum);
            println!("total pages: {}", report.page_count);
            println!("total chunks: {}", report.chunks.len());
            if let Some(first) = report.chunks.first() {
                println!("\nexample chunk (pages {}-{}):", first.page_start, first.page_end);
                println!("{}", first.text);
            }
        }
    }

    Ok(())
}

fn parse_top_k(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(k) => Ok(k),
        Err(error) => Err(error.to_string()),
    }
}

/// `inspect` stays offline, so it never gets the OCR endpoint.
fn ocr_config(cli: &Cli) -> Option<OcrEndpointConfig> {
    match cli.command {
        Command::Inspect { .. } => None,
        _ => OcrEndpointConfig::from_parts(cli.ocr_endpoint.clone(), cli.ocr_api_key.clone()),
    }
}

fn require_api_key(gemini: &GeminiClient) -> Result<(), ApiError> {
    if gemini.has_api_key() {
        Ok(())
    } else {
        Err(ApiError::MissingApiKey)
    }
}

fn load_coordinator(
    embedder: EmbeddingProvider,
    gemini: &GeminiClient,
    cli: &Cli,
) -> anyhow::Result<Coordinator> {
    let index_dir = cli.index_dir.as_path();
    let index = FlatIndex::load(index_dir).with_context(|| {
        format!(
            "unable to load index from {}; run `pdf-rag build` first",
            index_dir.display()
        )
    })?;
    index.ensure_embedding_model(embedder.model())?;

    let manifest = index.manifest();
    info!(
        path = %index_dir.display(),
        entries = index.len(),
        source = %manifest.document.source_path,
        built_at = %manifest.built_at.to_rfc3339(),
        "loaded index"
    );
    if cli.top_k > index.len() {
        warn!(top_k = cli.top_k, entries = index.len(), "top-k exceeds index size; every chunk will be used");
    }

    let generator = GeminiGenerator::new(gemini.clone(), cli.generation_model.as_str(), cli.temperature);
    Ok(RagCoordinator::new(embedder, index, generator, cli.top_k))
}

fn print_answer(answer: &Answer, show_sources: bool) {
    println!("{}", answer.text);
    if show_sources {
        println!();
        for hit in &answer.sources {
            println!(
                "[{}] distance={:.4} pages={}-{}",
                hit.rank, hit.distance, hit.chunk.page_start, hit.chunk.page_end
            );
            println!("  {}", hit.chunk.text);
        }
    }
}
