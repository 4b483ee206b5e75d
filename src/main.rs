use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tomekeep::{
    config::{self, Config},
    embedding::OllamaEmbeddingClient,
    extract::PlainTextExtractor,
    ledger::{ProcessingConfig, ProcessingLedger},
    llm::CompletionClient,
    logging,
    processing::{IngestionPipeline, PipelineOptions},
    search,
    store::ChunkStore,
};

#[derive(Parser)]
#[command(
    name = "tomekeep",
    about = "Ingest long-form documents into a searchable embedding knowledge base"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process documents into chunks with embeddings.
    Process {
        /// Directory containing plain-text documents.
        #[arg(default_value = "data/books")]
        books_dir: PathBuf,
        /// Target chunk size in tokens.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Token overlap between chunks.
        #[arg(long)]
        overlap: Option<usize>,
        /// Embedding model to use.
        #[arg(long)]
        model: Option<String>,
        /// Reprocess documents even when the ledger says they are done.
        #[arg(long, short)]
        force: bool,
    },
    /// Search the knowledge base for chunks similar to a query.
    Search {
        /// Query text to embed and match.
        query: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Minimum cosine similarity accepted.
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },
    /// Answer a question using retrieved chunks as context.
    Query {
        /// Question to answer.
        question: String,
        /// Number of chunks supplied as context.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Completion model to use.
        #[arg(long)]
        model: Option<String>,
    },
    /// Show per-book chunk and token statistics.
    Stats,
    /// Clear ledger entries so documents are reprocessed on the next run.
    Reset {
        /// Also clear processor-version provenance.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = config::init_config().context("loading configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Process {
            books_dir,
            chunk_size,
            overlap,
            model,
            force,
        } => {
            let mut config = config;
            if let Some(size) = chunk_size {
                config.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                config.chunk_overlap = overlap;
            }
            if let Some(model) = model {
                config.embed_model = model;
            }
            process(&config, &books_dir, force).await
        }
        Command::Search {
            query,
            top_k,
            threshold,
        } => run_search(&config, &query, top_k, threshold).await,
        Command::Query {
            question,
            top_k,
            model,
        } => {
            let mut config = config;
            if let Some(model) = model {
                config.llm_model = model;
            }
            answer(&config, &question, top_k).await
        }
        Command::Stats => stats(&config).await,
        Command::Reset { all } => reset(&config, all).await,
    }
}

async fn process(config: &Config, books_dir: &PathBuf, force: bool) -> Result<()> {
    ensure_local_dirs(config)?;

    let processing_config =
        ProcessingConfig::new(config.chunk_size, config.chunk_overlap, &config.embed_model);
    let options = PipelineOptions {
        batch_size: config.batch_size,
        max_retries: config.max_retries,
        checkpoint_interval: config.checkpoint_interval,
        backoff_base: Duration::from_secs(1),
    };
    let embedder = OllamaEmbeddingClient::new(&config.ollama_url, &config.embed_model)
        .context("building embedding client")?;
    let ledger = ProcessingLedger::connect(&config.database_url)
        .await
        .context("connecting to processing ledger")?;
    let store = ChunkStore::new(&config.processed_dir);

    let pipeline = IngestionPipeline::new(
        processing_config,
        options,
        Box::new(PlainTextExtractor),
        Arc::new(embedder),
        ledger,
        store,
    )
    .context("assembling pipeline")?;

    let run = pipeline.process_books(books_dir, force).await;

    println!("Processing complete");
    println!("  processed books : {}", run.processed);
    println!("  skipped books   : {}", run.skipped);
    println!("  failed books    : {}", run.failed);
    println!("  total chunks    : {}", run.total_chunks);
    println!("  total tokens    : {}", run.total_tokens);
    println!("  failed chunks   : {}", run.failed_chunks);
    println!("  avg chunk size  : {} tokens", run.average_chunk_tokens());
    println!(
        "  throughput      : {:.0} tokens/s over {:.1}s",
        run.tokens_per_second(),
        run.elapsed.as_secs_f64()
    );
    Ok(())
}

async fn run_search(config: &Config, query: &str, top_k: usize, threshold: f32) -> Result<()> {
    let embedder = OllamaEmbeddingClient::new(&config.ollama_url, &config.embed_model)
        .context("building embedding client")?;
    let store = ChunkStore::new(&config.processed_dir);

    let results = search::search(&store, &embedder, query, top_k, threshold)
        .await
        .context("searching knowledge base")?;

    if results.is_empty() {
        println!("No relevant content found.");
        return Ok(());
    }

    for hit in results {
        println!(
            "[{:.3}] {} p.{}",
            hit.similarity, hit.chunk.book, hit.chunk.page
        );
        println!("    {}", preview(&hit.chunk.content, 240));
    }
    Ok(())
}

async fn answer(config: &Config, question: &str, top_k: usize) -> Result<()> {
    let embedder = OllamaEmbeddingClient::new(&config.ollama_url, &config.embed_model)
        .context("building embedding client")?;
    let store = ChunkStore::new(&config.processed_dir);

    let mut hits = search::search(&store, &embedder, question, top_k, 0.0)
        .await
        .context("searching knowledge base")?;
    if hits.is_empty() {
        println!("No relevant content found.");
        return Ok(());
    }
    hits.sort_by(|a, b| (&a.chunk.book, a.chunk.page).cmp(&(&b.chunk.book, b.chunk.page)));

    println!("Found relevant content in:");
    for hit in &hits {
        println!("  - {} p.{}", hit.chunk.book, hit.chunk.page);
    }
    println!();

    let context_block = hits
        .iter()
        .map(|hit| format!("[{} p.{}]\n{}", hit.chunk.book, hit.chunk.page, hit.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = format!(
        "Answer the question using only the context below. Cite the book and \
         page of any passage you rely on.\n\nContext:\n{context_block}\n\n\
         Question: {question}\nAnswer:"
    );

    let llm = CompletionClient::new(&config.ollama_url, &config.llm_model)
        .context("building completion client")?;
    llm.stream_completion(&prompt, |fragment| {
        print!("{fragment}");
        let _ = std::io::stdout().flush();
    })
    .await
    .context("streaming completion")?;
    println!();
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let store = ChunkStore::new(&config.processed_dir);
    let summaries = store.summaries().await.context("reading chunk store")?;

    if summaries.is_empty() {
        println!(
            "No processed files found in {}. Run 'tomekeep process' first.",
            config.processed_dir
        );
        return Ok(());
    }

    let mut total_chunks = 0usize;
    let mut total_tokens = 0usize;
    println!("{:<40} {:>8} {:>12} {:>10}", "Book", "Chunks", "Tokens", "Avg");
    for summary in &summaries {
        let avg = if summary.chunks > 0 {
            summary.tokens / summary.chunks
        } else {
            0
        };
        println!(
            "{:<40} {:>8} {:>12} {:>10}",
            summary.book, summary.chunks, summary.tokens, avg
        );
        total_chunks += summary.chunks;
        total_tokens += summary.tokens;
    }
    let total_avg = if total_chunks > 0 {
        total_tokens / total_chunks
    } else {
        0
    };
    println!(
        "{:<40} {:>8} {:>12} {:>10}",
        "TOTAL", total_chunks, total_tokens, total_avg
    );
    Ok(())
}

async fn reset(config: &Config, all: bool) -> Result<()> {
    let ledger = ProcessingLedger::connect(&config.database_url)
        .await
        .context("connecting to processing ledger")?;
    if all {
        ledger.clear_all().await.context("clearing ledger")?;
        println!("Ledger and processor-version provenance cleared.");
    } else {
        ledger.reset().await.context("resetting ledger")?;
        println!("Ledger entries cleared; provenance retained.");
    }
    Ok(())
}

/// Create the chunk directory and, for file-backed SQLite URLs, the database
/// file's parent directory so first runs work out of the box.
fn ensure_local_dirs(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.processed_dir)
        .with_context(|| format!("creating {}", config.processed_dir))?;

    if let Some(rest) = config.database_url.strip_prefix("sqlite://") {
        let path = rest.split('?').next().unwrap_or(rest);
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
            }
        }
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
