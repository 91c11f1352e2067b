//! Knowledge Graph RAG - command line entry point
//!
//! Either embeds the movie plots stored in Neo4j (`--embeddings`) or answers a
//! question from the most similar plots (`--prompt`).

use anyhow::Result;
use clap::{ArgGroup, Parser};
use futures::stream::{BoxStream, Stream, StreamExt};
use knowledge_graph_rag::rag::{EmbeddingRunSummary, RagService};
use knowledge_graph_rag::{AppState, Config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kg-rag")]
#[command(about = "Retrieval-augmented movie recommendations over a Neo4j knowledge graph")]
#[command(group(ArgGroup::new("mode").required(true).args(["embeddings", "prompt"])))]
struct Cli {
    /// Generate embeddings for the stored plots and load them into the graph
    #[arg(long)]
    embeddings: bool,

    /// Question to answer from the most similar plots
    #[arg(long)]
    prompt: Option<String>,

    /// Re-embed records that already carry an embedding
    #[arg(long, requires = "embeddings")]
    all: bool,

    /// Where to write the embeddings artifact (overrides config.yaml)
    #[arg(long, requires = "embeddings")]
    output: Option<PathBuf>,

    /// Path to the YAML config file
    #[arg(long, env = "KG_RAG_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the streamed answer
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,knowledge_graph_rag=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;
    if let Some(output) = cli.output {
        config.import_file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("--output {} has no file name", output.display()))?;
        config.artifact_path = output;
    }

    let state = AppState::new(config).await?;
    let service = RagService::new(state);

    match cli.prompt {
        Some(question) => run_prompt(&service, &question).await,
        None => run_embeddings(&service, cli.all).await,
    }
}

async fn run_embeddings(service: &RagService, include_embedded: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if await_forced_exit(ctrl_c_signals(), cancel).await {
                std::process::exit(130);
            }
        })
    };

    let summary = service.generate_embeddings(include_embedded, cancel).await;
    ctrl_c.abort();
    let summary = summary?;

    report(&summary);

    if !summary.unpersisted.is_empty() {
        anyhow::bail!(
            "store rejected {} embeddings: {}",
            summary.unpersisted.len(),
            summary.unpersisted.join(", ")
        );
    }
    summary.result.into_result()?;
    Ok(())
}

/// Every Ctrl-C the process receives, until the handler cannot be installed.
fn ctrl_c_signals() -> BoxStream<'static, ()> {
    futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
    .boxed()
}

/// Cancel the run on the first interrupt. Returns true once a second interrupt
/// asks for the process to quit without waiting for in-flight calls.
async fn await_forced_exit<S>(mut interrupts: S, cancel: CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!("Interrupted, finishing in-flight embeddings (Ctrl-C again to quit now)");
    cancel.cancel();

    if interrupts.next().await.is_none() {
        return false;
    }
    tracing::warn!("Interrupted again, exiting without waiting");
    true
}

fn report(summary: &EmbeddingRunSummary) {
    let result = &summary.result;
    println!(
        "{} of {} embeddings written to {}, {} failed",
        result.written_count,
        summary.records,
        summary.artifact_path.display(),
        result.failure_count()
    );
    if result.cancelled {
        println!(
            "run cancelled: {} records never attempted",
            result.never_attempted
        );
    }
    println!(
        "embeddings stored in knowledge graph: {} rows ingested, {} records now embedded",
        summary.persisted, summary.embedded_total
    );
    for failure in &result.failures {
        println!("  failed {}", failure);
    }
}

async fn run_prompt(service: &RagService, question: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    service.answer(question, &mut stdout).await?;
    Ok(())
}
