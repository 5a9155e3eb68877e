//! CLI entry point for the retrieval engine.
//!
//! Wires settings, the fastembed provider and a persisted index together so
//! documents can be indexed and searched from the shell.

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use simsearch::chunking::WhitespaceTokenizer;
use simsearch::index::{SimilarityIndex, index_document, index_file};
use simsearch::vector::{EmbeddingProvider, FastEmbedProvider, parse_embedding_model};
use serde::Serialize;
use simsearch::{IndexError, Settings, VectorStore, logging};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// On-device semantic search
#[derive(Parser)]
#[command(
    name = "simsearch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Chunk, embed and search text documents locally",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index name (overrides config)
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .simsearch/settings.toml
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Chunk, embed and index text files, then save the index
    Index {
        /// Files to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Source name recorded for the chunks (defaults to the file path)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Search the index
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Drop results whose score does not pass this threshold
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List persisted indexes
    List,

    /// Delete the persisted index
    Clear,

    /// Show the effective configuration
    Config,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        None => Settings::load().context("Configuration error")?,
    };
    if let Some(name) = &cli.name {
        settings.index_name = name.clone();
    }
    if cli.debug {
        settings.debug = true;
    }
    settings.validate()?;
    Ok(settings)
}

fn provider(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = parse_embedding_model(&settings.embedding.model)?;
    let provider = FastEmbedProvider::new(
        model,
        settings.embedding.cache_dir.clone(),
        settings.embedding.batch_size,
        settings.debug,
    )?;
    Ok(Arc::new(provider))
}

async fn open_index(settings: &Settings) -> Result<SimilarityIndex> {
    let mut index = SimilarityIndex::new(
        settings.index_name.clone(),
        provider(settings)?,
        settings.metric(),
        settings.store(),
    )
    .with_batch_size(settings.embedding.batch_size);

    index.load_index(&settings.index_path, None)?;
    if index.ensure_compatible() {
        eprintln!(
            "Index '{}' was built with a different model; starting fresh",
            settings.index_name
        );
    }
    Ok(index)
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current chunk...");
            token.cancel();
        }
    });
}

/// Error body printed in place of results when `search --json` fails.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    code: String,
    message: String,
    suggestions: Vec<&'static str>,
}

impl ErrorResponse {
    fn from_error(error: &anyhow::Error) -> Self {
        let index_error = find_index_error(error);
        Self {
            status: "error",
            code: index_error
                .map_or_else(|| "GENERAL_ERROR".to_string(), IndexError::status_code),
            message: format!("{error:#}"),
            suggestions: index_error
                .map(IndexError::recovery_suggestions)
                .unwrap_or_default(),
        }
    }
}

fn find_index_error(error: &anyhow::Error) -> Option<&IndexError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<IndexError>())
}

fn report_error(error: &anyhow::Error, json: bool) {
    if json {
        match serde_json::to_string_pretty(&ErrorResponse::from_error(error)) {
            Ok(body) => println!("{body}"),
            Err(_) => eprintln!("Error: {error:#}"),
        }
        return;
    }

    eprintln!("Error: {error:#}");
    let suggestions = find_index_error(error)
        .map(IndexError::recovery_suggestions)
        .unwrap_or_default();
    if !suggestions.is_empty() {
        eprintln!("\nSuggestions:");
        for suggestion in suggestions {
            eprintln!("  • {suggestion}");
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = matches!(cli.command, Commands::Search { json: true, .. });
    if let Err(e) = run(&cli).await {
        report_error(&e, json);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    logging::init(settings.debug);

    match &cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(*force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::List => {
            let store = settings.store();
            let indexes = store.list_indexes(&settings.index_path);
            if indexes.is_empty() {
                println!("No indexes in {}", settings.index_path.display());
            }
            for path in indexes {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!("{name}\t{}", path.display());
            }
        }

        Commands::Clear => {
            let removed = settings
                .store()
                .remove_index(&settings.index_path, &settings.index_name)?;
            if removed {
                println!("Cleared index '{}'", settings.index_name);
            } else {
                println!("No index named '{}'", settings.index_name);
            }
        }

        Commands::Index { paths, source } => {
            if source.is_some() && paths.len() > 1 {
                bail!("--source can only be used with a single file");
            }
            let start = Instant::now();
            let mut index = open_index(&settings).await?;
            let splitter = settings.splitter(Arc::new(WhitespaceTokenizer));
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let mut total = 0;
            for path in paths {
                if cancel.is_cancelled() {
                    break;
                }
                let report = match source {
                    Some(source) => {
                        let text = tokio::fs::read_to_string(path)
                            .await
                            .with_context(|| format!("Failed to read {}", path.display()))?;
                        index_document(&mut index, source, &text, splitter.as_ref(), &cancel)
                            .await?
                    }
                    None => index_file(&mut index, path, splitter.as_ref(), &cancel).await?,
                };
                println!(
                    "{}: {} chunks, {} indexed, {} skipped",
                    report.source, report.chunks, report.indexed, report.skipped
                );
                if report.cancelled {
                    println!("   cancelled with {} chunks pending", report.pending);
                }
                total += report.indexed;
                if report.cancelled {
                    break;
                }
            }

            if cancel.is_cancelled() {
                bail!("Indexing cancelled; index not saved");
            }
            let saved = index.save_index(&settings.index_path, None)?;
            println!(
                "Indexed {total} chunks in {:.2?}, saved to {}",
                start.elapsed(),
                saved.display()
            );
        }

        Commands::Search {
            query,
            limit,
            threshold,
            json,
        } => {
            let index = open_index(&settings).await?;
            if index.is_empty() {
                bail!(
                    "Index '{}' is empty. Run 'simsearch index <files>' first",
                    settings.index_name
                );
            }

            let limit = limit.unwrap_or(settings.search.default_limit);
            let results = match threshold {
                Some(threshold) => index.search_with_threshold(query, limit, *threshold).await?,
                None => index.search(query, limit).await?,
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results");
            } else {
                for (rank, result) in results.iter().enumerate() {
                    let source = result.metadata.get("source").map_or("-", String::as_str);
                    println!("{}. [{:.4}] {} ({source})", rank + 1, result.score, result.id);
                    println!("   {}", result.text.trim().replace('\n', " "));
                }
            }
        }
    }

    Ok(())
}
