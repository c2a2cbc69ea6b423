//! vedyut-rag CLI application
//!
//! Command-line interface for the vedyut-rag library.

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vedyut_rag::api::tasks;
use vedyut_rag::ml::{EmbeddingProvider, HashEmbedder, IndexArtifact, OpenAiEmbedder, QueryFilter};
use vedyut_rag::utils::format_file_size;
use vedyut_rag::{BuildOutcome, CancelToken, Config, GrammarRag, Language, OpenAiChat, RuleLookup};

#[derive(Parser)]
#[command(name = "vedyut-rag")]
#[command(about = "Retrieval-augmented assistant over Sanskrit grammar treatises")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Grammar data directory (overrides the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Embed with the offline hash embedder instead of the embeddings API
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load grammar texts and build (or reuse) the embedding index
    Index {
        /// Re-embed everything even if an index exists
        #[arg(long)]
        force: bool,
    },

    /// Retrieve grammar chunks similar to a query
    Query {
        query: String,

        /// Number of results to return
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Only chunks with this topic (e.g. sandhi)
        #[arg(long)]
        topic: Option<String>,

        /// Only chunks in this language (sanskrit or english)
        #[arg(long)]
        language: Option<Language>,
    },

    /// Explain a rule by reference or by query
    #[command(group(ArgGroup::new("lookup").required(true).args(["reference", "query"])))]
    Explain {
        /// Rule reference such as 1.1.1
        #[arg(long)]
        reference: Option<String>,

        /// Free-text description of the rule
        #[arg(long)]
        query: Option<String>,
    },

    /// Generate code for a task from retrieved rules
    Codegen {
        task: String,

        #[arg(long, default_value = "rust")]
        language: String,
    },

    /// Suggest an implementation of a rule described in prose
    Suggest {
        description: String,

        #[arg(long, default_value = "rust")]
        language: String,

        /// Don't ask for test cases
        #[arg(long)]
        no_tests: bool,
    },

    /// Choose the best segmentation; write candidates as words joined by '+'
    Disambiguate {
        text: String,

        #[arg(required = true)]
        candidates: Vec<String>,
    },

    /// Generate test cases for a function described in prose
    TestCases {
        description: String,

        #[arg(short = 'n', long, default_value = "10")]
        num_cases: usize,
    },

    /// Review an implementation against retrieved rules
    Validate {
        code_file: PathBuf,

        description: String,

        #[arg(long, default_value = "rust")]
        language: String,
    },

    /// Translate Sanskrit text
    Translate {
        text: String,

        #[arg(long, default_value = "english")]
        target: String,

        /// Include a word-by-word breakdown
        #[arg(long)]
        explain: bool,
    },

    /// Show loaded chunk and index statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();
    let rag = open_rag(&cli)?;

    // One watcher for the whole process: Ctrl-C cancels builds between
    // batches and abandons any in-flight request.
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = tokio::select! {
        result = run(cli.command, &rag, &cancel) => result,
        _ = cancel.cancelled() => Ok(()),
    };

    if cancel.is_cancelled() {
        eprintln!("❌ Interrupted");
        std::process::exit(130);
    }
    result
}

/// What a command needs before it can run
#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    /// Nothing, or the command loads what it needs itself
    Nothing,
    /// Loaded chunks only
    Texts,
    /// Loaded chunks and a built index
    Index,
}

fn readiness(command: &Commands) -> Readiness {
    match command {
        Commands::Index { .. } | Commands::Stats | Commands::Translate { .. } => Readiness::Nothing,
        Commands::Explain {
            reference: Some(_), ..
        } => Readiness::Texts,
        _ => Readiness::Index,
    }
}

async fn run(command: Commands, rag: &GrammarRag, cancel: &CancelToken) -> anyhow::Result<()> {
    match readiness(&command) {
        Readiness::Nothing => {}
        Readiness::Texts => {
            rag.load_texts()?;
        }
        Readiness::Index => prepare(rag, cancel).await?,
    }

    match command {
        Commands::Index { force } => index_command(rag, force, cancel).await?,
        Commands::Query {
            query,
            top_k,
            topic,
            language,
        } => {
            let filter = QueryFilter { topic, language };
            query_command(rag, &query, top_k, &filter, cancel).await?;
        }
        Commands::Explain { reference, query } => {
            let lookup = match (reference, query) {
                (Some(reference), _) => RuleLookup::Reference(reference),
                (None, Some(query)) => RuleLookup::Query(query),
                (None, None) => anyhow::bail!("Provide --reference or --query"),
            };
            println!("{}", tasks::explain_rule(rag, &lookup).await?);
        }
        Commands::Codegen { task, language } => {
            println!("{}", tasks::generate_code(rag, &task, None, &language).await?);
        }
        Commands::Suggest {
            description,
            language,
            no_tests,
        } => {
            let code = tasks::suggest_implementation(rag, &description, &language, !no_tests).await?;
            println!("{}", code);
        }
        Commands::Disambiguate { text, candidates } => {
            disambiguate_command(rag, &text, &candidates).await?;
        }
        Commands::TestCases {
            description,
            num_cases,
        } => {
            let cases = tasks::generate_test_cases(rag.llm(), Some(rag), &description, num_cases).await?;
            println!("{}", serde_json::to_string_pretty(&cases)?);
        }
        Commands::Validate {
            code_file,
            description,
            language,
        } => {
            let code = std::fs::read_to_string(&code_file)
                .with_context(|| format!("Failed to read {}", code_file.display()))?;
            let report = tasks::validate_rule_implementation(rag, &code, &description, &language).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Translate {
            text,
            target,
            explain,
        } => {
            let mut parts = tasks::translate_sanskrit_stream(rag.llm(), &text, &target, explain).await?;
            let mut stdout = std::io::stdout();
            while let Some(part) = parts.next().await {
                write!(stdout, "{}", part?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        Commands::Stats => stats_command(rag)?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(dir) = &cli.data_dir {
        config.grammar.data_dir = dir.clone();
    }
    Ok(config)
}

fn open_rag(cli: &Cli) -> anyhow::Result<GrammarRag> {
    let config = load_config(cli)?;

    let embedder: Arc<dyn EmbeddingProvider> = if cli.offline {
        Arc::new(HashEmbedder::default())
    } else {
        Arc::new(OpenAiEmbedder::new(&config.embedding)?)
    };
    let llm = Arc::new(OpenAiChat::new(&config.llm)?);

    Ok(GrammarRag::new(config, embedder, llm)?)
}

/// Load texts and make sure an index is available
async fn prepare(rag: &GrammarRag, cancel: &CancelToken) -> anyhow::Result<()> {
    rag.load_texts()?;
    match build_with_spinner(rag, false, cancel).await? {
        BuildOutcome::Skipped => anyhow::bail!(
            "No grammar texts found in {}",
            rag.config().grammar.data_dir.display()
        ),
        _ => Ok(()),
    }
}

async fn build_with_spinner(
    rag: &GrammarRag,
    force: bool,
    cancel: &CancelToken,
) -> anyhow::Result<BuildOutcome> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Indexing {} grammar chunks...", rag.chunk_count()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = rag.build_index_with_cancel(force, cancel).await;

    match &result {
        Ok(BuildOutcome::Cached { chunks }) => {
            spinner.finish_with_message(format!("Using existing index ({} chunks)", chunks))
        }
        Ok(BuildOutcome::Built { chunks, batches, dimension }) => spinner.finish_with_message(format!(
            "Indexed {} chunks in {} batch(es), dimension {}",
            chunks, batches, dimension
        )),
        Ok(BuildOutcome::Skipped) => spinner.finish_with_message("Nothing to index"),
        Err(e) => spinner.abandon_with_message(format!("Index build failed: {}", e)),
    }

    Ok(result?)
}

async fn index_command(rag: &GrammarRag, force: bool, cancel: &CancelToken) -> anyhow::Result<()> {
    let summary = rag.load_texts()?;
    println!(
        "📄 Loaded {} file(s): {} new chunk(s), {} updated",
        summary.files_loaded, summary.added, summary.updated
    );
    for failure in &summary.failures {
        eprintln!("❌ {}: {}", failure.path.display(), failure.message);
    }

    build_with_spinner(rag, force, cancel).await?;
    println!("📋 Index: {}", rag.index_path().display());
    Ok(())
}

async fn query_command(
    rag: &GrammarRag,
    query: &str,
    top_k: usize,
    filter: &QueryFilter,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    println!("🔍 Searching for: \"{}\"", query);

    let results = rag.query_with_cancel(query, top_k, filter, cancel).await?;
    if results.is_empty() {
        println!("❌ No results found");
        return Ok(());
    }

    println!("📋 Found {} results:", results.len());
    println!();

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{}. Score: {:.3}  {} ({}{})",
            i + 1,
            result.score,
            chunk.citation(),
            chunk.language,
            chunk.topic.as_deref().map(|t| format!(", {}", t)).unwrap_or_default()
        );
        println!("   {}", chunk.preview(300));
        println!();
    }

    Ok(())
}

async fn disambiguate_command(rag: &GrammarRag, text: &str, candidates: &[String]) -> anyhow::Result<()> {
    let segmentations: Vec<Vec<String>> = candidates
        .iter()
        .map(|c| c.split('+').map(|w| w.trim().to_string()).filter(|w| !w.is_empty()).collect())
        .collect();

    let choice = tasks::disambiguate_segmentation(rag.llm(), Some(rag), text, &segmentations).await?;
    println!("{}. {}", choice + 1, segmentations[choice].join(" + "));
    Ok(())
}

fn stats_command(rag: &GrammarRag) -> anyhow::Result<()> {
    let summary = rag.load_texts()?;
    println!("📊 Grammar data: {}", rag.config().grammar.data_dir.display());
    println!("   📄 Files: {}", summary.files_loaded);
    println!("   🧩 Chunks: {}", rag.chunk_count());

    let index_path = rag.index_path();
    if !index_path.exists() {
        println!("   📋 Index: not built");
        return Ok(());
    }

    let size = std::fs::metadata(&index_path)?.len();
    let stats = IndexArtifact::load(&index_path)?.into_snapshot()?.stats();
    println!("   📋 Index: {} ({})", index_path.display(), format_file_size(size));
    println!("      Chunks: {}, dimension {}", stats.total_chunks, stats.dimension);
    if let Some(built_at) = stats.built_at {
        println!("      Built: {}", built_at.to_rfc3339());
    }
    for (language, count) in &stats.by_language {
        println!("      {}: {}", language, count);
    }
    for (topic, count) in &stats.by_topic {
        println!("      topic {}: {}", topic, count);
    }

    Ok(())
}
