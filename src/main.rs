use anyhow::Context;
use clap::{Parser, Subcommand};
use database::Database;
use llm_interface::{ConfiguredProvider, SentimentClassifier};
use pipeline::Pipeline;
use reddit_client::{RedditApiClient, RedditFeed};
use sentiment_core::{
    load_app_config, AppConfig, FileConfig, RetryConfig, DEFAULT_DATABASE_URL,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "reddit_sentiment=info,pipeline=info,reddit_client=info,llm_interface=info,database=info,sentiment_core=info";

type SentimentPipeline = Pipeline<RedditFeed, SentimentClassifier<ConfiguredProvider>>;

#[derive(Debug, Parser)]
#[command(name = "reddit-sentiment")]
#[command(version, about = "Classify the sentiment of new posts and comments in a subreddit")]
struct Cli {
    /// TOML configuration file; environment variables take precedence over it
    #[arg(long, global = true, env = "SENTIMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Subreddit to follow, overrides SENTIMENT_SUBREDDIT
    #[arg(long, global = true)]
    subreddit: Option<String>,

    /// SQLite database URL, overrides SENTIMENT_DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll continuously until interrupted
    Run,
    /// Run a single cycle and print its summary
    Once,
    /// Write stored results as JSON lines
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show result counts per label
    Stats,
}

impl Cli {
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(subreddit) = &self.subreddit {
            overrides.insert("SENTIMENT_SUBREDDIT".to_string(), subreddit.clone());
        }
        if let Some(database_url) = &self.database_url {
            overrides.insert("SENTIMENT_DATABASE_URL".to_string(), database_url.clone());
        }
        overrides
    }

    /// The database URL alone, for commands that never talk to Reddit or an LLM.
    fn resolve_database_url(&self) -> anyhow::Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        if let Ok(url) = std::env::var("SENTIMENT_DATABASE_URL") {
            if !url.trim().is_empty() {
                return Ok(url);
            }
        }
        if let Some(path) = &self.config {
            if let Some(url) = FileConfig::load(path)?.into_vars().remove("SENTIMENT_DATABASE_URL") {
                return Ok(url);
            }
        }
        Ok(DEFAULT_DATABASE_URL.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Run => {
            let config = load_config(&cli)?;
            let pipeline = build_pipeline(&config).await?;
            run_until_interrupted(&pipeline).await
        }
        Commands::Once => {
            let config = load_config(&cli)?;
            let pipeline = build_pipeline(&config).await?;
            let summary = pipeline.run_cycle().await?;
            summary.log();
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Export { output, limit } => {
            let db = open_database(&cli.resolve_database_url()?).await?;
            let written = export_results(&db, output, *limit).await?;
            info!(written, path = %output.display(), "Exported results");
            Ok(())
        }
        Commands::Stats => {
            let db = open_database(&cli.resolve_database_url()?).await?;
            print_stats(&db).await
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = load_app_config(cli.config.as_deref(), &cli.overrides())
        .context("invalid configuration")?;
    debug!(?config, "Loaded configuration");
    Ok(config)
}

async fn open_database(url: &str) -> anyhow::Result<Database> {
    let db = Database::connect(url)
        .await
        .with_context(|| format!("failed to open database {}", url))?;
    db.run_migrations().await?;
    Ok(db)
}

async fn build_pipeline(config: &AppConfig) -> anyhow::Result<SentimentPipeline> {
    let api = RedditApiClient::new(&config.reddit)?;
    let mut feed = RedditFeed::new(api, config.feed.clone(), RetryConfig::reddit());
    let about = feed
        .verify_subreddit()
        .await
        .with_context(|| format!("cannot read r/{}", config.feed.subreddit))?;
    info!(
        subreddit = %about.display_name,
        subscribers = ?about.subscribers,
        listing = %config.feed.listing,
        include_comments = config.feed.include_comments,
        "Following subreddit"
    );

    let db = Arc::new(open_database(&config.database_url).await?);
    let repaired = db.reconcile().await?;
    if !repaired.is_clean() {
        warn!(?repaired, "Storage was repaired at startup");
    }

    let provider = ConfiguredProvider::from_settings(&config.llm)?;
    info!(
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "Using classifier"
    );
    let classifier =
        SentimentClassifier::new(provider, config.llm.max_input_chars, RetryConfig::llm());

    let feed_key = feed.settings().feed_key();
    let pipeline = Pipeline::new(feed, classifier, db, feed_key, config.pipeline.clone()).await?;
    Ok(pipeline)
}

async fn run_until_interrupted(pipeline: &SentimentPipeline) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing the current cycle");
            shutdown_tx.send_replace(true);
        }
    });

    let report = pipeline.run(shutdown_rx).await?;
    println!(
        "{} cycles ({} failed), {} items classified",
        report.cycles, report.failed_cycles, report.classified
    );
    Ok(())
}

async fn export_results(db: &Database, output: &Path, limit: Option<u32>) -> anyhow::Result<usize> {
    let results = db.list_results(limit).await?;
    let file = File::create(output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for stored in &results {
        serde_json::to_writer(&mut writer, stored)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(results.len())
}

async fn print_stats(db: &Database) -> anyhow::Result<()> {
    let total = db.count_results().await?;
    let (pending, abandoned) = db.pending_counts().await?;

    println!("{:<10} {:>8} {:>7}", "label", "count", "share");
    for entry in db.label_counts().await? {
        let share = if total > 0 {
            entry.count as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        println!("{:<10} {:>8} {:>6.1}%", entry.label.as_str(), entry.count, share);
    }
    println!("{:<10} {:>8}", "total", total);
    println!("awaiting retry: {}, abandoned: {}", pending, abandoned);
    Ok(())
}
