//! Operator CLI for the job ingestion pipeline.
//!
//! `run` performs one ingestion pass over the configured channels; the other
//! subcommands browse what previous runs stored. All output is JSON.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use job_pipeline::{
    CategoryFilter, ChannelId, DisabledExtractor, ExportTransport, JobExtractor, OpenAiExtractor,
    PageRequest, Pipeline, PipelineError, ProcessedKey, RecordFilter, RecordQuery, RunStats,
    SqliteStore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{parse_channels, Config};

#[derive(Parser)]
#[command(name = "job-scout")]
#[command(about = "Collect entry-level job posts from Telegram channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once over the configured channels
    Run {
        /// Override the configured channels (comma separated)
        #[arg(long)]
        channels: Option<String>,
    },

    /// List stored records, newest first
    List {
        #[arg(long, value_enum, default_value_t = Category::All)]
        category: Category,

        /// Only these sources (comma separated)
        #[arg(long)]
        sources: Option<String>,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },

    /// Show dashboard counts
    Stats,

    /// List sources with their message counts
    Sources,

    /// Show a single record
    Show { channel: String, message_id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum Category {
    All,
    Relevant,
    Uncategorized,
}

impl From<Category> for CategoryFilter {
    fn from(category: Category) -> Self {
        match category {
            Category::All => CategoryFilter::All,
            Category::Relevant => CategoryFilter::Relevant,
            Category::Uncategorized => CategoryFilter::Uncategorized,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .context("Failed to open database")?,
    );

    match cli.command {
        Commands::Run { channels } => {
            let channels = channels
                .map(|csv| parse_channels(&csv))
                .unwrap_or_else(|| config.channels.clone());
            run(&config, store, &channels).await
        }
        Commands::List {
            category,
            sources,
            from,
            to,
            search,
            page,
            per_page,
        } => {
            let mut filter = RecordFilter::new()
                .with_category(category.into())
                .with_date_range(from, to);
            if let Some(csv) = sources {
                filter = filter.with_sources_csv(&csv);
            }
            if let Some(search) = search {
                filter = filter.with_search(search);
            }

            let page = store.list(&filter, PageRequest::new(page, per_page)).await?;
            print_json(&page)
        }
        Commands::Stats => {
            let stats = store.stats(Utc::now().date_naive()).await?;
            print_json(&stats)
        }
        Commands::Sources => print_json(&store.sources().await?),
        Commands::Show {
            channel,
            message_id,
        } => {
            let key = ProcessedKey::new(ChannelId::from_link(&channel), message_id);
            match store.get(&key).await? {
                Some(record) => print_json(&record),
                None => anyhow::bail!("No record for {}", key),
            }
        }
    }
}

async fn run(config: &Config, store: Arc<SqliteStore>, channels: &[ChannelId]) -> Result<()> {
    let extractor: Arc<dyn JobExtractor> = match &config.openai_api_key {
        Some(key) => {
            let mut extractor = OpenAiExtractor::new(key.clone());
            if let Some(model) = &config.openai_model {
                extractor = extractor.with_model(model.clone());
            }
            tracing::info!("AI extraction enabled ({})", extractor.model());
            Arc::new(extractor)
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, every candidate takes the rule-only fallback");
            Arc::new(DisabledExtractor)
        }
    };

    tracing::info!(
        "Reading {} channels from {}",
        channels.len(),
        config.export_dir.display()
    );

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        ExportTransport::new(&config.export_dir),
        extractor,
        store.clone(),
        store,
    )
    .context("Failed to build pipeline")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current message");
            on_signal.cancel();
        }
    });

    match pipeline.run(channels, &cancel).await {
        Ok(stats) => {
            log_summary(&stats);
            print_json(&stats)
        }
        Err(PipelineError::NoChannelReadable { failed }) => {
            anyhow::bail!("None of the {} configured channels could be read", failed)
        }
        Err(e) => Err(e).context("Pipeline run failed"),
    }
}

fn log_summary(stats: &RunStats) {
    tracing::info!(
        "Run {}: {} seen, {} relevant ({:.1}%), {} uncategorized, {} skipped, {} discarded, {} AI fallbacks",
        stats.run_id,
        stats.messages_seen,
        stats.relevant,
        stats.success_rate(),
        stats.uncategorized,
        stats.skipped,
        stats.discarded,
        stats.ai_fallbacks
    );

    for (source, count) in stats.top_sources(5) {
        tracing::info!("  {}: {} relevant", source, count);
    }
    for failure in &stats.failed_channels {
        tracing::warn!(
            "Channel {} failed after {} messages: {}",
            failure.channel,
            failure.messages_read,
            failure.error
        );
    }
    for batch in &stats.failed_batches {
        tracing::warn!(
            "{} records for {} not written after {} attempts: {}",
            batch.records,
            batch.destination,
            batch.attempts,
            batch.error
        );
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
