use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use newsimg_pipeline::{load_descriptors, run_batch_from_env, PipelineConfig, RegionTaxonomy, RuntimeEnv};
use newsimg_storage::MetadataLedger;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "newsimg-cli")]
#[command(about = "News article image discovery pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one batch of article descriptors and print the batch report as JSON.
    Run {
        /// JSON array of article descriptors.
        #[arg(long)]
        articles: PathBuf,
        /// Pipeline config YAML; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Region rules YAML, overriding the config's taxonomy.
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },
    /// Print the latest ledger record per article for a range of days ending at `date`.
    Latest {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        days: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            articles,
            config,
            taxonomy,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_yaml_file(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(path) = taxonomy {
                config.region_taxonomy = RegionTaxonomy::from_yaml_file(&path)?;
            }
            let descriptors = load_descriptors(&articles)?;
            info!(articles = descriptors.len(), "loaded descriptors");

            let report = run_batch_from_env(config, &descriptors).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing batch report")?
            );
        }
        Commands::Latest { date, days } => {
            let end = date.unwrap_or_else(|| Utc::now().date_naive());
            let dates: Vec<NaiveDate> = (0..days.max(1))
                .filter_map(|back| end.checked_sub_days(Days::new(back)))
                .collect();
            let ledger = MetadataLedger::new(RuntimeEnv::from_env().ledger_dir());
            let latest = ledger
                .latest_by_article(&dates)
                .await
                .with_context(|| format!("reading ledger at {}", ledger.root().display()))?;
            let records: Vec<_> = latest.into_values().collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("serializing ledger records")?
            );
        }
    }

    Ok(())
}
