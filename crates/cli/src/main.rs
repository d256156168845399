// Feature store CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: Operate directly on the store root (file catalog, batch
// argument files, partition files); no running pipeline is required.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{Context, LocationArgs};

#[derive(Parser)]
#[command(name = "featurestore")]
#[command(about = "Feature store CLI - Inspect feature versions, batches and recover failed datasets")]
#[command(version)]
pub struct Cli {
    /// Store root directory (overrides the config file)
    #[arg(long, env = "FEATURESTORE_ROOT")]
    pub root: Option<PathBuf>,

    /// TOML config file
    #[arg(long, short, env = "FEATURESTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the partition files of a feature version
    Partitions {
        #[command(flatten)]
        location: LocationArgs,
    },

    /// Read rows of a feature version
    Query {
        #[command(flatten)]
        location: LocationArgs,

        /// Exact primary key (repeatable)
        #[arg(long, short, conflicts_with_all = ["start", "end"])]
        key: Vec<i64>,

        /// Inclusive lower key bound
        #[arg(long)]
        start: Option<i64>,

        /// Inclusive upper key bound
        #[arg(long)]
        end: Option<i64>,

        /// Maximum rows to print
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Delete a feature version
    Wipe {
        #[command(flatten)]
        location: LocationArgs,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Copy a feature version to a new version
    CopyVersion {
        #[command(flatten)]
        location: LocationArgs,

        /// Target version
        #[arg(long)]
        to: String,
    },

    /// Print the stored unit arguments of a batch
    BatchArgs {
        /// Batch ID
        batch_id: String,
    },

    /// Show dataset and feature statuses
    Status {
        /// Dataset name or ID
        dataset: String,
    },

    /// Show recorded errors of a dataset
    Errors {
        /// Dataset name or ID
        dataset: String,

        /// Maximum number of errors to show, newest last
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Include the offending data slice
        #[arg(long)]
        slice: bool,
    },

    /// Move a failed feature back to pending
    ResetFeature {
        /// Feature ID
        feature_id: uuid::Uuid,
    },

    /// Move a failed dataset and its failed features back to pending
    ResetDataset {
        /// Dataset name or ID
        dataset: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "featurestore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let ctx = Context::load(
        cli.config.as_deref(),
        cli.root,
        output::OutputFormat::from_str(&cli.output),
        cli.quiet,
    )?;

    match cli.command {
        Commands::Partitions { location } => commands::store::partitions(&ctx, location).await,
        Commands::Query {
            location,
            key,
            start,
            end,
            limit,
        } => commands::store::query(&ctx, location, key, start, end, limit).await,
        Commands::Wipe { location, yes } => commands::store::wipe(&ctx, location, yes).await,
        Commands::CopyVersion { location, to } => {
            commands::store::copy_version(&ctx, location, &to).await
        }
        Commands::BatchArgs { batch_id } => commands::batches::batch_args(&ctx, batch_id).await,
        Commands::Status { dataset } => commands::datasets::status(&ctx, &dataset).await,
        Commands::Errors {
            dataset,
            limit,
            slice,
        } => commands::datasets::errors(&ctx, &dataset, limit, slice).await,
        Commands::ResetFeature { feature_id } => {
            commands::datasets::reset_feature(&ctx, feature_id).await
        }
        Commands::ResetDataset { dataset } => {
            commands::datasets::reset_dataset(&ctx, &dataset).await
        }
    }
}
