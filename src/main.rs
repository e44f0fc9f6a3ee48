//! Supplier Invoice Sync Tool
//!
//! Provides CLI interface for reconciling Sellsy supplier invoices into Airtable

// suppliersync/src/main.rs
mod config;
mod errors;
mod invoice;
mod source;
mod store;
mod sync;
mod utils;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use config::AppConfig;
use sync::{RunStatus, SyncOptions};

#[derive(Parser)]
#[command(
    name = "suppliersync",
    version,
    about = "Creates missing Sellsy supplier invoices in Airtable"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG and LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create supplier invoices missing from the Airtable table
    SyncSupplier {
        /// Maximum number of Sellsy invoices to scan
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Only consider invoices issued in the last N days
        #[arg(long)]
        days: Option<u32>,
        /// Stop paginating after this many seconds; queued invoices still finish
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Refresh rows that already exist instead of skipping them
        #[arg(long)]
        update_existing: bool,
        /// Do not download or attach invoice PDFs
        #[arg(long)]
        no_attachments: bool,
    },
    /// Validate configuration without contacting any service
    CheckConfig,
}

/// Main entry point for the supplier sync tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // .env may carry LOG_LEVEL, so load it before the subscriber
    let _ = dotenv::dotenv();
    utils::logging::init_tracing(cli.log_level.as_deref());

    match run_app(cli.command).await {
        Ok(RunStatus::Success) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(status) => {
            eprintln!("⚠️ Sync finished with status {status}, see failed invoices above.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(command: Commands) -> Result<RunStatus> {
    let app_config = AppConfig::from_env().context("Failed to load configuration from environment")?;

    match command {
        Commands::CheckConfig => {
            println!("🔍 Configuration is valid.");
            let mode = if app_config.is_production() { "production" } else { "non-production" };
            println!("Environment: {} ({mode})", app_config.environment);
            println!("Airtable table: {}", app_config.airtable.table_name);
            println!("PDF storage: {}", app_config.pdf_storage_dir.display());
            Ok(RunStatus::Success)
        }
        Commands::SyncSupplier {
            limit,
            days,
            deadline_secs,
            update_existing,
            no_attachments,
        } => {
            println!("🚀 Starting supplier invoice sync...");
            let options = SyncOptions {
                limit,
                issued_since: days
                    .map(|d| (Utc::now() - chrono::Duration::days(i64::from(d))).timestamp()),
                update_existing,
                attach_documents: !no_attachments,
            };

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing queued invoices");
                    interrupt.cancel();
                }
            });

            let run = sync::run_sync_flow(
                &app_config,
                options,
                deadline_secs.map(Duration::from_secs),
                cancel,
            )
            .await
            .context("Supplier sync failed")?;

            println!("📊 Sync summary");
            for line in run.summary_lines() {
                println!("{line}");
            }
            Ok(run.status())
        }
    }
}
