// suppliersync/src/sync/mod.rs
pub(crate) mod logic;
pub(crate) mod matcher;
pub mod retry;
pub(crate) mod run;
pub(crate) mod writer;

#[cfg(test)]
pub(crate) mod fakes;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::source::sellsy_api::SellsyClient;
use crate::store::airtable_api::AirtableClient;
use crate::utils::artifacts::prepare_artifact_dir;
use crate::utils::http::build_client;

pub use logic::SyncOptions;
pub use run::{RunStatus, SyncRun};

/// Public entry point for one `sync-supplier` run.
///
/// Prepares the artifact directory, authenticates against Sellsy and hands
/// over to the orchestration. `deadline` ends pagination early; `cancel`
/// does the same from outside (Ctrl-C).
pub async fn run_sync_flow(
    app_config: &AppConfig,
    options: SyncOptions,
    deadline: Option<Duration>,
    cancel: CancellationToken,
) -> Result<SyncRun> {
    let artifact_dir = prepare_artifact_dir(&app_config.pdf_storage_dir)?;
    let policy = app_config.settings.retry_policy();
    let http = build_client(app_config.settings.timeout)?;

    let source = policy
        .run("Sellsy authentication", || {
            SellsyClient::connect(&app_config.sellsy, http.clone())
        })
        .await?
        .issued_since(options.issued_since);
    let store = AirtableClient::new(&app_config.airtable, http)?;

    let run_token = cancel.child_token();
    let timer = deadline.map(|limit| {
        let token = run_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!(deadline_secs = limit.as_secs(), "deadline reached, stopping pagination");
            token.cancel();
        })
    });

    let ctx = logic::RunContext {
        source: Arc::new(source),
        store: Arc::new(store),
        settings: app_config.settings.clone(),
        options,
        artifact_dir,
        currency_field: app_config.airtable.currency_field.clone(),
    };
    let outcome = logic::perform_sync_orchestration(ctx, run_token).await;

    if let Some(timer) = timer {
        timer.abort();
    }
    outcome
}
