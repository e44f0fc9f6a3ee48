// suppliersync/src/sync/logic.rs
use std::path::PathBuf;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::matcher::MatchIndex;
use super::retry::RetryPolicy;
use super::run::{StopReason, SyncRun};
use super::writer::{Writer, WriterOptions};
use crate::config::{SyncSettings, MAX_IN_FLIGHT_CAP};
use crate::errors::{Result, SyncError};
use crate::invoice::Invoice;
use crate::source::{InvoiceSource, PageCursor};
use crate::source::sellsy_api::MAX_PAGE_SIZE;
use crate::store::InvoiceStore;

/// What one run is allowed to do.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of source invoices scanned.
    pub limit: usize,
    /// Only invoices dated on or after this unix timestamp.
    pub issued_since: Option<i64>,
    pub update_existing: bool,
    pub attach_documents: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: 1000,
            issued_since: None,
            update_existing: false,
            attach_documents: true,
        }
    }
}

/// Everything the orchestration needs, already connected.
pub(crate) struct RunContext {
    pub source: Arc<dyn InvoiceSource>,
    pub store: Arc<dyn InvoiceStore>,
    pub settings: SyncSettings,
    pub options: SyncOptions,
    pub artifact_dir: PathBuf,
    pub currency_field: Option<String>,
}

struct ReaderOutcome {
    stop: StopReason,
    error: Option<SyncError>,
}

/// Producer side: pages through the source until exhausted, the limit is
/// reached or the token is cancelled. Blocks on the channel when the
/// writer falls behind.
async fn read_invoices(
    source: Arc<dyn InvoiceSource>,
    policy: RetryPolicy,
    limit: usize,
    tx: mpsc::Sender<Invoice>,
    cancel: CancellationToken,
) -> ReaderOutcome {
    let page_size = limit.clamp(1, MAX_PAGE_SIZE);
    let mut cursor = PageCursor::first();
    let mut sent = 0usize;

    if limit == 0 {
        return ReaderOutcome { stop: StopReason::Limit, error: None };
    }

    loop {
        let page = tokio::select! {
            _ = cancel.cancelled() => {
                return ReaderOutcome { stop: StopReason::Cancelled, error: None };
            }
            page = policy.run("list invoices", || source.list_page(cursor, page_size)) => page,
        };
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                tracing::error!(page = cursor.page(), error = %err, "reading invoice page failed");
                return ReaderOutcome { stop: StopReason::Cancelled, error: Some(err) };
            }
        };

        for invoice in page.invoices {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return ReaderOutcome { stop: StopReason::Cancelled, error: None };
                }
                sent_ok = tx.send(invoice) => {
                    if sent_ok.is_err() {
                        // writer gone, nothing left to feed
                        return ReaderOutcome { stop: StopReason::Cancelled, error: None };
                    }
                }
            }
            sent += 1;
            if sent >= limit {
                tracing::info!(limit, "invoice limit reached, stopping pagination");
                return ReaderOutcome { stop: StopReason::Limit, error: None };
            }
        }

        match page.next {
            Some(next) => cursor = next,
            None => return ReaderOutcome { stop: StopReason::Exhausted, error: None },
        }
    }
}

/// Loads the destination index, then streams source invoices through the
/// writer. Fails only when the index cannot be loaded or either side
/// rejects its credentials mid-run; everything else is reported on the
/// returned run.
pub(crate) async fn perform_sync_orchestration(ctx: RunContext, cancel: CancellationToken) -> Result<SyncRun> {
    let mut run = SyncRun::new(ctx.options.limit);
    let policy = ctx.settings.retry_policy();
    tracing::info!(
        run_id = %run.run_id,
        limit = ctx.options.limit,
        update_existing = ctx.options.update_existing,
        attach_documents = ctx.options.attach_documents,
        "starting supplier invoice sync"
    );

    let mut index = MatchIndex::load(ctx.store.as_ref(), &policy).await?;

    let capacity = ctx.settings.max_in_flight.clamp(1, MAX_IN_FLIGHT_CAP);
    let (tx, mut rx) = mpsc::channel(capacity);
    let reader_cancel = cancel.child_token();
    let reader = tokio::spawn(read_invoices(
        Arc::clone(&ctx.source),
        policy.clone(),
        ctx.options.limit,
        tx,
        reader_cancel.clone(),
    ));

    let writer_options = WriterOptions {
        update_existing: ctx.options.update_existing,
        attach_documents: ctx.options.attach_documents,
        artifact_dir: ctx.artifact_dir.clone(),
        currency_field: ctx.currency_field.clone(),
        run_date: run.started_at.date_naive(),
    };
    let writer = Writer::new(ctx.source.as_ref(), ctx.store.as_ref(), &policy, &writer_options);

    let mut processed = 0usize;
    let mut fatal = None;
    while let Some(invoice) = rx.recv().await {
        if let Err(err) = writer.process(&mut index, invoice, &mut run).await {
            tracing::error!(error = %err, "fatal error, aborting run");
            fatal = Some(err);
            reader_cancel.cancel();
            break;
        }
        processed += 1;

        let settings = &ctx.settings;
        if settings.pause_every > 0 && !settings.pause.is_zero() && processed % settings.pause_every == 0 {
            tracing::debug!(processed, pause_ms = settings.pause.as_millis() as u64, "pacing pause");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(settings.pause) => {}
            }
        }
    }
    drop(rx);

    let outcome = reader.await;
    if let Some(err) = fatal {
        return Err(err);
    }
    match outcome {
        Ok(ReaderOutcome { error: Some(err), .. }) if err.is_fatal() => {
            tracing::error!(error = %err, "source credentials rejected, aborting run");
            return Err(err);
        }
        Ok(outcome) => {
            run.stop_reason = Some(outcome.stop);
            run.reader_error = outcome.error.map(|e| e.to_string());
        }
        Err(join_err) => {
            run.stop_reason = Some(StopReason::Cancelled);
            run.reader_error = Some(format!("reader task failed: {join_err}"));
        }
    }
    run.finished_at = Some(Utc::now());

    tracing::info!(
        run_id = %run.run_id,
        status = %run.status(),
        scanned = run.scanned,
        created = run.created,
        updated = run.updated,
        skipped = run.skipped,
        failed = run.failed(),
        attachments = run.attachments,
        "supplier invoice sync finished"
    );
    Ok(run)
}
