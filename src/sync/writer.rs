// suppliersync/src/sync/writer.rs
use chrono::NaiveDate;
use std::path::PathBuf;

use super::matcher::{MatchIndex, MatchOutcome};
use super::retry::RetryPolicy;
use super::run::SyncRun;
use crate::errors::{Result, SyncError};
use crate::invoice::Invoice;
use crate::source::InvoiceSource;
use crate::store::invoice_row::invoice_fields;
use crate::store::{Fields, InvoiceStore, Lookup, StoreRow};

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub update_existing: bool,
    pub attach_documents: bool,
    pub artifact_dir: PathBuf,
    pub currency_field: Option<String>,
    /// Date written for invoices the source reports without one.
    pub run_date: NaiveDate,
}

/// Carries one discovered invoice through match, write and attach.
pub struct Writer<'a> {
    source: &'a dyn InvoiceSource,
    store: &'a dyn InvoiceStore,
    policy: &'a RetryPolicy,
    options: &'a WriterOptions,
}

impl<'a> Writer<'a> {
    pub fn new(
        source: &'a dyn InvoiceSource,
        store: &'a dyn InvoiceStore,
        policy: &'a RetryPolicy,
        options: &'a WriterOptions,
    ) -> Self {
        Self {
            source,
            store,
            policy,
            options,
        }
    }

    /// Processes one invoice. Record-level failures are recorded on `run`;
    /// only fatal errors (rejected credentials) are returned.
    pub async fn process(&self, index: &mut MatchIndex, invoice: Invoice, run: &mut SyncRun) -> Result<()> {
        run.scanned += 1;
        let invoice_id = invoice.id.clone();

        let outcome = match index.classify(&invoice_id) {
            MatchOutcome::Absent => self.confirm_absent(&invoice_id).await,
            known => Ok(known),
        };

        let result = match outcome {
            Ok(MatchOutcome::Present(row)) => self.refresh_present(index, &invoice, row, run).await,
            Ok(MatchOutcome::Absent) => self.create(index, invoice, run).await,
            Ok(MatchOutcome::Ambiguous(rows)) => Err(SyncError::AmbiguousMatch {
                id: invoice_id.clone(),
                rows,
            }),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                run.record_failure(&invoice_id, err.to_string());
                Ok(())
            }
        }
    }

    /// Asks the store directly before trusting an `Absent` from the index.
    async fn confirm_absent(&self, invoice_id: &str) -> Result<MatchOutcome> {
        let lookup = self
            .policy
            .run("confirm invoice absent", || self.store.find(invoice_id))
            .await?;
        Ok(match lookup {
            Lookup::Absent => MatchOutcome::Absent,
            Lookup::Ambiguous(rows) => MatchOutcome::Ambiguous(rows),
            Lookup::Found(row) => {
                tracing::warn!(
                    invoice_id,
                    row_id = %row.row_id,
                    "row created by another writer since the index was loaded"
                );
                MatchOutcome::Present(row)
            }
        })
    }

    async fn refresh_present(
        &self,
        index: &mut MatchIndex,
        invoice: &Invoice,
        row: StoreRow,
        run: &mut SyncRun,
    ) -> Result<()> {
        index.record(row.clone());
        if self.options.update_existing {
            let invoice = self.enrich(invoice.clone()).await?;
            let fields = invoice_fields(&invoice, self.options.run_date, self.options.currency_field.as_deref());
            self.policy
                .run("update row", || self.store.update(&row.row_id, &fields))
                .await?;
            run.updated += 1;
            tracing::info!(invoice_id = %invoice.id, row_id = %row.row_id, "row updated");
        } else {
            run.skipped += 1;
            tracing::debug!(invoice_id = %invoice.id, "already present, skipped");
        }

        if self.options.attach_documents && !row.has_attachment {
            tracing::info!(invoice_id = %invoice.id, "resuming missing attachment");
            self.attach(index, invoice, &row.row_id, run).await?;
        }
        Ok(())
    }

    async fn create(&self, index: &mut MatchIndex, summary: Invoice, run: &mut SyncRun) -> Result<()> {
        let invoice = self.enrich(summary).await?;
        if invoice.issue_date.is_none() {
            tracing::warn!(invoice_id = %invoice.id, run_date = %self.options.run_date, "invoice has no usable date, using run date");
        }
        let fields = invoice_fields(&invoice, self.options.run_date, self.options.currency_field.as_deref());

        let row_id = match self.insert_confirmed(&invoice.id, &fields).await {
            Ok(row_id) => row_id,
            Err(SyncError::WriteConflict(_)) => {
                tracing::warn!(invoice_id = %invoice.id, "write conflict, row already exists; skipped");
                run.skipped += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        index.record(StoreRow {
            row_id: row_id.clone(),
            invoice_id: invoice.id.clone(),
            has_attachment: false,
        });
        run.created += 1;
        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            supplier = %invoice.supplier_name,
            row_id = %row_id,
            "invoice created"
        );

        if self.options.attach_documents {
            self.attach(index, &invoice, &row_id, run).await?;
        }
        Ok(())
    }

    /// Full record from the source; the summary stands in when details are
    /// unavailable. Rejected credentials are returned.
    async fn enrich(&self, summary: Invoice) -> Result<Invoice> {
        let details = self
            .policy
            .run("invoice details", || self.source.invoice_details(&summary.id))
            .await;
        match details {
            Ok(Some(details)) => Ok(Invoice {
                document_url: details.document_url.clone().or(summary.document_url),
                ..details
            }),
            Ok(None) => Ok(summary),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                tracing::warn!(invoice_id = %summary.id, error = %err, "details unavailable, using list summary");
                Ok(summary)
            }
        }
    }

    /// Inserts without risking a duplicate row.
    ///
    /// A transient failure may hide a write that landed, so the store is
    /// checked before each new attempt and an existing row is adopted.
    async fn insert_confirmed(&self, invoice_id: &str, fields: &Fields) -> Result<String> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.policy.attempt(self.store.insert(invoice_id, fields)).await {
                Ok(row_id) => return Ok(row_id),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            match self.policy.run("confirm insert", || self.store.find(invoice_id)).await {
                Ok(Lookup::Found(row)) => {
                    tracing::info!(invoice_id, row_id = %row.row_id, "insert landed despite error");
                    return Ok(row.row_id);
                }
                Ok(Lookup::Ambiguous(rows)) => {
                    return Err(SyncError::AmbiguousMatch {
                        id: invoice_id.to_string(),
                        rows,
                    });
                }
                Ok(Lookup::Absent) if attempt < attempts => {
                    self.policy.pause_after("insert row", &err, attempt).await;
                }
                Ok(Lookup::Absent) => return Err(err),
                Err(confirm_err) => {
                    tracing::warn!(invoice_id, error = %confirm_err, "cannot confirm insert outcome, not retrying");
                    return Err(err);
                }
            }
        }
    }

    /// Downloads and attaches the PDF. Failures leave the row for the next
    /// run, except rejected credentials which are returned.
    async fn attach(&self, index: &mut MatchIndex, invoice: &Invoice, row_id: &str, run: &mut SyncRun) -> Result<()> {
        let dir = self.options.artifact_dir.as_path();
        let document = match self
            .policy
            .run("download document", || self.source.download_document(invoice, dir))
            .await
        {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::info!(invoice_id = %invoice.id, "no PDF available for invoice");
                return Ok(());
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(invoice_id = %invoice.id, error = %err, "PDF download failed, attachment pending");
                run.attachments_pending.push(invoice.id.clone());
                return Ok(());
            }
        };

        match self
            .policy
            .run("attach document", || self.store.attach(row_id, &document))
            .await
        {
            Ok(()) => {
                index.mark_attached(&invoice.id, row_id);
                run.attachments += 1;
                tracing::info!(invoice_id = %invoice.id, file = %document.file_name, "PDF attached");
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(invoice_id = %invoice.id, error = %err, "PDF upload failed, attachment pending");
                run.attachments_pending.push(invoice.id.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::invoice_row::{FIELD_NUMBER, FIELD_STATUS};
    use crate::sync::fakes::{invoice, row, Fault, FakeSource, FakeStore, SourceFault};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn options(dir: &TempDir) -> WriterOptions {
        WriterOptions {
            update_existing: false,
            attach_documents: true,
            artifact_dir: dir.path().to_path_buf(),
            currency_field: None,
            run_date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        }
    }

    async fn process_one(
        source: &FakeSource,
        store: &FakeStore,
        options: &WriterOptions,
        index: &mut MatchIndex,
        id: &str,
    ) -> (SyncRun, Result<()>) {
        let policy = fast_policy();
        let writer = Writer::new(source, store, &policy, options);
        let mut run = SyncRun::new(10);
        let result = writer.process(index, invoice(id), &mut run).await;
        (run, result)
    }

    #[tokio::test]
    async fn absent_invoice_is_created_enriched_and_attached() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!((run.created, run.attachments, run.failed()), (1, 1, 0));
        let rows = store.rows_for("B");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].has_attachment);
        let fields = store.fields_of(&rows[0].row_id).unwrap();
        assert_eq!(fields[FIELD_NUMBER], json!("FF-B"));
        assert_eq!(fields[FIELD_STATUS], json!("Non payée"));
        assert!(matches!(index.classify("B"), MatchOutcome::Present(r) if r.has_attachment));
    }

    #[tokio::test]
    async fn transient_insert_that_landed_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_insert("B", &[Fault::LandedThenUnavailable]);
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!(run.created, 1);
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(store.rows_for("B").len(), 1);
    }

    #[tokio::test]
    async fn transient_insert_that_did_not_land_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_insert("B", &[Fault::Unavailable, Fault::Unavailable]);
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!(run.created, 1);
        assert_eq!(store.insert_calls(), 3);
        assert_eq!(store.rows_for("B").len(), 1);
    }

    #[tokio::test]
    async fn insert_is_not_retried_when_outcome_cannot_be_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_insert("B", &[Fault::Unavailable]);
        // pre-insert check passes, the confirmation after the failed insert errors
        store.fail_find("B", &[None, Some(Fault::Unavailable)]);
        let mut index = MatchIndex::default();
        let policy = RetryPolicy { max_attempts: 1, ..fast_policy() };
        let options = options(&dir);
        let writer = Writer::new(&source, &store, &policy, &options);
        let mut run = SyncRun::new(10);

        writer.process(&mut index, invoice("B"), &mut run).await.unwrap();

        assert_eq!(run.created, 0);
        assert_eq!(run.failed(), 1);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn store_lookup_error_is_never_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_find("B", &[Some(Fault::Unavailable); 3]);
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!(run.failed(), 1);
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn row_created_elsewhere_since_index_load_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.add_row(row("recX", "B", true));
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!((run.created, run.skipped), (0, 1));
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn present_rows_are_updated_in_update_mode() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["A"]);
        let store = FakeStore::with_rows(vec![row("rec1", "A", true)]);
        let mut index = MatchIndex::from_rows(vec![row("rec1", "A", true)]);
        let options = WriterOptions {
            update_existing: true,
            ..options(&dir)
        };

        let (run, result) = process_one(&source, &store, &options, &mut index, "A").await;
        result.unwrap();

        assert_eq!((run.updated, run.skipped), (1, 0));
        assert_eq!(store.updated(), vec!["rec1".to_string()]);
        assert!(store.attached().is_empty());
    }

    #[tokio::test]
    async fn missing_attachment_is_resumed_without_new_row() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["A"]);
        let store = FakeStore::with_rows(vec![row("rec1", "A", false)]);
        let mut index = MatchIndex::from_rows(vec![row("rec1", "A", false)]);

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "A").await;
        result.unwrap();

        assert_eq!((run.skipped, run.attachments, run.created), (1, 1, 0));
        assert_eq!(store.attached(), vec!["rec1".to_string()]);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn rejected_write_fails_only_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_insert("B", &[Fault::Rejected]);
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!(run.failed(), 1);
        assert_eq!(run.failures[0].invoice_id, "B");
        assert!(run.failures[0].reason.contains("422"));
    }

    #[tokio::test]
    async fn rejected_credentials_abort() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        store.fail_insert("B", &[Fault::Auth]);
        let mut index = MatchIndex::default();

        let (_, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        assert!(matches!(result, Err(SyncError::StoreAuth(_))));
    }

    #[tokio::test]
    async fn expired_source_token_during_details_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]).failing_details(SourceFault::Auth);
        let store = FakeStore::default();
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;

        assert!(matches!(result, Err(SyncError::SourceAuth(_))));
        assert_eq!(store.insert_calls(), 0);
        assert_eq!(run.failed(), 0);
    }

    #[tokio::test]
    async fn expired_source_token_during_download_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]).failing_downloads(SourceFault::Auth);
        let store = FakeStore::default();
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;

        assert!(matches!(result, Err(SyncError::SourceAuth(_))));
        assert_eq!(run.created, 1);
        assert!(run.attachments_pending.is_empty());
    }

    #[tokio::test]
    async fn throttled_download_is_only_pending() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]).failing_downloads(SourceFault::RateLimited(None));
        let store = FakeStore::default();
        let mut index = MatchIndex::default();

        let (run, result) = process_one(&source, &store, &options(&dir), &mut index, "B").await;
        result.unwrap();

        assert_eq!(run.created, 1);
        assert_eq!(run.attachments_pending, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn documents_are_skipped_when_attachments_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::single_page(&["B"]);
        let store = FakeStore::default();
        let mut index = MatchIndex::default();
        let options = WriterOptions {
            attach_documents: false,
            ..options(&dir)
        };

        let (run, result) = process_one(&source, &store, &options, &mut index, "B").await;
        result.unwrap();

        assert_eq!((run.created, run.attachments), (1, 0));
        assert!(store.attached().is_empty());
        assert!(run.attachments_pending.is_empty());
    }
}
