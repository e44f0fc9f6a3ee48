// suppliersync/src/sync/run.rs
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why the reader stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    Limit,
    /// Deadline passed or the run was interrupted.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRecord {
    pub invoice_id: String,
    pub reason: String,
}

/// Counters and outcome of one reconciliation run.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub limit: usize,
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub attachments: usize,
    pub failures: Vec<FailedRecord>,
    /// Rows written whose PDF could not be attached; the next run resumes them.
    pub attachments_pending: Vec<String>,
    pub stop_reason: Option<StopReason>,
    pub reader_error: Option<String>,
}

impl SyncRun {
    pub fn new(limit: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            limit,
            scanned: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            attachments: 0,
            failures: Vec::new(),
            attachments_pending: Vec::new(),
            stop_reason: None,
            reader_error: None,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn record_failure(&mut self, invoice_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(run_id = %self.run_id, invoice_id, %reason, "invoice failed");
        self.failures.push(FailedRecord {
            invoice_id: invoice_id.to_string(),
            reason,
        });
    }

    pub fn status(&self) -> RunStatus {
        if self.reader_error.is_some() && self.scanned == 0 {
            return RunStatus::Failed;
        }
        let reader_finished = self.reader_error.is_none()
            && matches!(self.stop_reason, Some(StopReason::Exhausted | StopReason::Limit));
        if reader_finished && self.failures.is_empty() && self.attachments_pending.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }

    /// Human-readable report, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let elapsed = self
            .finished_at
            .map(|end| format!(" in {}s", (end - self.started_at).num_seconds()))
            .unwrap_or_default();
        let mut lines = vec![
            format!("Run {} finished with status {}{elapsed}", self.run_id, self.status()),
            format!(
                "scanned: {}, created: {}, updated: {}, skipped: {}, failed: {}, attachments: {}",
                self.scanned,
                self.created,
                self.updated,
                self.skipped,
                self.failed(),
                self.attachments
            ),
        ];
        match self.stop_reason {
            Some(StopReason::Limit) => lines.push(format!("stopped at the limit of {} invoices", self.limit)),
            Some(StopReason::Cancelled) => lines.push("stopped early: deadline reached or interrupted".to_string()),
            Some(StopReason::Exhausted) | None => {}
        }
        if let Some(error) = &self.reader_error {
            lines.push(format!("reading invoices failed: {error}"));
        }
        for failure in &self.failures {
            lines.push(format!("  failed {}: {}", failure.invoice_id, failure.reason));
        }
        for invoice_id in &self.attachments_pending {
            lines.push(format!("  attachment pending {invoice_id}"));
        }
        lines
    }
}
