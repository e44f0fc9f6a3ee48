// suppliersync/src/sync/matcher.rs
use std::collections::HashMap;

use super::retry::RetryPolicy;
use crate::errors::Result;
use crate::store::{InvoiceStore, StoreRow};

/// Membership of an invoice in the destination index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Present(StoreRow),
    Absent,
    Ambiguous(usize),
}

/// Destination rows keyed by invoice identifier, built fresh for every run.
#[derive(Debug, Default)]
pub struct MatchIndex {
    rows: HashMap<String, Vec<StoreRow>>,
}

impl MatchIndex {
    pub fn from_rows(rows: impl IntoIterator<Item = StoreRow>) -> Self {
        let mut index = MatchIndex::default();
        for row in rows {
            index.record(row);
        }
        index
    }

    /// Pages through the whole table. Any page that still fails after
    /// retries fails the load.
    pub async fn load(store: &dyn InvoiceStore, policy: &RetryPolicy) -> Result<Self> {
        let mut rows = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = policy
                .run("load destination index", || store.list_rows(offset.as_deref()))
                .await?;
            pages += 1;
            rows.extend(page.rows);
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        let index = Self::from_rows(rows);
        tracing::info!(pages, invoices = index.len(), "destination index loaded");
        Ok(index)
    }

    /// Exact-match lookup on the external identifier.
    pub fn classify(&self, invoice_id: &str) -> MatchOutcome {
        match self.rows.get(invoice_id).map(Vec::as_slice) {
            None | Some([]) => MatchOutcome::Absent,
            Some([row]) => MatchOutcome::Present(row.clone()),
            Some(rows) => MatchOutcome::Ambiguous(rows.len()),
        }
    }

    /// Adds a row; a row id already known for the invoice replaces the old entry.
    pub fn record(&mut self, row: StoreRow) {
        let rows = self.rows.entry(row.invoice_id.clone()).or_default();
        match rows.iter_mut().find(|known| known.row_id == row.row_id) {
            Some(known) => *known = row,
            None => rows.push(row),
        }
    }

    pub fn mark_attached(&mut self, invoice_id: &str, row_id: &str) {
        if let Some(row) = self
            .rows
            .get_mut(invoice_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.row_id == row_id))
        {
            row.has_attachment = true;
        }
    }

    /// Number of distinct invoice identifiers.
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
