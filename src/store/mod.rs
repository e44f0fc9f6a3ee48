// suppliersync/src/store/mod.rs
pub(crate) mod airtable_api;
pub(crate) mod invoice_row;

use async_trait::async_trait;

use crate::errors::Result;
use crate::invoice::Document;

/// Field values of one destination row, keyed by column name.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A destination row already carrying an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub row_id: String,
    pub invoice_id: String,
    pub has_attachment: bool,
}

/// Outcome of looking an invoice up in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(StoreRow),
    /// Definitive negative from the store.
    Absent,
    /// More than one row carries the identifier.
    Ambiguous(usize),
}

#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<StoreRow>,
    /// Continuation token; `None` on the last page.
    pub next_offset: Option<String>,
}

/// Write capability over the tabular destination.
///
/// Each method is one attempt. `insert` is not idempotent: callers must
/// confirm through `find` before retrying it.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn list_rows(&self, offset: Option<&str>) -> Result<RowPage>;

    async fn find(&self, invoice_id: &str) -> Result<Lookup>;

    /// Creates a row and returns its identifier.
    async fn insert(&self, invoice_id: &str, fields: &Fields) -> Result<String>;

    async fn update(&self, row_id: &str, fields: &Fields) -> Result<()>;

    async fn attach(&self, row_id: &str, document: &Document) -> Result<()>;
}
