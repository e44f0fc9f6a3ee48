// suppliersync/src/source/mod.rs
pub(crate) mod invoice_format;
pub(crate) mod sellsy_api;

use async_trait::async_trait;
use std::path::Path;

use crate::errors::Result;
use crate::invoice::{Document, Invoice};

/// Opaque continuation cursor into the source's paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(u32);

impl PageCursor {
    pub fn first() -> Self {
        PageCursor(1)
    }

    pub(crate) fn page(self) -> u32 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        PageCursor(self.0 + 1)
    }
}

/// One page of the source listing. `next` is `None` once the listing is exhausted.
#[derive(Debug, Clone)]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    pub next: Option<PageCursor>,
}

/// Read capability over the invoicing system.
///
/// Each method is one attempt; callers wrap calls in a `RetryPolicy`.
/// Re-requesting the same cursor must return the same page.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    async fn list_page(&self, cursor: PageCursor, page_size: usize) -> Result<InvoicePage>;

    /// Full record for one invoice, if the source still knows it.
    async fn invoice_details(&self, invoice_id: &str) -> Result<Option<Invoice>>;

    /// Downloads the rendered PDF into `dir`. `None` when the source has no document.
    async fn download_document(&self, invoice: &Invoice, dir: &Path) -> Result<Option<Document>>;
}
