// suppliersync/src/sync/fakes.rs
//! In-memory source and store used by the sync tests.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{Result, SyncError};
use crate::invoice::{Document, Invoice};
use crate::source::{InvoicePage, InvoiceSource, PageCursor};
use crate::store::{Fields, InvoiceStore, Lookup, RowPage, StoreRow};

const FAKE_PAGE_SIZE: usize = 100;

pub fn row(row_id: &str, invoice_id: &str, has_attachment: bool) -> StoreRow {
    StoreRow {
        row_id: row_id.to_string(),
        invoice_id: invoice_id.to_string(),
        has_attachment,
    }
}

pub fn invoice(id: &str) -> Invoice {
    Invoice {
        supplier_name: format!("Supplier {id}"),
        status: "unpaid".to_string(),
        ..Invoice::with_id(id)
    }
}

/// Failure injected into a store call.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Unavailable,
    Conflict,
    Rejected,
    Auth,
    /// The write lands but the caller sees a transient error.
    LandedThenUnavailable,
}

impl Fault {
    fn error(self, invoice_id: &str) -> SyncError {
        match self {
            Fault::Unavailable | Fault::LandedThenUnavailable => {
                SyncError::StoreUnavailable("connection reset".to_string())
            }
            Fault::Conflict => SyncError::WriteConflict(invoice_id.to_string()),
            Fault::Rejected => SyncError::StoreRejected {
                status: 422,
                body: "INVALID_VALUE_FOR_COLUMN".to_string(),
            },
            Fault::Auth => SyncError::StoreAuth("401 Unauthorized".to_string()),
        }
    }
}

/// Failure injected into a source call.
#[derive(Debug, Clone, Copy)]
pub enum SourceFault {
    RateLimited(Option<Duration>),
    /// Access token revoked or expired.
    Auth,
}

impl SourceFault {
    fn error(self) -> SyncError {
        match self {
            SourceFault::RateLimited(retry_after) => SyncError::SourceRateLimited { retry_after },
            SourceFault::Auth => SyncError::SourceAuth("401 token expired".to_string()),
        }
    }
}

pub struct FakeSource {
    pages: Vec<Vec<Invoice>>,
    failing_page: Option<u32>,
    page_faults: Mutex<HashMap<u32, VecDeque<SourceFault>>>,
    details_fault: Option<SourceFault>,
    download_fault: Option<SourceFault>,
    list_delay: Duration,
    documents: bool,
    requested: Mutex<Vec<u32>>,
    served: AtomicUsize,
}

impl FakeSource {
    pub fn new(pages: Vec<Vec<Invoice>>) -> Self {
        Self {
            pages,
            failing_page: None,
            page_faults: Mutex::new(HashMap::new()),
            details_fault: None,
            download_fault: None,
            list_delay: Duration::ZERO,
            documents: true,
            requested: Mutex::new(Vec::new()),
            served: AtomicUsize::new(0),
        }
    }

    pub fn single_page(ids: &[&str]) -> Self {
        Self::new(vec![ids.iter().map(|id| invoice(id)).collect()])
    }

    /// 1-based page that always answers 503.
    pub fn failing_at(mut self, page: u32) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// Queues a fault for the next request of `page`; later requests succeed.
    pub fn fault_once_at(mut self, page: u32, fault: SourceFault) -> Self {
        self.page_faults
            .get_mut()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(fault);
        self
    }

    pub fn failing_details(mut self, fault: SourceFault) -> Self {
        self.details_fault = Some(fault);
        self
    }

    pub fn failing_downloads(mut self, fault: SourceFault) -> Self {
        self.download_fault = Some(fault);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn without_documents(mut self) -> Self {
        self.documents = false;
        self
    }

    pub fn list_calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    /// Pages requested so far, in order, retries included.
    pub fn requested_pages(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }

    /// Invoices handed out across all pages.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvoiceSource for FakeSource {
    async fn list_page(&self, cursor: PageCursor, page_size: usize) -> Result<InvoicePage> {
        self.requested.lock().unwrap().push(cursor.page());
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if self.failing_page == Some(cursor.page()) {
            return Err(SyncError::SourceUnavailable("503 Service Unavailable".to_string()));
        }
        let fault = self
            .page_faults
            .lock()
            .unwrap()
            .get_mut(&cursor.page())
            .and_then(VecDeque::pop_front);
        if let Some(fault) = fault {
            return Err(fault.error());
        }

        let index = cursor.page() as usize - 1;
        let invoices: Vec<Invoice> = self
            .pages
            .get(index)
            .map(|page| page.iter().take(page_size).cloned().collect())
            .unwrap_or_default();
        self.served.fetch_add(invoices.len(), Ordering::SeqCst);
        let next = (index + 1 < self.pages.len()).then(|| cursor.next());
        Ok(InvoicePage { invoices, next })
    }

    async fn invoice_details(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        if let Some(fault) = self.details_fault {
            return Err(fault.error());
        }
        Ok(self
            .pages
            .iter()
            .flatten()
            .find(|invoice| invoice.id == invoice_id)
            .map(|invoice| Invoice {
                number: format!("FF-{invoice_id}"),
                ..invoice.clone()
            }))
    }

    async fn download_document(&self, invoice: &Invoice, dir: &Path) -> Result<Option<Document>> {
        if let Some(fault) = self.download_fault {
            return Err(fault.error());
        }
        if !self.documents {
            return Ok(None);
        }
        let file_name = format!("invoice_{}.pdf", invoice.id);
        let path = dir.join(&file_name);
        tokio::fs::write(&path, b"%PDF-1.4 fake").await?;
        Ok(Some(Document {
            file_name,
            content_type: "application/pdf".to_string(),
            path,
        }))
    }
}

#[derive(Default)]
struct StoreState {
    rows: Vec<StoreRow>,
    fields: HashMap<String, Fields>,
    next_id: usize,
    list_calls: usize,
    insert_calls: usize,
    fail_listing: bool,
    insert_faults: HashMap<String, VecDeque<Fault>>,
    find_faults: HashMap<String, VecDeque<Option<Fault>>>,
    failing_attachments: HashSet<String>,
    updated: Vec<String>,
    attached: Vec<String>,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn with_rows(rows: impl IntoIterator<Item = StoreRow>) -> Self {
        let store = FakeStore::default();
        {
            let mut state = store.state.lock().unwrap();
            state.rows = rows.into_iter().collect();
            state.next_id = state.rows.len();
        }
        store
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    /// Queues faults returned by successive inserts of `invoice_id`.
    pub fn fail_insert(&self, invoice_id: &str, faults: &[Fault]) {
        self.state
            .lock()
            .unwrap()
            .insert_faults
            .insert(invoice_id.to_string(), faults.iter().copied().collect());
    }

    /// Scripts successive lookups of `invoice_id`; `None` lets that call through.
    pub fn fail_find(&self, invoice_id: &str, faults: &[Option<Fault>]) {
        self.state
            .lock()
            .unwrap()
            .find_faults
            .insert(invoice_id.to_string(), faults.iter().copied().collect());
    }

    pub fn fail_attachments_for(&self, invoice_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_attachments
            .insert(invoice_id.to_string());
    }

    pub fn heal_attachments(&self) {
        self.state.lock().unwrap().failing_attachments.clear();
    }

    /// Adds a row behind the caller's back, as another process would.
    pub fn add_row(&self, row: StoreRow) {
        self.state.lock().unwrap().rows.push(row);
    }

    pub fn rows_for(&self, invoice_id: &str) -> Vec<StoreRow> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn fields_of(&self, row_id: &str) -> Option<Fields> {
        self.state.lock().unwrap().fields.get(row_id).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.state.lock().unwrap().insert_calls
    }

    pub fn updated(&self) -> Vec<String> {
        self.state.lock().unwrap().updated.clone()
    }

    pub fn attached(&self) -> Vec<String> {
        self.state.lock().unwrap().attached.clone()
    }
}

#[async_trait]
impl InvoiceStore for FakeStore {
    async fn list_rows(&self, offset: Option<&str>) -> Result<RowPage> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_listing {
            return Err(SyncError::StoreUnavailable("502 Bad Gateway".to_string()));
        }

        let start: usize = offset.and_then(|o| o.parse().ok()).unwrap_or(0);
        let end = (start + FAKE_PAGE_SIZE).min(state.rows.len());
        let rows = state.rows.get(start..end).unwrap_or_default().to_vec();
        let next_offset = (end < state.rows.len()).then(|| end.to_string());
        Ok(RowPage { rows, next_offset })
    }

    async fn find(&self, invoice_id: &str) -> Result<Lookup> {
        let mut state = self.state.lock().unwrap();
        if let Some(Some(fault)) = state.find_faults.get_mut(invoice_id).and_then(VecDeque::pop_front) {
            return Err(fault.error(invoice_id));
        }

        let mut matches: Vec<StoreRow> = state
            .rows
            .iter()
            .filter(|r| r.invoice_id == invoice_id)
            .cloned()
            .collect();
        Ok(match matches.len() {
            0 => Lookup::Absent,
            1 => Lookup::Found(matches.remove(0)),
            n => Lookup::Ambiguous(n),
        })
    }

    async fn insert(&self, invoice_id: &str, fields: &Fields) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.insert_calls += 1;
        let fault = state.insert_faults.get_mut(invoice_id).and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::LandedThenUnavailable) | None => {}
            Some(fault) => return Err(fault.error(invoice_id)),
        }

        state.next_id += 1;
        let row_id = format!("rec{}", state.next_id);
        state.rows.push(row(&row_id, invoice_id, false));
        state.fields.insert(row_id.clone(), fields.clone());
        match fault {
            Some(fault) => Err(fault.error(invoice_id)),
            None => Ok(row_id),
        }
    }

    async fn update(&self, row_id: &str, fields: &Fields) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.fields.insert(row_id.to_string(), fields.clone());
        state.updated.push(row_id.to_string());
        Ok(())
    }

    async fn attach(&self, row_id: &str, document: &Document) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let invoice_id = state
            .rows
            .iter()
            .find(|r| r.row_id == row_id)
            .map(|r| r.invoice_id.clone())
            .ok_or_else(|| SyncError::StoreRejected {
                status: 404,
                body: format!("unknown row {row_id}"),
            })?;
        if state.failing_attachments.contains(&invoice_id) {
            return Err(SyncError::StoreUnavailable("upload failed".to_string()));
        }
        assert!(document.path.exists(), "attached document must exist on disk");

        if let Some(row) = state.rows.iter_mut().find(|r| r.row_id == row_id) {
            row.has_attachment = true;
        }
        state.attached.push(row_id.to_string());
        Ok(())
    }
}
