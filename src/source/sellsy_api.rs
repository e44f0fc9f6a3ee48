// suppliersync/src/source/sellsy_api.rs
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::invoice_format::invoice_from_record;
use super::{InvoicePage, InvoiceSource, PageCursor};
use crate::config::SellsyConfig;
use crate::errors::{Result, SyncError};
use crate::invoice::{Document, Invoice};
use crate::utils::artifacts::document_file_name;
use crate::utils::http::{check_status, transport_error, Service};

/// Sellsy caps purchase listings at 100 documents per page.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Client for Sellsy supplier invoices (purchase documents).
///
/// Authenticates once with OAuth2 client credentials; reads go through the
/// purchase feed's `Purchase.*` methods.
pub struct SellsyClient {
    http: Client,
    api_url: Url,
    access_token: String,
    issued_since: Option<i64>,
}

impl SellsyClient {
    /// Exchanges the client id/secret for an access token.
    pub async fn connect(config: &SellsyConfig, http: Client) -> Result<Self> {
        tracing::info!(token_url = %config.token_url, "requesting Sellsy access token");
        let response = http
            .post(config.token_url.clone())
            .basic_auth(&config.client_id, Some(&config.client_secret))
            .header(ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| transport_error(Service::Source, e))?;

        let response = match check_status(Service::Source, response).await {
            Ok(response) => response,
            Err(SyncError::SourceRejected { status, body }) => {
                return Err(SyncError::SourceAuth(format!(
                    "token endpoint answered HTTP {status}: {body}"
                )));
            }
            Err(e) => return Err(e),
        };

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("token response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(SyncError::SourceAuth(
                "token endpoint returned no access_token".to_string(),
            ));
        }

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            access_token: token.access_token,
            issued_since: None,
        })
    }

    /// Restricts listings to invoices dated on or after `since` (unix seconds).
    pub fn issued_since(mut self, since: Option<i64>) -> Self {
        self.issued_since = since;
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_envelope(method, params)
            .await?
            .map_err(|detail| SyncError::SourceUnavailable(format!("{method} failed: {detail}")))
    }

    /// Sends one API call. The outer error is transport or decoding; the
    /// inner one carries the error text of a non-success envelope.
    async fn call_envelope(&self, method: &str, params: Value) -> Result<std::result::Result<Value, String>> {
        let do_in = json!({ "method": method, "params": params }).to_string();
        tracing::debug!(method, "Sellsy API call");

        let response = self
            .http
            .post(self.api_url.clone())
            .bearer_auth(&self.access_token)
            .header(ACCEPT, "application/json")
            .form(&[("request", "1"), ("io_mode", "json"), ("do_in", do_in.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(Service::Source, e))?;
        let response = check_status(Service::Source, response).await?;

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("{method}: {e}")))?;

        match envelope.get("status").and_then(Value::as_str) {
            Some("success") => envelope
                .get("response")
                .cloned()
                .map(Ok)
                .ok_or_else(|| SyncError::Decode(format!("{method}: envelope has no response"))),
            _ => Ok(Err(envelope
                .get("error")
                .map(Value::to_string)
                .unwrap_or_else(|| envelope.to_string()))),
        }
    }
}

fn page_count(response: &Value) -> u32 {
    match response.pointer("/infos/nbpages") {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as u32).unwrap_or(1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(1),
        _ => 1,
    }
}

fn page_invoices(response: &Value) -> Vec<Invoice> {
    match response.get("result") {
        Some(Value::Object(entries)) => entries
            .iter()
            .filter_map(|(id, summary)| {
                if id.trim().is_empty() {
                    tracing::warn!("skipping purchase entry without id");
                    return None;
                }
                invoice_from_record(Some(id), summary)
            })
            .collect(),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|summary| invoice_from_record(None, summary))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl InvoiceSource for SellsyClient {
    async fn list_page(&self, cursor: PageCursor, page_size: usize) -> Result<InvoicePage> {
        let mut params = json!({
            "pagination": {
                "nbperpage": page_size.clamp(1, MAX_PAGE_SIZE),
                "pagenum": cursor.page(),
            },
            "order": { "direction": "DESC", "field": "doc_date" },
            "doctype": "invoice",
        });
        if let Some(since) = self.issued_since {
            params["search"] = json!({ "doc_date": { "from": since } });
        }

        let response = self.call("Purchase.getList", params).await?;
        let invoices = page_invoices(&response);
        let total_pages = page_count(&response);
        tracing::info!(
            page = cursor.page(),
            total_pages,
            count = invoices.len(),
            "fetched supplier invoice page"
        );

        let next = (cursor.page() < total_pages && !invoices.is_empty()).then(|| cursor.next());
        Ok(InvoicePage { invoices, next })
    }

    async fn invoice_details(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        let params = json!({ "id": invoice_id, "includeTags": "N" });
        let response = self.call("Purchase.getOne", params).await?;
        Ok(invoice_from_record(Some(invoice_id), &response))
    }

    async fn download_document(&self, invoice: &Invoice, dir: &Path) -> Result<Option<Document>> {
        let params = json!({ "docid": invoice.id, "filetype": "pdf" });
        // An error envelope here means Sellsy has no PDF for this invoice
        let link = match self.call_envelope("Purchase.getDocumentLink", params).await? {
            Ok(link) => link,
            Err(detail) => {
                tracing::warn!(invoice_id = %invoice.id, %detail, "Sellsy returned no document link");
                return Ok(None);
            }
        };
        let url = link
            .get("download_url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| invoice.document_url.clone());
        let Some(url) = url else {
            tracing::debug!(invoice_id = %invoice.id, "no PDF link for invoice");
            return Ok(None);
        };

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| transport_error(Service::Source, e))?;
        let mut response = check_status(Service::Source, response).await?;

        let file_name = document_file_name(&invoice.id);
        let destination = dir.join(&file_name);
        let staging = tempfile::Builder::new()
            .prefix(".invoice_")
            .suffix(".part")
            .tempfile_in(dir)?;
        let (std_file, staging_path) = staging.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut total_bytes = 0usize;
        let mut magic: Vec<u8> = Vec::with_capacity(4);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(Service::Source, e))?
        {
            if magic.len() < 4 {
                magic.extend(chunk.iter().take(4 - magic.len()));
            }
            file.write_all(&chunk).await?;
            total_bytes += chunk.len();
        }
        file.flush().await?;
        drop(file);

        if total_bytes == 0 {
            tracing::warn!(invoice_id = %invoice.id, "PDF download was empty");
            return Ok(None);
        }
        if magic != b"%PDF" {
            tracing::warn!(invoice_id = %invoice.id, "downloaded file does not look like a PDF");
        }
        staging_path
            .persist(&destination)
            .map_err(|e| SyncError::Io(e.error))?;

        tracing::info!(
            invoice_id = %invoice.id,
            bytes = total_bytes,
            path = %destination.display(),
            "downloaded invoice PDF"
        );
        Ok(Some(Document {
            file_name,
            content_type: "application/pdf".to_string(),
            path: destination,
        }))
    }
}
