// suppliersync/src/store/airtable_api.rs
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::invoice_row::{FIELD_ATTACHMENT, FIELD_INVOICE_ID};
use super::{Fields, InvoiceStore, Lookup, RowPage, StoreRow};
use crate::config::AirtableConfig;
use crate::errors::{Result, SyncError};
use crate::invoice::Document;
use crate::utils::http::{check_status, transport_error, Service};

const PAGE_SIZE: &str = "100";
/// Airtable refuses base64 uploads above 5 MB.
const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<Record>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default)]
    fields: Fields,
}

impl Record {
    fn into_row(self) -> Option<StoreRow> {
        let invoice_id = match self.fields.get(FIELD_INVOICE_ID) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let has_attachment = matches!(
            self.fields.get(FIELD_ATTACHMENT),
            Some(Value::Array(files)) if !files.is_empty()
        );
        Some(StoreRow {
            row_id: self.id,
            invoice_id,
            has_attachment,
        })
    }
}

/// Escapes a value for a single-quoted Airtable formula string.
pub fn formula_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Client for the supplier-invoice table of one Airtable base.
pub struct AirtableClient {
    http: Client,
    api_key: String,
    table_url: Url,
    content_url: Url,
}

impl AirtableClient {
    pub fn new(config: &AirtableConfig, http: Client) -> Result<Self> {
        let table_url = with_segments(&config.api_url, &[&config.base_id, &config.table_name])?;
        let content_url = with_segments(&config.content_url, &[&config.base_id])?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            table_url,
            content_url,
        })
    }

    fn record_url(&self, row_id: &str) -> Result<Url> {
        with_segments(&self.table_url, &[row_id])
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(Service::Store, e))?;
        check_status(Service::Store, response).await
    }

    async fn list(&self, query: &[(&str, &str)]) -> Result<RecordList> {
        let response = self.send(self.http.get(self.table_url.clone()).query(query)).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("Airtable record list: {e}")))
    }
}

fn with_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::ConfigInvalid(format!("{base} cannot be used as an API base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn is_duplicate(err: &SyncError) -> bool {
    match err {
        SyncError::StoreRejected { status, body } => {
            *status == StatusCode::CONFLICT.as_u16()
                || (*status == StatusCode::UNPROCESSABLE_ENTITY.as_u16()
                    && body.to_uppercase().contains("DUPLICATE"))
        }
        _ => false,
    }
}

#[async_trait]
impl InvoiceStore for AirtableClient {
    async fn list_rows(&self, offset: Option<&str>) -> Result<RowPage> {
        let mut query = vec![
            ("pageSize", PAGE_SIZE),
            ("fields[]", FIELD_INVOICE_ID),
            ("fields[]", FIELD_ATTACHMENT),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset));
        }

        let list = self.list(&query).await?;
        let total = list.records.len();
        let rows: Vec<StoreRow> = list.records.into_iter().filter_map(Record::into_row).collect();
        if rows.len() < total {
            tracing::debug!(skipped = total - rows.len(), "rows without invoice id ignored");
        }
        Ok(RowPage {
            rows,
            next_offset: list.offset,
        })
    }

    async fn find(&self, invoice_id: &str) -> Result<Lookup> {
        let formula = format!("{{{FIELD_INVOICE_ID}}}='{}'", formula_literal(invoice_id));
        let query = [
            ("filterByFormula", formula.as_str()),
            ("pageSize", PAGE_SIZE),
            ("fields[]", FIELD_INVOICE_ID),
            ("fields[]", FIELD_ATTACHMENT),
        ];
        let list = self.list(&query).await?;

        let mut rows: Vec<StoreRow> = list.records.into_iter().filter_map(Record::into_row).collect();
        Ok(match rows.len() {
            0 => Lookup::Absent,
            1 => Lookup::Found(rows.remove(0)),
            n => Lookup::Ambiguous(n),
        })
    }

    async fn insert(&self, invoice_id: &str, fields: &Fields) -> Result<String> {
        let body = json!({ "fields": fields, "typecast": true });
        let response = match self.send(self.http.post(self.table_url.clone()).json(&body)).await {
            Ok(response) => response,
            Err(err) if is_duplicate(&err) => {
                return Err(SyncError::WriteConflict(invoice_id.to_string()));
            }
            Err(err) => return Err(err),
        };

        let created: Record = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("Airtable create response: {e}")))?;
        tracing::debug!(invoice_id, row_id = %created.id, "Airtable row created");
        Ok(created.id)
    }

    async fn update(&self, row_id: &str, fields: &Fields) -> Result<()> {
        let body = json!({ "fields": fields, "typecast": true });
        self.send(self.http.patch(self.record_url(row_id)?).json(&body)).await?;
        Ok(())
    }

    async fn attach(&self, row_id: &str, document: &Document) -> Result<()> {
        let size = tokio::fs::metadata(&document.path).await?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(SyncError::StoreRejected {
                status: StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
                body: format!("{} is {size} bytes, above the upload limit", document.file_name),
            });
        }

        let bytes = tokio::fs::read(&document.path).await?;
        let url = with_segments(&self.content_url, &[row_id, FIELD_ATTACHMENT, "uploadAttachment"])?;
        let body = json!({
            "contentType": document.content_type,
            "file": STANDARD.encode(&bytes),
            "filename": document.file_name,
        });
        self.send(self.http.post(url).json(&body)).await?;
        tracing::debug!(row_id, file = %document.file_name, bytes = size, "attachment uploaded");
        Ok(())
    }
}
