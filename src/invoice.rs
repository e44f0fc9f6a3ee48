// suppliersync/src/invoice.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::path::PathBuf;

/// A supplier invoice as issued by the invoicing system.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    /// External identifier in the invoicing system; the matching key.
    pub id: String,
    pub number: String,
    pub supplier_id: Option<String>,
    pub supplier_name: String,
    pub amount_excl_tax: Decimal,
    pub amount_incl_tax: Decimal,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub status: String,
    pub document_url: Option<String>,
}

#[cfg(test)]
impl Invoice {
    /// Bare invoice carrying only its identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            number: format!("REF-{id}"),
            id,
            supplier_id: None,
            supplier_name: String::new(),
            amount_excl_tax: Decimal::ZERO,
            amount_incl_tax: Decimal::ZERO,
            currency: "EUR".to_string(),
            issue_date: None,
            status: String::new(),
            document_url: None,
        }
    }
}

/// A rendered invoice document downloaded to the local artifact directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub file_name: String,
    pub content_type: String,
    pub path: PathBuf,
}
