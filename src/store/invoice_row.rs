// suppliersync/src/store/invoice_row.rs
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use super::Fields;
use crate::invoice::Invoice;

pub const FIELD_INVOICE_ID: &str = "ID_Facture_Fournisseur";
pub const FIELD_NUMBER: &str = "Numéro";
pub const FIELD_DATE: &str = "Date";
pub const FIELD_SUPPLIER: &str = "Fournisseur";
pub const FIELD_SUPPLIER_ID: &str = "ID_Fournisseur_Sellsy";
pub const FIELD_AMOUNT_EXCL_TAX: &str = "Montant_HT";
pub const FIELD_AMOUNT_INCL_TAX: &str = "Montant_TTC";
pub const FIELD_STATUS: &str = "Statut";
pub const FIELD_URL: &str = "URL";
pub const FIELD_PDF_URL: &str = "PDF_URL";
pub const FIELD_ATTACHMENT: &str = "PDF";

const SELLSY_PURCHASE_URL: &str = "https://go.sellsy.com/purchase/";
const UNSPECIFIED_STATUS: &str = "Non spécifié";

/// French label shown in the table for a Sellsy status code.
pub fn status_label(status: &str) -> String {
    let code = status.trim();
    let label = match code.to_lowercase().as_str() {
        "" => UNSPECIFIED_STATUS,
        "paid" => "Payée",
        "unpaid" => "Non payée",
        "draft" => "Brouillon",
        "created" => "Créée",
        "validated" => "Validée",
        "canceled" | "cancelled" => "Annulée",
        "pending" => "En attente",
        "sent" => "Envoyée",
        "expired" => "Expirée",
        _ => code,
    };
    label.to_string()
}

fn amount(value: rust_decimal::Decimal) -> Value {
    json!(value.round_dp(2).to_f64().unwrap_or_default())
}

/// Builds the destination row for an invoice.
///
/// `run_date` stands in for a missing issue date.
pub fn invoice_fields(invoice: &Invoice, run_date: NaiveDate, currency_field: Option<&str>) -> Fields {
    let mut fields = Fields::new();
    let date = invoice.issue_date.unwrap_or(run_date);

    fields.insert(FIELD_INVOICE_ID.into(), json!(invoice.id));
    fields.insert(FIELD_NUMBER.into(), json!(invoice.number));
    fields.insert(FIELD_DATE.into(), json!(date.format("%Y-%m-%d").to_string()));
    fields.insert(FIELD_SUPPLIER.into(), json!(invoice.supplier_name));
    if let Some(supplier_id) = &invoice.supplier_id {
        fields.insert(FIELD_SUPPLIER_ID.into(), json!(supplier_id));
    }
    fields.insert(FIELD_AMOUNT_EXCL_TAX.into(), amount(invoice.amount_excl_tax));
    fields.insert(FIELD_AMOUNT_INCL_TAX.into(), amount(invoice.amount_incl_tax));
    fields.insert(FIELD_STATUS.into(), json!(status_label(&invoice.status)));
    fields.insert(FIELD_URL.into(), json!(format!("{SELLSY_PURCHASE_URL}{}", invoice.id)));
    if let Some(url) = &invoice.document_url {
        fields.insert(FIELD_PDF_URL.into(), json!(url));
    }
    if let Some(column) = currency_field {
        fields.insert(column.to_string(), json!(invoice.currency));
    }
    fields
}
