// suppliersync/src/source/invoice_format.rs
//! Normalises raw Sellsy purchase records into [`Invoice`] values.
//!
//! Sellsy returns differently shaped documents depending on the endpoint
//! (list summaries, full documents, OCR records), so every field is looked up
//! through an ordered list of candidate keys.

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::invoice::Invoice;

const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_TAX_RATE: u32 = 20;

const SUPPLIER_NAME_KEYS: &[&str] = &[
    "company_name",
    "supplier_name",
    "name",
    "clientname",
    "thirdname",
    "third_name",
];
const DATE_KEYS: &[&str] = &[
    "created_at",
    "date",
    "created",
    "issueDate",
    "documentdate",
    "creationDate",
    "doc_date",
];
const NESTED_EXCL_KEYS: &[&str] = &[
    "total_excluding_tax",
    "totalAmountWithoutTaxes",
    "tax_excl",
    "total_excl_tax",
    "totalExclTax",
    "preTax",
    "totalHT",
];
const NESTED_INCL_KEYS: &[&str] = &[
    "total_including_tax",
    "totalAmountWithTaxes",
    "tax_incl",
    "total_incl_tax",
    "totalInclTax",
    "withTax",
    "totalTTC",
];
const AMOUNT_EXCL_KEYS: &[&str] = &["tax_excl", "ht", "preTax", "withoutTax"];
const AMOUNT_INCL_KEYS: &[&str] = &["tax_incl", "ttc", "withTax", "total"];
const ROOT_EXCL_KEYS: &[&str] = &[
    "total_amount_without_taxes",
    "totalht",
    "amountHT",
    "totalHT",
    "preTaxAmount",
    "totalAmountTaxesFree",
];
const ROOT_INCL_KEYS: &[&str] = &[
    "total_amount_with_taxes",
    "totalttc",
    "amountTTC",
    "totalTTC",
    "totalAmount",
];
const REFERENCE_KEYS: &[&str] = &[
    "reference",
    "number",
    "decimal_number",
    "invoiceNumber",
    "document_number",
    "docNumber",
];
const STATUS_KEYS: &[&str] = &["status", "doc_status", "state", "documentStatus", "step"];
const CURRENCY_KEYS: &[&str] = &["currency", "currency_code", "currencysymbol"];
const DOCUMENT_URL_KEYS: &[&str] = &["pdf_link", "pdfUrl", "pdf_url", "downloadUrl"];

static INVOICE_NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z]{1,3}[-\s]?\d{2,4}[-\s]?\d{1,6}").expect("invoice number pattern is valid")
});

/// Builds an [`Invoice`] from a raw record.
///
/// `id_hint` wins over the record's own `id` (list results are keyed by id).
/// Returns `None` when no identifier can be found.
pub fn invoice_from_record(id_hint: Option<&str>, record: &Value) -> Option<Invoice> {
    if !record.is_object() {
        return None;
    }
    let id = id_hint
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| first_text(record, &["id", "docid"]))?;

    let (supplier_id, supplier_name) = supplier(record);
    let supplier_name = supplier_name
        .or_else(|| first_text(record, SUPPLIER_NAME_KEYS))
        .or_else(|| supplier_id.as_ref().map(|sid| format!("Fournisseur #{sid}")))
        .unwrap_or_default();

    let issue_date = DATE_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !is_blank(value))
        .and_then(parse_issue_date);

    let (amount_excl_tax, amount_incl_tax) = amounts(record);

    Some(Invoice {
        number: reference(record).unwrap_or_else(|| format!("REF-{id}")),
        supplier_id,
        supplier_name,
        amount_excl_tax,
        amount_incl_tax,
        currency: first_text(record, CURRENCY_KEYS).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        issue_date,
        status: first_text(record, STATUS_KEYS).unwrap_or_default(),
        document_url: first_text(record, DOCUMENT_URL_KEYS),
        id,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Non-empty string or number rendered as text.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(record.get(*key)))
}

fn supplier(record: &Value) -> (Option<String>, Option<String>) {
    if let Some(relation) = record.get("relation").filter(|v| v.is_object()) {
        return (text(relation.get("id")), text(relation.get("name")));
    }
    if let Some(related) = record.get("related").and_then(Value::as_array) {
        let party = related.iter().find(|entry| {
            matches!(
                entry.get("type").and_then(Value::as_str),
                Some("individual" | "corporation")
            )
        });
        return match party {
            Some(party) => (text(party.get("id")), text(party.get("name"))),
            None => (None, None),
        };
    }
    if let Some(client) = record.get("client").filter(|v| v.is_object()) {
        return (text(client.get("id")), text(client.get("name")));
    }
    (first_text(record, &["clientid", "thirdid"]), None)
}

/// Accepts ISO dates and datetimes, `DD/MM/YYYY`, and unix timestamps.
pub fn parse_issue_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.date_naive()),
        Value::String(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let head = raw.split(['T', ' ']).next().unwrap_or(raw);
    if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(head, "%d/%m/%Y") {
        return Some(date);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.date_naive())
}

/// Lenient amount parsing. Zero counts as "not reported".
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    let amount = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => {
            let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            // "1234,56" is a decimal comma; "1,234.56" a thousands separator
            let normalised = if compact.contains(',') && !compact.contains('.') {
                compact.replace(',', ".")
            } else {
                compact.replace(',', "")
            };
            let cleaned: String = normalised
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            Decimal::from_str(&cleaned).ok()
        }
        _ => None,
    }?;
    (!amount.is_zero()).then_some(amount)
}

fn first_amount(record: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|v| !v.is_null())
        .and_then(parse_amount)
}

fn tax_rate(record: &Value) -> Decimal {
    record
        .get("tax_rate")
        .and_then(parse_amount)
        .unwrap_or_else(|| Decimal::from(DEFAULT_TAX_RATE))
}

fn rows_total(record: &Value) -> Option<Decimal> {
    let rows = record.get("rows").and_then(Value::as_array)?;
    let total: Decimal = rows
        .iter()
        .filter_map(|row| {
            let product = |price: &str, qty: &str| {
                Some(parse_amount(row.get(price)?)? * parse_amount(row.get(qty)?)?)
            };
            if row.get("unit_amount").is_some() && row.get("qty").is_some() {
                product("unit_amount", "qty")
            } else if let Some(total) = row.get("total") {
                parse_amount(total)
            } else {
                product("unitAmount", "quantity")
            }
        })
        .sum();
    (!total.is_zero()).then_some(total)
}

/// Returns (excluding tax, including tax), rounded to cents.
fn amounts(record: &Value) -> (Decimal, Decimal) {
    let mut excl = None;
    let mut incl = None;

    if let Some(nested) = record.get("amounts").filter(|v| v.is_object()) {
        excl = first_amount(nested, NESTED_EXCL_KEYS);
        incl = first_amount(nested, NESTED_INCL_KEYS);
    }
    if let Some(nested) = record.get("amount").filter(|v| v.is_object()) {
        excl = excl.or_else(|| first_amount(nested, AMOUNT_EXCL_KEYS));
        incl = incl.or_else(|| first_amount(nested, AMOUNT_INCL_KEYS));
    }
    excl = excl.or_else(|| first_amount(record, ROOT_EXCL_KEYS));
    incl = incl.or_else(|| first_amount(record, ROOT_INCL_KEYS));
    if excl.is_none() {
        excl = rows_total(record);
    }

    let multiplier = Decimal::ONE + tax_rate(record) / Decimal::from(100);
    let (excl, incl) = match (excl, incl) {
        (Some(excl), Some(incl)) => (excl, incl),
        (Some(excl), None) => (excl, excl * multiplier),
        (None, Some(incl)) => (incl / multiplier, incl),
        (None, None) => (Decimal::ZERO, Decimal::ZERO),
    };
    (excl.round_dp(2), incl.round_dp(2))
}

fn reference(record: &Value) -> Option<String> {
    if let Some(reference) = first_text(record, REFERENCE_KEYS) {
        return Some(reference);
    }
    if let Some(notes) = text(record.get("notes")) {
        if notes.chars().count() <= 20 {
            return Some(notes);
        }
        if let Some(found) = INVOICE_NUMBER_PATTERN.find(&notes) {
            return Some(found.as_str().to_string());
        }
    }
    first_text(record, &["ident", "docnum"])
}
