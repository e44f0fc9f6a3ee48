// suppliersync/src/config/mod.rs
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::{Result, SyncError};
use crate::sync::retry::RetryPolicy;

const DEFAULT_SELLSY_API_URL: &str = "https://apifeed.sellsy.com/0/";
const DEFAULT_SELLSY_TOKEN_URL: &str = "https://login.sellsy.com/oauth2/access-tokens";
const DEFAULT_AIRTABLE_API_URL: &str = "https://api.airtable.com/v0";
const DEFAULT_AIRTABLE_CONTENT_URL: &str = "https://content.airtable.com/v0";
const DEFAULT_PDF_STORAGE_DIR: &str = "pdf_invoices_suppliers";
const DEFAULT_ENVIRONMENT: &str = "development";
/// Upper bound on invoices queued between the reader and the writer.
pub const MAX_IN_FLIGHT_CAP: usize = 10;

const REQUIRED_VARS: &[&str] = &[
    "SELLSY_CLIENT_ID",
    "SELLSY_CLIENT_SECRET",
    "AIRTABLE_API_KEY",
    "AIRTABLE_BASE_ID",
    "AIRTABLE_SUPPLIER_TABLE_NAME",
];

#[derive(Clone)]
pub struct SellsyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: Url,
    pub token_url: Url,
}

impl fmt::Debug for SellsyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellsyConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_url", &self.api_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .finish()
    }
}

#[derive(Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table_name: String,
    pub api_url: Url,
    pub content_url: Url,
    /// Column receiving the invoice currency; not written when unset.
    pub currency_field: Option<String>,
}

impl fmt::Debug for AirtableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtableConfig")
            .field("api_key", &"<redacted>")
            .field("base_id", &self.base_id)
            .field("table_name", &self.table_name)
            .field("api_url", &self.api_url.as_str())
            .field("content_url", &self.content_url.as_str())
            .field("currency_field", &self.currency_field)
            .finish()
    }
}

/// Tuning knobs for a run: retry budget, in-flight cap and pacing.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_in_flight: usize,
    pub pause_every: usize,
    pub pause: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_in_flight: MAX_IN_FLIGHT_CAP,
            pause_every: 10,
            pause: Duration::from_secs(2),
        }
    }
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            timeout: self.timeout,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sellsy: SellsyConfig,
    pub airtable: AirtableConfig,
    pub pdf_storage_dir: PathBuf,
    pub environment: String,
    pub settings: SyncSettings,
}

impl AppConfig {
    /// Loads configuration from the process environment. `main` has already
    /// merged `.env` into it.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    ///
    /// Every missing required variable is reported at once, before any
    /// network call is attempted.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::ConfigMissing(missing));
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let sellsy = SellsyConfig {
            client_id: required("SELLSY_CLIENT_ID"),
            client_secret: required("SELLSY_CLIENT_SECRET"),
            api_url: parse_url("SELLSY_API_URL", get("SELLSY_API_URL"), DEFAULT_SELLSY_API_URL)?,
            token_url: parse_url(
                "SELLSY_TOKEN_URL",
                get("SELLSY_TOKEN_URL"),
                DEFAULT_SELLSY_TOKEN_URL,
            )?,
        };

        let airtable = AirtableConfig {
            api_key: required("AIRTABLE_API_KEY"),
            base_id: required("AIRTABLE_BASE_ID"),
            table_name: required("AIRTABLE_SUPPLIER_TABLE_NAME"),
            api_url: parse_url(
                "AIRTABLE_API_URL",
                get("AIRTABLE_API_URL"),
                DEFAULT_AIRTABLE_API_URL,
            )?,
            content_url: parse_url(
                "AIRTABLE_CONTENT_URL",
                get("AIRTABLE_CONTENT_URL"),
                DEFAULT_AIRTABLE_CONTENT_URL,
            )?,
            currency_field: get("AIRTABLE_CURRENCY_FIELD"),
        };

        let defaults = SyncSettings::default();
        let max_in_flight: usize =
            parse_number("SYNC_MAX_IN_FLIGHT", get("SYNC_MAX_IN_FLIGHT"), defaults.max_in_flight)?;
        if max_in_flight > MAX_IN_FLIGHT_CAP {
            tracing::warn!(
                requested = max_in_flight,
                cap = MAX_IN_FLIGHT_CAP,
                "SYNC_MAX_IN_FLIGHT above cap, clamping"
            );
        }
        let max_attempts: u32 =
            parse_number("SYNC_MAX_ATTEMPTS", get("SYNC_MAX_ATTEMPTS"), defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(SyncError::ConfigInvalid(
                "SYNC_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let settings = SyncSettings {
            max_attempts,
            timeout: Duration::from_secs(parse_number(
                "SYNC_TIMEOUT_SECS",
                get("SYNC_TIMEOUT_SECS"),
                defaults.timeout.as_secs(),
            )?),
            backoff_base: Duration::from_millis(parse_number(
                "SYNC_BACKOFF_BASE_MS",
                get("SYNC_BACKOFF_BASE_MS"),
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_max: Duration::from_millis(parse_number(
                "SYNC_BACKOFF_MAX_MS",
                get("SYNC_BACKOFF_MAX_MS"),
                defaults.backoff_max.as_millis() as u64,
            )?),
            max_in_flight: max_in_flight.clamp(1, MAX_IN_FLIGHT_CAP),
            pause_every: parse_number("SYNC_PAUSE_EVERY", get("SYNC_PAUSE_EVERY"), defaults.pause_every)?,
            pause: Duration::from_millis(parse_number(
                "SYNC_PAUSE_MS",
                get("SYNC_PAUSE_MS"),
                defaults.pause.as_millis() as u64,
            )?),
        };
        if settings.timeout.is_zero() {
            return Err(SyncError::ConfigInvalid(
                "SYNC_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(AppConfig {
            sellsy,
            airtable,
            pdf_storage_dir: get("PDF_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PDF_STORAGE_DIR)),
            environment: get("ENVIRONMENT")
                .map(|v| v.to_lowercase())
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            settings,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_url(key: &str, value: Option<String>, default: &str) -> Result<Url> {
    let raw = value.unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|e| SyncError::ConfigInvalid(format!("{key} is not a valid URL ({raw}): {e}")))
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| SyncError::ConfigInvalid(format!("{key} must be a non-negative integer ({raw}): {e}"))),
        None => Ok(default),
    }
}
