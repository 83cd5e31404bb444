//! Configuration management

use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::DEFAULT_SITE_URL;
use crate::sheets::ServiceAccountKey;

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (required)
    pub bot_token: String,

    /// Spreadsheet receiving submitted readings (required)
    pub submission_sheet_key: String,

    /// Spreadsheet with account → apartment/address rows (required)
    pub accounts_sheet_key: String,

    /// Service account key file
    pub credentials_path: PathBuf,

    /// Parsed service account key
    pub credentials: ServiceAccountKey,

    /// Bound on each append/lookup call
    pub sheets_timeout: Duration,

    /// Ask for an electricity reading after cold water
    pub collect_electricity: bool,

    /// Link shown in the top menu
    pub site_url: String,
}

/// The subset of configuration needed to talk to Google Sheets
#[derive(Debug, Clone)]
pub struct SheetsAccess {
    pub credentials_path: PathBuf,
    pub credentials: ServiceAccountKey,
    pub sheets_timeout: Duration,
}

impl SheetsAccess {
    /// Credentials and timeout only; bot token and sheet keys are not needed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials_path = lookup("GOOGLE_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("auth_info.json"));
        let credentials = ServiceAccountKey::from_file(&credentials_path)
            .with_context(|| format!("Failed to load credentials from {}", credentials_path.display()))?;

        let sheets_timeout = match lookup("SHEETS_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = v
                    .trim()
                    .parse()
                    .with_context(|| format!("SHEETS_TIMEOUT_SECS is not a number: {}", v))?;
                if secs == 0 {
                    bail!("SHEETS_TIMEOUT_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(15),
        };

        Ok(Self {
            credentials_path,
            credentials,
            sheets_timeout,
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            match lookup(key).map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => bail!("{} environment variable is not set", key),
            }
        };

        let bot_token = required("BOT_TOKEN")?;
        let submission_sheet_key = required("INFO_SPREADSHEET_KEY")?;
        let accounts_sheet_key = required("ACCOUNTS_SPREADSHEET_KEY")?;

        let SheetsAccess {
            credentials_path,
            credentials,
            sheets_timeout,
        } = SheetsAccess::from_lookup(&lookup)?;

        let collect_electricity = lookup("COLLECT_ELECTRICITY")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let site_url = lookup("SITE_URL").unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        Url::parse(&site_url).with_context(|| format!("SITE_URL is not a valid URL: {}", site_url))?;

        Ok(Self {
            bot_token,
            submission_sheet_key,
            accounts_sheet_key,
            credentials_path,
            credentials,
            sheets_timeout,
            collect_electricity,
            site_url,
        })
    }
}
