//! Google Sheets Client
//!
//! Minimal Sheets API v4 / Drive v3 client authenticated with a service
//! account key (JWT bearer grant). Provides the two storage operations the
//! bot needs: append one row, read all rows.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Assertion lifetime requested from the token endpoint (Google caps at 1h)
const ASSERTION_TTL_SECS: i64 = 3600;
/// Refresh the cached token this long before it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Appends go to the first worksheet
pub const APPEND_RANGE: &str = "A1";
/// Account table: number, apartment, address
pub const LOOKUP_RANGE: &str = "A:C";

/// Sheets client errors
#[derive(Error, Debug)]
pub enum SheetsError {
    #[error("Credentials file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid credentials: {0}")]
    Credentials(String),
    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// Storage operation: append one row of literal values
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn append_row(&self, values: Vec<String>) -> Result<(), SheetsError>;
}

/// Storage operation: read every row (header included)
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SheetsError>;
}

/// Service account key file (the fields we use)
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, SheetsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, SheetsError> {
        let key: Self =
            serde_json::from_str(raw).map_err(|e| SheetsError::Credentials(e.to_string()))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(SheetsError::Credentials(
                "client_email and private_key must be set".to_string(),
            ));
        }
        Ok(key)
    }
}

/// JWT claims for the bearer assertion
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl Claims {
    fn new(key: &ServiceAccountKey, now: i64) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: SCOPES.to_string(),
            aud: key.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_TTL_SECS as u64
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    values: [&'a [String]; 1],
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<SpreadsheetInfo>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A spreadsheet visible to the service account
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpreadsheetInfo {
    pub id: String,
    #[serde(rename = "name")]
    pub title: String,
}

/// Authenticated Sheets client, cheap to clone
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    key: Arc<ServiceAccountKey>,
    signing_key: Arc<EncodingKey>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl SheetsClient {
    /// Fails if the private key is not a valid RSA PEM
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self, SheetsError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let http = Client::builder().timeout(timeout).build()?;

        info!("Sheets client ready for {}", key.client_email);
        Ok(Self {
            http,
            key: Arc::new(key),
            signing_key: Arc::new(signing_key),
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Bind this client to one spreadsheet
    pub fn sheet(&self, sheet_key: impl Into<String>, range: &'static str) -> SheetHandle {
        SheetHandle {
            client: self.clone(),
            sheet_key: sheet_key.into(),
            range,
        }
    }

    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims::new(&self.key, chrono::Utc::now().timestamp());
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = check_status(response).await?.json().await?;

        debug!("Obtained access token (expires in {}s)", token.expires_in);
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    /// Append one row to the first worksheet, values taken literally
    pub async fn append(&self, sheet_key: &str, range: &str, values: &[String]) -> Result<(), SheetsError> {
        let token = self.access_token().await?;
        let url = format!("{}/{}/values/{}:append", SHEETS_API_URL, sheet_key, range);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&AppendBody { values: [values] })
            .send()
            .await?;
        check_status(response).await?;

        debug!("Appended {} values to sheet {}", values.len(), sheet_key);
        Ok(())
    }

    /// All rows in `range`, cells rendered as strings
    pub async fn get_all(&self, sheet_key: &str, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let token = self.access_token().await?;
        let url = format!("{}/{}/values/{}", SHEETS_API_URL, sheet_key, range);

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let body: ValueRange = check_status(response).await?.json().await?;

        debug!("Fetched {} rows from sheet {}", body.values.len(), sheet_key);
        Ok(body.values.into_iter().map(stringify_row).collect())
    }

    /// Every spreadsheet shared with the service account
    pub async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetInfo>, SheetsError> {
        let token = self.access_token().await?;
        let query = format!("mimeType='{}' and trashed=false", SPREADSHEET_MIME);
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(DRIVE_FILES_URL)
                .bearer_auth(&token)
                .query(&[("q", query.as_str()), ("fields", "nextPageToken,files(id,name)")]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let list: FileList = check_status(request.send().await?).await?.json().await?;
            all.extend(list.files);
            match list.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(all)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SheetsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SheetsError::Api {
        status: status.as_u16(),
        body,
    })
}

fn stringify_row(row: Vec<serde_json::Value>) -> Vec<String> {
    row.into_iter()
        .map(|cell| match cell {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}

/// A client bound to one spreadsheet and range
#[derive(Clone)]
pub struct SheetHandle {
    client: SheetsClient,
    sheet_key: String,
    range: &'static str,
}

#[async_trait]
impl RowSink for SheetHandle {
    async fn append_row(&self, values: Vec<String>) -> Result<(), SheetsError> {
        self.client.append(&self.sheet_key, self.range, &values).await
    }
}

#[async_trait]
impl RowSource for SheetHandle {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SheetsError> {
        self.client.get_all(&self.sheet_key, self.range).await
    }
}
