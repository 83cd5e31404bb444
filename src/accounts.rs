//! Account Resolver
//!
//! Looks up an account number in the accounts sheet
//! (`number | apartment | address`, header row first).
//!
//! A lookup failure and a missing account look the same to the caller:
//! both come back as `NotFound`. Duplicate numbers are not detected; the
//! first row wins.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::sheets::RowSource;

/// One row of the accounts sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account_number: u64,
    pub apartment: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(AccountRecord),
    NotFound,
}

/// Scan data rows (header skipped) for the first exact numeric match.
/// Rows whose key does not parse as a number are skipped.
pub fn find_account(rows: &[Vec<String>], account_number: u64) -> Option<AccountRecord> {
    rows.iter().skip(1).find_map(|row| {
        let key = row.first()?.trim().parse::<u64>().ok()?;
        if key != account_number {
            return None;
        }
        let cell = |i: usize| row.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
        Some(AccountRecord {
            account_number: key,
            apartment: cell(1),
            address: cell(2),
        })
    })
}

pub struct AccountResolver {
    source: Arc<dyn RowSource>,
    timeout: Duration,
}

impl AccountResolver {
    pub fn new(source: Arc<dyn RowSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn resolve(&self, account_number: u64) -> Resolution {
        let rows = match tokio::time::timeout(self.timeout, self.source.fetch_rows()).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!("Account lookup failed: {}", e);
                return Resolution::NotFound;
            }
            Err(_) => {
                warn!("Account lookup timed out after {:?}", self.timeout);
                return Resolution::NotFound;
            }
        };

        match find_account(&rows, account_number) {
            Some(record) => Resolution::Found(record),
            None => {
                debug!("Account {} not in {} rows", account_number, rows.len().saturating_sub(1));
                Resolution::NotFound
            }
        }
    }
}
