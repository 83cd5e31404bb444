//! Submission Adapter
//!
//! Turns a completed form into the ordered row the readings sheet expects
//! and appends it exactly once. Faults never escape: the caller only learns
//! whether the row landed.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::forms::{self, Mode};
use crate::session::Session;
use crate::sheets::RowSink;

/// Date format used by the destination sheet
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Readings use a comma as the decimal separator at the destination
pub fn normalize_reading(raw: &str) -> String {
    raw.replace('.', ",")
}

/// Final payload: `[date, account_or_empty, address, apartment, cold_water, electricity?]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRow {
    pub date: String,
    pub account: Option<String>,
    pub address: String,
    pub apartment: String,
    pub cold_water: String,
    pub electricity: Option<String>,
}

impl SubmissionRow {
    /// Assemble the row from a session's fields. Readings are normalized here
    /// and nowhere else.
    pub fn build(mode: Mode, session: &Session, date: NaiveDate) -> Self {
        let field = |name: &str| session.field(name).trim().to_string();
        let electricity = session
            .fields
            .get(forms::ELECTRICITY)
            .map(|v| normalize_reading(v.trim()));

        match mode {
            Mode::Address => Self {
                date: date.format(DATE_FORMAT).to_string(),
                account: None,
                address: format!("{}, дом № {}", field(forms::STREET), field(forms::HOUSE)),
                apartment: format!("Кв. {}", field(forms::APARTMENT)),
                cold_water: normalize_reading(&field(forms::READING)),
                electricity,
            },
            Mode::Account => Self {
                date: date.format(DATE_FORMAT).to_string(),
                account: Some(field(forms::ACCOUNT)),
                address: field(forms::ADDRESS),
                apartment: field(forms::APARTMENT),
                cold_water: normalize_reading(&field(forms::COLD_WATER)),
                electricity,
            },
        }
    }

    /// Cell values in sheet column order; a missing account is an empty cell
    pub fn into_values(self) -> Vec<String> {
        let mut values = vec![
            self.date,
            self.account.unwrap_or_default(),
            self.address,
            self.apartment,
            self.cold_water,
        ];
        values.extend(self.electricity);
        values
    }
}

/// Appends submission rows with a bounded wait
pub struct Submitter {
    sink: Arc<dyn RowSink>,
    timeout: Duration,
}

impl Submitter {
    pub fn new(sink: Arc<dyn RowSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Build the row for `session` (dated today) and append it once.
    /// Returns `false` on any fault, including timeout.
    pub async fn submit(&self, mode: Mode, session: &Session) -> bool {
        let row = SubmissionRow::build(mode, session, chrono::Local::now().date_naive());
        self.submit_row(row).await
    }

    pub async fn submit_row(&self, row: SubmissionRow) -> bool {
        match tokio::time::timeout(self.timeout, self.sink.append_row(row.into_values())).await {
            Ok(Ok(())) => {
                info!("Submission appended");
                true
            }
            Ok(Err(e)) => {
                warn!("Submission failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Submission timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
