//! Meter Readings Bot
//!
//! Telegram intake form for utility meter readings (cold water, electricity)
//! submitted by street address or by account number, stored in Google Sheets.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram (Dispatcher) ──► Engine ──► SessionStore
//!                                          │
//!                                          ├── Forms (Address / Account field sequences)
//!                                          ├── AccountResolver ──► accounts sheet
//!                                          └── Submitter ──────► readings sheet
//! ```

pub mod accounts;
pub mod config;
pub mod engine;
pub mod forms;
pub mod session;
pub mod sheets;
pub mod submission;
pub mod telegram;
pub mod telegram_ui;


pub use accounts::{AccountRecord, AccountResolver, Resolution};
pub use config::{Config, SheetsAccess};
pub use engine::{Action, Button, Engine, Event, Reply};
pub use forms::{FormDefinition, FormField, Forms, Mode, Validator};
pub use session::{Session, SessionId, SessionStore, State};
pub use sheets::{RowSink, RowSource, SheetsClient, SheetsError};
pub use submission::{SubmissionRow, Submitter};
