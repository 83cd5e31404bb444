//! Meter Readings Bot - Entry Point
//!
//! Modes:
//! - Default: run the Telegram bot
//! - --list-sheets / -l: list spreadsheets visible to the service account

use meter_readings_bot::{Config, SheetsAccess, SheetsClient};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let list_mode = args.iter().any(|a| a == "--list-sheets" || a == "-l");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Meter Readings Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: meter-readings-bot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --list-sheets, -l  List spreadsheets shared with the service account");
        println!("  --help, -h         Show this help");
        println!();
        println!("Default: Run the Telegram bot (long polling)");
        println!();
        println!("Environment variables:");
        println!("  BOT_TOKEN                 Telegram bot token (required unless listing)");
        println!("  INFO_SPREADSHEET_KEY      Readings sheet key (required unless listing)");
        println!("  ACCOUNTS_SPREADSHEET_KEY  Accounts sheet key (required unless listing)");
        println!("  GOOGLE_CREDENTIALS_PATH   Service account key (default: auth_info.json)");
        println!("  SHEETS_TIMEOUT_SECS       Sheets call timeout (default: 15)");
        println!("  COLLECT_ELECTRICITY       Ask for electricity readings (default: true)");
        println!("  SITE_URL                  Link in the top menu");
        println!("  LOG_FORMAT                'json' for JSON logs");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    // Listing is how operators find the sheet keys, so it needs credentials only
    if list_mode {
        let access = SheetsAccess::from_env()?;
        let client = SheetsClient::new(access.credentials, access.sheets_timeout)?;
        for sheet in client.list_spreadsheets().await? {
            println!("{} — id: {}", sheet.title, sheet.id);
        }
        return Ok(());
    }

    // Missing configuration aborts here, before any update is accepted
    let config = Config::from_env()?;

    info!("Meter Readings Bot v{}", env!("CARGO_PKG_VERSION"));
    meter_readings_bot::telegram::run_bot(config).await
}
