//! Telegram transport for the readings bot
//!
//! Maps inbound updates to engine events (keyed by chat id) and sends the
//! engine's replies back. Uses an explicit Dispatcher: teloxide delivers
//! one chat's updates in order and runs different chats concurrently.

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, ShutdownToken, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::Update,
};

use crate::accounts::AccountResolver;
use crate::config::Config;
use crate::engine::{Engine, Event, Reply};
use crate::forms::Forms;
use crate::session::{SessionId, SessionStore};
use crate::sheets::{SheetsClient, APPEND_RANGE, LOOKUP_RANGE};
use crate::submission::Submitter;
use crate::telegram_ui;

/// Build the engine from configuration: Sheets client, both sheets,
/// fresh in-memory sessions.
pub fn build_engine(config: &Config) -> Result<Engine> {
    let client = SheetsClient::new(config.credentials.clone(), config.sheets_timeout)
        .context("Failed to initialize Google Sheets client")?;

    let submissions = Arc::new(client.sheet(config.submission_sheet_key.clone(), APPEND_RANGE));
    let accounts = Arc::new(client.sheet(config.accounts_sheet_key.clone(), LOOKUP_RANGE));

    Ok(Engine::new(
        Arc::new(SessionStore::new()),
        Forms::new(config.collect_electricity),
        Submitter::new(submissions, config.sheets_timeout),
        AccountResolver::new(accounts, config.sheets_timeout),
    )
    .with_site_url(config.site_url.clone()))
}

/// Run the bot until Ctrl-C or SIGTERM; in-flight handlers finish first
pub async fn run_bot(config: Config) -> Result<()> {
    let engine = Arc::new(build_engine(&config)?);

    tracing::info!("===========================================");
    tracing::info!("  Meter readings bot - Starting...");
    tracing::info!("===========================================");
    tracing::info!("Submission sheet: {}", config.submission_sheet_key);
    tracing::info!("Accounts sheet: {}", config.accounts_sheet_key);
    tracing::info!("Credentials: {}", config.credentials_path.display());
    tracing::info!("Electricity readings: {}", if config.collect_electricity { "on" } else { "off" });

    let bot = Bot::new(config.bot_token.clone());

    tracing::info!("Verifying bot token...");
    match bot.get_me().await {
        Ok(me) => {
            tracing::info!(
                "Bot authenticated: @{} (ID: {})",
                me.username.as_deref().unwrap_or("unknown"),
                me.id
            );
        }
        Err(e) => {
            tracing::error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    }

    // Polling does not work while a webhook is set
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in update handler",
        ))
        .enable_ctrlc_handler()
        .build();

    spawn_sigterm_handler(dispatcher.shutdown_token());

    tracing::info!("Starting dispatcher with long polling...");
    dispatcher.dispatch().await;

    tracing::info!("Dispatcher stopped");
    Ok(())
}

#[cfg(unix)]
fn spawn_sigterm_handler(token: ShutdownToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                return;
            }
        };
        term.recv().await;
        tracing::info!("SIGTERM received, draining in-flight updates...");
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => tracing::warn!("Shutdown request ignored: {}", e),
        }
    });
}

#[cfg(not(unix))]
fn spawn_sigterm_handler(_token: ShutdownToken) {}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, engine: Arc<Engine>) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        tracing::debug!("Ignoring non-text message in chat {}", chat_id);
        return Ok(());
    };

    let event = telegram_ui::text_event(text);
    tracing::info!(">>> {} from chat {}", event.kind(), chat_id);

    let replies = engine.handle(SessionId(chat_id.0), &event).await;
    send_replies(&bot, chat_id, replies).await;
    Ok(())
}

/// Callback query handler for inline keyboard buttons
async fn callback_handler(bot: Bot, query: CallbackQuery, engine: Arc<Engine>) -> ResponseResult<()> {
    // Acknowledge first so the client stops its spinner even if handling is slow
    if let Err(e) = bot.answer_callback_query(&query.id).await {
        tracing::warn!("Failed to answer callback query: {}", e);
    }

    let Some(tag) = query.data.clone() else {
        return Ok(());
    };
    let chat_id = query
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or_else(|| ChatId(query.from.id.0 as i64));

    tracing::info!(">>> button {:?} from chat {}", tag, chat_id);

    let replies = engine.handle(SessionId(chat_id.0), &Event::Button(tag)).await;
    send_replies(&bot, chat_id, replies).await;
    Ok(())
}

async fn send_replies(bot: &Bot, chat_id: ChatId, replies: Vec<Reply>) {
    for reply in replies {
        let mut request = bot.send_message(chat_id, reply.text);
        if let Some(markup) = telegram_ui::keyboard(&reply.keyboard) {
            request = request.reply_markup(markup);
        }
        if let Err(e) = request.await {
            tracing::error!("Failed to send reply to chat {}: {}", chat_id, e);
        }
    }
}
