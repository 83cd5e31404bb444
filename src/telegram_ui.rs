//! Telegram UI Components
//!
//! Translation between the engine's transport-neutral types and Telegram:
//! - Message text → [`Event`] (commands vs free text)
//! - [`Reply`] keyboards → inline keyboard markup

use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

use crate::engine::{Button, Event, MENU_COMMANDS};

/// Command name from a message like `/start` or `/menu@SomeBot args`
pub fn parse_command(text: &str) -> Option<String> {
    let rest = text.trim().strip_prefix('/')?;
    let word = rest.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}

/// Classify inbound message text. Only the bot's own commands become
/// [`Event::Command`]; anything else, `/5` included, is form input.
pub fn text_event(text: &str) -> Event {
    match parse_command(text) {
        Some(name) if MENU_COMMANDS.contains(&name.as_str()) => Event::Command(name),
        _ => Event::Text(text.to_string()),
    }
}

/// Inline keyboard for a reply, `None` when the reply has no buttons.
/// Link buttons with an unparsable URL are dropped.
pub fn keyboard(rows: &[Vec<Button>]) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<InlineKeyboardButton>> = rows
        .iter()
        .map(|row| row.iter().filter_map(render_button).collect::<Vec<_>>())
        .filter(|row| !row.is_empty())
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(rows))
    }
}

fn render_button(button: &Button) -> Option<InlineKeyboardButton> {
    match button {
        Button::Callback { label, tag } => Some(InlineKeyboardButton::callback(label.clone(), tag.clone())),
        Button::Link { label, url } => match Url::parse(url) {
            Ok(url) => Some(InlineKeyboardButton::url(label.clone(), url)),
            Err(e) => {
                warn!("Dropping link button {:?}: {}", label, e);
                None
            }
        },
    }
}
