//! Conversation Engine
//!
//! Explicit state machine for the readings intake. Every inbound event is
//! routed through [`route`], a transition table keyed by (state, event) with
//! the `/start` / `/menu` escape checked before anything else. Events with no
//! entry for the current state are dropped without touching the session.
//!
//! The engine is transport-agnostic: it consumes [`Event`]s and produces
//! [`Reply`]s; `telegram` does the translation both ways.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accounts::{AccountResolver, Resolution};
use crate::forms::{self, Forms, Mode, ACCOUNT_NUMBER, STREETS};
use crate::session::{Session, SessionId, SessionStore, State};
use crate::submission::Submitter;

pub const DEFAULT_SITE_URL: &str = "https://komfort67.com/index.php";

/// Commands the bot answers; both reset to the top menu from any state
pub const MENU_COMMANDS: [&str; 2] = ["start", "menu"];

const WELCOME: &str = "👋 Добро пожаловать!\n\
Выберите нужный раздел для удобного управления услугами:\n\
Передать показания счётчиков 📊❄️\n\
Официальный сайт Управляющей компании ООО Комфорт-сервис ✅";
const CHOOSE_MODE: &str =
    "Выберите способ передачи показаний:\n(Для выхода в меню воспользуйтесь командой /menu)";
const CHOOSE_STREET: &str = "Вы выбрали передать показания по адресу.\nВыберите улицу:";
const ACCOUNT_MODE: &str = "Вы выбрали передать показания по лицевому счету.";
const DIGITS_ONLY: &str = "Номер лицевого счета должен содержать только цифры.";
const INVALID_ACCOUNT: &str = "Неверный номер лицевого счета.";
const EMPTY_VALUE: &str = "Значение не может быть пустым.";
const SUBMITTED: &str = "Ваши данные успешно отправлены!";
const SUBMIT_FAILED: &str = "Данные не сохранились! Повторите попытку(/menu)!";

const LABEL_METER_READINGS: &str = "Передать показания";
const LABEL_SITE: &str = "Официальный сайт";
const LABEL_BY_ADDRESS: &str = "По адресу";
const LABEL_BY_ACCOUNT: &str = "По № лицевого счета";
const LABEL_BACK: &str = "Назад";
const LABEL_SUBMIT: &str = "Отправить данные";
const LABEL_RESTART: &str = "Заполнить заново";

/// Inbound event, already attributed to a session by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Slash command, name without the slash
    Command(String),
    Text(String),
    /// Inline button press carrying its callback tag
    Button(String),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Text(_) => "text",
            Self::Button(_) => "button",
        }
    }
}

/// Button actions, encoded as callback tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MeterReadings,
    ByAddress,
    ByAccount,
    /// Index into [`STREETS`]
    Street(usize),
    Submit,
}

impl Action {
    pub fn encode(&self) -> String {
        match self {
            Self::MeterReadings => "meter_readings".to_string(),
            Self::ByAddress => "by_address".to_string(),
            Self::ByAccount => "by_account".to_string(),
            Self::Street(i) => format!("street:{}", i),
            Self::Submit => "submit_data".to_string(),
        }
    }

    pub fn decode(tag: &str) -> Option<Self> {
        match tag {
            "meter_readings" => Some(Self::MeterReadings),
            "by_address" => Some(Self::ByAddress),
            "by_account" => Some(Self::ByAccount),
            "submit_data" => Some(Self::Submit),
            _ => tag
                .strip_prefix("street:")
                .and_then(|i| i.parse().ok())
                .map(Self::Street),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Callback { label: String, tag: String },
    Link { label: String, url: String },
}

impl Button {
    pub fn action(label: &str, action: Action) -> Self {
        Self::Callback {
            label: label.to_string(),
            tag: action.encode(),
        }
    }

    pub fn link(label: &str, url: &str) -> Self {
        Self::Link {
            label: label.to_string(),
            url: url.to_string(),
        }
    }
}

/// Outbound message: text plus optional inline keyboard rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            keyboard,
        }
    }
}

/// Resolved transition for a (state, event) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<'a> {
    ShowMenu,
    OpenModes,
    StartAddress,
    PickStreet(&'static str),
    StartAccount,
    Collect { mode: Mode, index: usize, text: &'a str },
    CheckAccount(&'a str),
    Submit(Mode),
}

/// Transition table. `None` means the event is not registered for `state`.
pub fn route(state: State, event: &Event) -> Option<Transition<'_>> {
    match event {
        Event::Command(name) if MENU_COMMANDS.contains(&name.as_str()) => Some(Transition::ShowMenu),
        Event::Command(_) => None,
        Event::Button(tag) => {
            let action = Action::decode(tag)?;
            match (state, action) {
                (
                    State::Idle
                    | State::ChoosingMode
                    | State::ChoosingAddress
                    | State::ReviewingSummary { .. },
                    Action::MeterReadings,
                ) => Some(Transition::OpenModes),
                (State::ChoosingMode, Action::ByAddress) => Some(Transition::StartAddress),
                (State::ChoosingMode, Action::ByAccount) => Some(Transition::StartAccount),
                (State::ChoosingAddress, Action::Street(i)) => {
                    STREETS.get(i).map(|street| Transition::PickStreet(*street))
                }
                (State::ReviewingSummary { mode }, Action::Submit) => Some(Transition::Submit(mode)),
                _ => None,
            }
        }
        Event::Text(body) => match state {
            State::CollectingField { mode, index } => Some(Transition::Collect {
                mode,
                index,
                text: body,
            }),
            State::EnteringAccountNumber => Some(Transition::CheckAccount(body)),
            _ => None,
        },
    }
}

pub struct Engine {
    sessions: Arc<SessionStore>,
    forms: Forms,
    submitter: Submitter,
    resolver: AccountResolver,
    site_url: String,
}

impl Engine {
    pub fn new(
        sessions: Arc<SessionStore>,
        forms: Forms,
        submitter: Submitter,
        resolver: AccountResolver,
    ) -> Self {
        Self {
            sessions,
            forms,
            submitter,
            resolver,
            site_url: DEFAULT_SITE_URL.to_string(),
        }
    }

    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into();
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one event for one session. The session stays locked for the
    /// whole transition, external calls included. An empty result means the
    /// event was ignored.
    pub async fn handle(&self, id: SessionId, event: &Event) -> Vec<Reply> {
        let mut session = self.sessions.lock(id).await;

        let replies = match route(session.state, event) {
            Some(transition) => {
                debug!("Session {}: {:?} in state {}", id, transition, session.state.name());
                self.apply(id, &mut session, transition).await
            }
            None => {
                debug!(
                    "Ignoring {} event in state {} (session {})",
                    event.kind(),
                    session.state.name(),
                    id
                );
                Vec::new()
            }
        };

        let idle = *session == Session::default();
        drop(session);
        if idle {
            self.sessions.release(id);
        }
        replies
    }

    async fn apply(&self, id: SessionId, session: &mut Session, transition: Transition<'_>) -> Vec<Reply> {
        match transition {
            Transition::ShowMenu => {
                session.reset();
                vec![self.top_menu()]
            }
            Transition::OpenModes => {
                session.reset();
                session.state = State::ChoosingMode;
                vec![mode_menu()]
            }
            Transition::StartAddress => {
                session.state = State::ChoosingAddress;
                vec![street_menu()]
            }
            Transition::PickStreet(street) => {
                session.set_field(forms::STREET, street);
                self.advance(session, Mode::Address, 0)
            }
            Transition::StartAccount => {
                session.state = State::EnteringAccountNumber;
                vec![Reply::text(format!("{}\n{}", ACCOUNT_MODE, ACCOUNT_NUMBER.prompt))]
            }
            Transition::Collect { mode, index, text } => self.collect(session, mode, index, text),
            Transition::CheckAccount(text) => self.check_account(id, session, text).await,
            Transition::Submit(mode) => {
                let ok = self.submitter.submit(mode, session).await;
                session.reset();
                if ok {
                    info!("Session {}: {} readings submitted", id, mode.as_str());
                    vec![Reply::text(SUBMITTED)]
                } else {
                    warn!("Session {}: submission failed, session cleared", id);
                    vec![Reply::text(SUBMIT_FAILED)]
                }
            }
        }
    }

    /// Move to field `index` of `mode`'s form, or to the summary past the end
    fn advance(&self, session: &mut Session, mode: Mode, index: usize) -> Vec<Reply> {
        match self.forms.for_mode(mode).field(index) {
            Some(field) => {
                session.state = State::CollectingField { mode, index };
                vec![Reply::text(field.prompt)]
            }
            None => {
                session.state = State::ReviewingSummary { mode };
                vec![self.summary(mode, session)]
            }
        }
    }

    fn collect(&self, session: &mut Session, mode: Mode, index: usize, text: &str) -> Vec<Reply> {
        let Some(field) = self.forms.for_mode(mode).field(index) else {
            warn!("No field {} in {} form, returning to menu", index, mode.as_str());
            session.reset();
            return vec![self.top_menu()];
        };

        if !field.validator.check(text) {
            debug!("Rejected value for {}", field.name);
            return vec![Reply::text(format!("{}\n{}", EMPTY_VALUE, field.prompt))];
        }

        session.set_field(field.name, text.trim());
        self.advance(session, mode, index + 1)
    }

    async fn check_account(&self, id: SessionId, session: &mut Session, text: &str) -> Vec<Reply> {
        let number = if ACCOUNT_NUMBER.validator.check(text) {
            text.trim().parse::<u64>().ok()
        } else {
            None
        };
        let Some(number) = number else {
            debug!("Session {}: malformed account number", id);
            return vec![Reply::text(format!("{}\n{}", DIGITS_ONLY, ACCOUNT_NUMBER.prompt))];
        };

        match self.resolver.resolve(number).await {
            Resolution::Found(record) => {
                info!("Session {}: account {} resolved", id, record.account_number);
                session.set_field(forms::ACCOUNT, record.account_number.to_string());
                session.set_field(forms::APARTMENT, record.apartment.as_str());
                session.set_field(forms::ADDRESS, record.address.as_str());

                let found = format!(
                    "Лицевой счет: {}\nАдрес: {}\nКвартира: {}",
                    record.account_number, record.address, record.apartment
                );
                let mut replies = vec![Reply::text(found)];
                replies.extend(self.advance(session, Mode::Account, 0));
                replies
            }
            Resolution::NotFound => {
                warn!("Session {}: account {} not resolved", id, number);
                vec![Reply::text(format!("{}\n{}", INVALID_ACCOUNT, ACCOUNT_NUMBER.prompt))]
            }
        }
    }

    fn top_menu(&self) -> Reply {
        Reply::with_keyboard(
            WELCOME,
            vec![vec![
                Button::action(LABEL_METER_READINGS, Action::MeterReadings),
                Button::link(LABEL_SITE, &self.site_url),
            ]],
        )
    }

    fn summary(&self, mode: Mode, session: &Session) -> Reply {
        let mut lines = match mode {
            Mode::Address => vec![
                format!("Адрес: {}", session.field(forms::STREET)),
                format!("Дом: {}", session.field(forms::HOUSE)),
                format!("Квартира: Кв. {}", session.field(forms::APARTMENT)),
                format!("Показания счётчика холодной воды: {}", session.field(forms::READING)),
            ],
            Mode::Account => vec![
                format!("Лицевой счет: {}", session.field(forms::ACCOUNT)),
                format!("Адрес: {}", session.field(forms::ADDRESS)),
                format!("Квартира: {}", session.field(forms::APARTMENT)),
                format!("Показания счётчика холодной воды: {}", session.field(forms::COLD_WATER)),
            ],
        };
        if self.forms.collects_electricity() {
            lines.push(format!(
                "Показания счётчика электроэнергии: {}",
                session.field(forms::ELECTRICITY)
            ));
        }

        Reply::with_keyboard(
            lines.join("\n"),
            vec![vec![
                Button::action(LABEL_SUBMIT, Action::Submit),
                Button::action(LABEL_RESTART, Action::MeterReadings),
            ]],
        )
    }
}

fn mode_menu() -> Reply {
    Reply::with_keyboard(
        CHOOSE_MODE,
        vec![
            vec![Button::action(LABEL_BY_ADDRESS, Action::ByAddress)],
            vec![Button::action(LABEL_BY_ACCOUNT, Action::ByAccount)],
        ],
    )
}

fn street_menu() -> Reply {
    let mut rows: Vec<Vec<Button>> = STREETS
        .iter()
        .enumerate()
        .map(|(i, street)| vec![Button::action(street, Action::Street(i))])
        .collect();
    rows.push(vec![Button::action(LABEL_BACK, Action::MeterReadings)]);
    Reply::with_keyboard(CHOOSE_STREET, rows)
}
