//! Conversation Engine Integration Tests
//!
//! Drives the engine end to end with in-memory sheet stubs: full address
//! and account flows, validation, stray events and session isolation.

use async_trait::async_trait;
use meter_readings_bot::telegram_ui::text_event;
use meter_readings_bot::{
    AccountResolver, Action, Engine, Event, Forms, Mode, Reply, RowSink, RowSource, Session,
    SessionId, SessionStore, SheetsError, State, Submitter,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    rows: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn append_row(&self, values: Vec<String>) -> Result<(), SheetsError> {
        // Yield so concurrent sessions interleave
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail {
            return Err(SheetsError::Api {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        self.rows.lock().push(values);
        Ok(())
    }
}

struct AccountTable {
    rows: Vec<Vec<String>>,
    calls: AtomicUsize,
}

impl AccountTable {
    fn new() -> Self {
        let rows = [
            ["Лицевой счет", "Квартира", "Адрес"],
            ["100200", "Кв. 14", "ул. Генерала Паскевича, дом № 3"],
            ["300400", "Кв. 2", "ул. Рыленкова, дом № 8"],
        ];
        Self {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RowSource for AccountTable {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SheetsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.clone())
    }
}

/// Account sheet that is down or too slow to answer
enum UnreachableTable {
    Failing,
    Slow,
}

#[async_trait]
impl RowSource for UnreachableTable {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, SheetsError> {
        match self {
            Self::Failing => Err(SheetsError::Api {
                status: 500,
                body: "internal error".to_string(),
            }),
            Self::Slow => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

struct Harness {
    engine: Engine,
    sink: Arc<RecordingSink>,
    table: Arc<AccountTable>,
}

impl Harness {
    fn new() -> Self {
        Self::with(RecordingSink::default(), Forms::default())
    }

    fn with(sink: RecordingSink, forms: Forms) -> Self {
        let sink = Arc::new(sink);
        let table = Arc::new(AccountTable::new());
        let timeout = Duration::from_secs(2);
        let engine = Engine::new(
            Arc::new(SessionStore::new()),
            forms,
            Submitter::new(sink.clone(), timeout),
            AccountResolver::new(table.clone(), timeout),
        );
        Self { engine, sink, table }
    }

    async fn send(&self, id: i64, event: Event) -> Vec<Reply> {
        self.engine.handle(SessionId(id), &event).await
    }

    async fn session(&self, id: i64) -> Session {
        self.engine.sessions().get(SessionId(id)).await
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.sink.rows.lock().clone()
    }
}

fn command(name: &str) -> Event {
    Event::Command(name.to_string())
}

fn text(body: &str) -> Event {
    Event::Text(body.to_string())
}

fn press(action: Action) -> Event {
    Event::Button(action.encode())
}

fn today() -> String {
    chrono::Local::now().date_naive().format("%d.%m.%Y").to_string()
}

const BRYLEVKA: usize = 4;

/// `/start` through to the summary for an address-mode form
async fn fill_address_form(h: &Harness, id: i64, house: &str, apartment: &str, cold: &str, electr: &str) {
    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(BRYLEVKA))).await;
    h.send(id, text(house)).await;
    h.send(id, text(apartment)).await;
    h.send(id, text(cold)).await;
    h.send(id, text(electr)).await;
}

#[tokio::test]
async fn test_address_flow_end_to_end() {
    let h = Harness::new();
    let id = 1;

    let menu = h.send(id, command("start")).await;
    assert_eq!(menu.len(), 1);
    assert!(menu[0].text.contains("Добро пожаловать"));
    assert_eq!(menu[0].keyboard[0].len(), 2);

    let modes = h.send(id, press(Action::MeterReadings)).await;
    assert!(modes[0].text.contains("Выберите способ"));
    assert_eq!(h.session(id).await.state, State::ChoosingMode);

    let streets = h.send(id, press(Action::ByAddress)).await;
    assert_eq!(streets[0].keyboard.len(), 6);
    assert_eq!(h.session(id).await.state, State::ChoosingAddress);

    let prompt = h.send(id, press(Action::Street(BRYLEVKA))).await;
    assert_eq!(prompt[0].text, "Введите № дома:");

    h.send(id, text("12")).await;
    h.send(id, text("5")).await;
    h.send(id, text("101.5")).await;
    let summary = h.send(id, text("200")).await;

    assert_eq!(
        h.session(id).await.state,
        State::ReviewingSummary { mode: Mode::Address }
    );
    let summary = &summary[0];
    assert!(summary.text.contains("Адрес: ул. Брылевка"));
    assert!(summary.text.contains("Квартира: Кв. 5"));
    // Normalization happens at submission, not in the summary
    assert!(summary.text.contains("холодной воды: 101.5"));
    assert!(h.session(id).await.fields.values().any(|v| v == "101.5"));

    let done = h.send(id, press(Action::Submit)).await;
    assert_eq!(done[0].text, "Ваши данные успешно отправлены!");

    assert_eq!(
        h.rows(),
        vec![vec![
            today(),
            String::new(),
            "ул. Брылевка, дом № 12".to_string(),
            "Кв. 5".to_string(),
            "101,5".to_string(),
            "200".to_string(),
        ]]
    );
    assert_eq!(h.session(id).await, Session::default());
}

#[tokio::test]
async fn test_failed_submission_still_resets() {
    let h = Harness::with(RecordingSink::failing(), Forms::default());
    let id = 2;

    fill_address_form(&h, id, "7", "3", "10", "20").await;
    let reply = h.send(id, press(Action::Submit)).await;

    assert!(reply[0].text.contains("/menu"));
    assert!(h.rows().is_empty());
    assert_eq!(h.session(id).await, Session::default());
}

#[tokio::test]
async fn test_double_submit_appends_once() {
    let h = Harness::new();
    let id = 3;

    fill_address_form(&h, id, "1", "1", "1", "1").await;
    h.send(id, press(Action::Submit)).await;
    let second = h.send(id, press(Action::Submit)).await;

    assert!(second.is_empty());
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test]
async fn test_unregistered_events_leave_session_untouched() {
    let h = Harness::new();
    let id = 4;

    let strays = [
        text("hello"),
        command("help"),
        Event::Button("garbage".to_string()),
        press(Action::Submit),
        press(Action::ByAccount),
        press(Action::Street(0)),
    ];

    // Idle
    for stray in &strays {
        let before = h.session(id).await;
        assert!(h.send(id, stray.clone()).await.is_empty());
        assert_eq!(h.session(id).await, before);
    }

    // Mid-form: buttons from old messages are ignored
    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(1))).await;
    h.send(id, text("9")).await;

    let before = h.session(id).await;
    for stray in [press(Action::Submit), press(Action::MeterReadings), press(Action::Street(2)), command("stop")] {
        assert!(h.send(id, stray).await.is_empty());
        assert_eq!(h.session(id).await, before);
    }
}

#[tokio::test]
async fn test_empty_value_reprompts() {
    let h = Harness::new();
    let id = 5;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(0))).await;

    let before = h.session(id).await;
    let reply = h.send(id, text("   ")).await;
    assert!(reply[0].text.contains("Введите № дома:"));
    assert_eq!(h.session(id).await, before);
}

#[tokio::test]
async fn test_malformed_account_number_skips_lookup() {
    let h = Harness::new();
    let id = 6;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAccount)).await;
    assert_eq!(h.session(id).await.state, State::EnteringAccountNumber);

    let before = h.session(id).await;
    let reply = h.send(id, text("12a3")).await;

    assert!(reply[0].text.contains("только цифры"));
    assert_eq!(h.table.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.session(id).await, before);

    // Too large for any account number
    h.send(id, text("99999999999999999999999")).await;
    assert_eq!(h.table.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_account_reprompts() {
    let h = Harness::new();
    let id = 7;

    h.send(id, command("menu")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAccount)).await;

    let reply = h.send(id, text("555")).await;
    assert!(reply[0].text.contains("Неверный номер лицевого счета"));
    assert_eq!(h.table.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.session(id).await.state, State::EnteringAccountNumber);
}

#[tokio::test]
async fn test_account_flow_end_to_end() {
    let h = Harness::new();
    let id = 8;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAccount)).await;

    let found = h.send(id, text(" 100200 ")).await;
    assert_eq!(found.len(), 2);
    assert!(found[0].text.contains("ул. Генерала Паскевича, дом № 3"));
    assert_eq!(found[1].text, "Введите показания счётчика холодной воды:");
    assert_eq!(
        h.session(id).await.state,
        State::CollectingField { mode: Mode::Account, index: 0 }
    );

    h.send(id, text("33.1")).await;
    let summary = h.send(id, text("4100.25")).await;
    assert!(summary[0].text.contains("Лицевой счет: 100200"));

    h.send(id, press(Action::Submit)).await;
    assert_eq!(
        h.rows(),
        vec![vec![
            today(),
            "100200".to_string(),
            "ул. Генерала Паскевича, дом № 3".to_string(),
            "Кв. 14".to_string(),
            "33,1".to_string(),
            "4100,25".to_string(),
        ]]
    );
    assert_eq!(h.session(id).await.state, State::Idle);
}

#[tokio::test]
async fn test_restart_from_summary_clears_fields() {
    let h = Harness::new();
    let id = 9;

    fill_address_form(&h, id, "12", "5", "1", "2").await;
    let reply = h.send(id, press(Action::MeterReadings)).await;

    assert!(reply[0].text.contains("Выберите способ"));
    let session = h.session(id).await;
    assert_eq!(session.state, State::ChoosingMode);
    assert!(session.fields.is_empty());
}

#[tokio::test]
async fn test_menu_escape_mid_form() {
    let h = Harness::new();
    let id = 10;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(2))).await;
    h.send(id, text("4")).await;

    let reply = h.send(id, command("menu")).await;
    assert!(reply[0].text.contains("Добро пожаловать"));
    assert_eq!(h.session(id).await, Session::default());
}

#[tokio::test]
async fn test_back_from_street_picker() {
    let h = Harness::new();
    let id = 11;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::MeterReadings)).await;

    assert_eq!(h.session(id).await.state, State::ChoosingMode);

    // Switching mode after going back is allowed
    h.send(id, press(Action::ByAccount)).await;
    assert_eq!(h.session(id).await.state, State::EnteringAccountNumber);
}

#[tokio::test]
async fn test_cold_water_only_variant() {
    let h = Harness::with(RecordingSink::default(), Forms::new(false));
    let id = 12;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(BRYLEVKA))).await;
    h.send(id, text("12")).await;
    h.send(id, text("5")).await;
    let summary = h.send(id, text("7.5")).await;

    assert!(!summary[0].text.contains("электроэнергии"));
    h.send(id, press(Action::Submit)).await;

    let rows = h.rows();
    assert_eq!(rows[0].len(), 5);
    assert_eq!(rows[0][4], "7,5");
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_mix() {
    let h = Arc::new(Harness::new());

    let a = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            fill_address_form(&h, 100, "1", "11", "111", "1111").await;
            h.send(100, press(Action::Submit)).await;
        })
    };
    let b = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            fill_address_form(&h, 200, "2", "22", "222", "2222").await;
            h.send(200, press(Action::Submit)).await;
        })
    };
    a.await.unwrap();
    b.await.unwrap();

    let rows = h.rows();
    assert_eq!(rows.len(), 2);
    let row_a = rows.iter().find(|r| r[2].ends_with("№ 1")).unwrap();
    let row_b = rows.iter().find(|r| r[2].ends_with("№ 2")).unwrap();
    assert_eq!(&row_a[3..], &["Кв. 11", "111", "1111"]);
    assert_eq!(&row_b[3..], &["Кв. 22", "222", "2222"]);
}

#[tokio::test]
async fn test_interleaved_events_same_engine() {
    let h = Harness::new();

    // Alternate single events between two sessions
    for (a, b) in [
        (command("start"), command("start")),
        (press(Action::MeterReadings), press(Action::MeterReadings)),
        (press(Action::ByAddress), press(Action::ByAccount)),
        (press(Action::Street(0)), text("300400")),
        (text("8"), text("15")),
        (text("9"), text("16")),
        (text("10"), press(Action::Submit)),
        (text("11"), command("menu")),
    ] {
        h.send(1, a).await;
        h.send(2, b).await;
    }
    h.send(1, press(Action::Submit)).await;

    let rows = h.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], "300400");
    assert_eq!(rows[0][2], "ул. Рыленкова, дом № 8");
    assert_eq!(rows[1][1], "");
    assert_eq!(rows[1][2], "ул. Рыленкова, дом № 8");
    assert_eq!(rows[1][3], "Кв. 9");
}

#[tokio::test]
async fn test_unreachable_account_sheet_reprompts() {
    for table in [UnreachableTable::Failing, UnreachableTable::Slow] {
        let engine = Engine::new(
            Arc::new(SessionStore::new()),
            Forms::default(),
            Submitter::new(Arc::new(RecordingSink::default()), Duration::from_secs(2)),
            AccountResolver::new(Arc::new(table), Duration::from_millis(20)),
        );
        let id = SessionId(30);

        engine.handle(id, &command("start")).await;
        engine.handle(id, &press(Action::MeterReadings)).await;
        engine.handle(id, &press(Action::ByAccount)).await;

        let reply = engine.handle(id, &text("100200")).await;
        assert!(reply[0].text.contains("Неверный номер лицевого счета"));

        let session = engine.sessions().get(id).await;
        assert_eq!(session.state, State::EnteringAccountNumber);
        assert!(session.fields.is_empty());
    }
}

#[tokio::test]
async fn test_slash_prefixed_input_is_form_text() {
    let h = Harness::new();
    let id = 31;

    h.send(id, command("start")).await;
    h.send(id, press(Action::MeterReadings)).await;
    h.send(id, press(Action::ByAddress)).await;
    h.send(id, press(Action::Street(BRYLEVKA))).await;

    let reply = h.send(id, text_event("/5")).await;
    assert_eq!(reply[0].text, "Введите № квартиры:");
    h.send(id, text("2")).await;
    h.send(id, text("10")).await;
    h.send(id, text("20")).await;
    h.send(id, press(Action::Submit)).await;

    assert_eq!(h.rows()[0][2], "ул. Брылевка, дом № /5");
}

#[tokio::test]
async fn test_finished_sessions_are_released() {
    let h = Harness::new();
    let sessions = h.engine.sessions();

    // A stray event for an unknown chat leaves nothing behind
    h.send(40, text("hello")).await;
    assert!(sessions.is_empty());

    fill_address_form(&h, 41, "1", "2", "3", "4").await;
    h.send(42, command("start")).await;
    h.send(42, press(Action::MeterReadings)).await;
    assert_eq!(sessions.len(), 2);

    h.send(41, press(Action::Submit)).await;
    assert_eq!(sessions.len(), 1);

    h.send(42, command("menu")).await;
    assert!(sessions.is_empty());
}
