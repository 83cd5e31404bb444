//! Form Definitions
//!
//! Declarative field sequences for the two intake modes. The engine walks
//! these in order; nothing else about a mode is hard-coded in the engine.

/// Streets served by the management company, in menu order
pub const STREETS: [&str; 5] = [
    "ул. Рыленкова",
    "ул. Генерала Коновницына",
    "ул. Генерала Паскевича",
    "пр-д Соловьиная роща",
    "ул. Брылевка",
];

// Field names shared with the submission row builder
pub const STREET: &str = "street";
pub const HOUSE: &str = "house";
pub const APARTMENT: &str = "apartment";
pub const READING: &str = "reading";
pub const COLD_WATER: &str = "cold_water";
pub const ELECTRICITY: &str = "electr";
pub const ACCOUNT: &str = "account";
pub const ADDRESS: &str = "address";

/// Intake mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Address,
    Account,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Account => "account",
        }
    }
}

/// Pure predicate over raw input text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Any text with at least one non-whitespace character
    NonEmpty,
    /// ASCII digits only, at least one
    Digits,
}

impl Validator {
    pub fn check(&self, raw: &str) -> bool {
        let text = raw.trim();
        match self {
            Self::NonEmpty => !text.is_empty(),
            Self::Digits => !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormField {
    pub name: &'static str,
    pub prompt: &'static str,
    pub validator: Validator,
}

impl FormField {
    const fn text(name: &'static str, prompt: &'static str) -> Self {
        Self {
            name,
            prompt,
            validator: Validator::NonEmpty,
        }
    }
}

const HOUSE_FIELD: FormField = FormField::text(HOUSE, "Введите № дома:");
const APARTMENT_FIELD: FormField = FormField::text(APARTMENT, "Введите № квартиры:");
const COLD_WATER_PROMPT: &str = "Введите показания счётчика холодной воды:";
const ELECTRICITY_FIELD: FormField =
    FormField::text(ELECTRICITY, "Введите показания счётчика электроэнергии:");

/// Prompt and validator for the account number step (not a form field:
/// it runs before the form and goes through the account lookup)
pub const ACCOUNT_NUMBER: FormField = FormField {
    name: ACCOUNT,
    prompt: "Введите № лицевого счета (только цифры):",
    validator: Validator::Digits,
};

/// Ordered field list for one mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDefinition {
    pub fields: Vec<FormField>,
}

impl FormDefinition {
    pub fn field(&self, index: usize) -> Option<&FormField> {
        self.fields.get(index)
    }
}

/// Both modes' definitions, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forms {
    address: FormDefinition,
    account: FormDefinition,
    collects_electricity: bool,
}

impl Forms {
    /// `collect_electricity = false` gives the cold-water-only variant
    pub fn new(collect_electricity: bool) -> Self {
        let mut address = vec![
            HOUSE_FIELD,
            APARTMENT_FIELD,
            FormField::text(READING, COLD_WATER_PROMPT),
        ];
        let mut account = vec![FormField::text(COLD_WATER, COLD_WATER_PROMPT)];
        if collect_electricity {
            address.push(ELECTRICITY_FIELD);
            account.push(ELECTRICITY_FIELD);
        }

        Self {
            address: FormDefinition { fields: address },
            account: FormDefinition { fields: account },
            collects_electricity: collect_electricity,
        }
    }

    pub fn for_mode(&self, mode: Mode) -> &FormDefinition {
        match mode {
            Mode::Address => &self.address,
            Mode::Account => &self.account,
        }
    }

    pub fn collects_electricity(&self) -> bool {
        self.collects_electricity
    }
}

impl Default for Forms {
    fn default() -> Self {
        Self::new(true)
    }
}
