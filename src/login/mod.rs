//! Login flow of the saver.
//!
//! The flow walks a single form through three stages:
//!
//! ```text
//! AwaitingCredentials ──► AwaitingCode ──► AwaitingPassword ──► Authenticated
//!          │                   │                                      ▲
//!          │                   └──────────────────────────────────────┤
//!          └──────────────── (session already authorized) ────────────┘
//! ```
//!
//! Transitions only go forward. A failed step keeps the current stage and reports
//! the problem through [`LoginSnapshot::field_errors`] or [`LoginSnapshot::notice`].
//!
//! # Module Organization
//!
//! - [`LoginState`] - The stage, with the fields it requires and its button label
//! - [`LoginForm`] - The values typed by the user
//! - [`flow`] - The [`LoginFlow`] state machine driving a [`Connector`](crate::telegram::Connector)

use std::collections::BTreeMap;

use crate::{config, telegram::Account};

mod flow;

pub use crate::login::flow::LoginFlow;

/// Stage of the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Waiting for api id, api hash and phone number
    AwaitingCredentials,
    /// A login code was sent to the phone
    AwaitingCode,
    /// The account has 2FA enabled
    AwaitingPassword,
    /// Logged in, the media saver is running
    Authenticated,
}

/// Fields required by each stage.
const REQUIRED_FIELDS: [(LoginState, &[Field]); 4] = [
    (
        LoginState::AwaitingCredentials,
        &[Field::ApiId, Field::ApiHash, Field::PhoneNumber],
    ),
    (LoginState::AwaitingCode, &[Field::Code]),
    (LoginState::AwaitingPassword, &[Field::Password]),
    (LoginState::Authenticated, &[]),
];

impl LoginState {
    /// Fields the user has to fill before advancing from this stage.
    pub fn required_fields(&self) -> &'static [Field] {
        REQUIRED_FIELDS
            .iter()
            .find(|(state, _)| state == self)
            .map(|(_, fields)| *fields)
            .unwrap_or(&[])
    }

    /// Label of the button advancing from this stage.
    pub fn action_label(&self) -> &'static str {
        match self {
            LoginState::AwaitingCredentials => "Connect & Start",
            LoginState::AwaitingCode => "Verify Code",
            LoginState::AwaitingPassword => "Verify Password",
            LoginState::Authenticated => "Running",
        }
    }
}

/// Input fields of the login form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    ApiId,
    ApiHash,
    PhoneNumber,
    Code,
    Password,
}

impl Field {
    /// Label shown next to the field.
    pub fn label(&self) -> &'static str {
        match self {
            Field::ApiId => "API ID",
            Field::ApiHash => "API Hash",
            Field::PhoneNumber => "Phone Number",
            Field::Code => "Login Code",
            Field::Password => "2FA Password (If enabled)",
        }
    }

    /// Example value shown while the field is empty.
    pub fn hint(&self) -> &'static str {
        match self {
            Field::ApiId => "Example: 123456",
            Field::ApiHash => "Example: a1b2c3d4...",
            Field::PhoneNumber => "+98912...",
            Field::Code => "12345",
            Field::Password => "",
        }
    }

    /// Whether the value must be masked.
    pub fn is_secret(&self) -> bool {
        matches!(self, Field::ApiHash | Field::Password)
    }
}

/// Values typed in the login form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub api_id: String,
    pub api_hash: String,
    pub phone_number: String,
    pub code: String,
    pub password: String,
}

impl LoginForm {
    /// Builds a form prefilled with the configured credentials.
    pub fn from_config(telegram: &config::Telegram) -> Self {
        LoginForm {
            api_id: telegram.api_id.map(|id| id.to_string()).unwrap_or_default(),
            api_hash: telegram.api_hash.clone().unwrap_or_default(),
            phone_number: telegram.phone_number.clone().unwrap_or_default(),
            ..LoginForm::default()
        }
    }

    /// Value of a field.
    pub fn value(&self, field: Field) -> &str {
        match field {
            Field::ApiId => &self.api_id,
            Field::ApiHash => &self.api_hash,
            Field::PhoneNumber => &self.phone_number,
            Field::Code => &self.code,
            Field::Password => &self.password,
        }
    }

    /// Mutable value of a field, for text inputs.
    pub fn value_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::ApiId => &mut self.api_id,
            Field::ApiHash => &mut self.api_hash,
            Field::PhoneNumber => &mut self.phone_number,
            Field::Code => &mut self.code,
            Field::Password => &mut self.password,
        }
    }
}

/// What the window needs to render the login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSnapshot {
    /// Current stage
    pub state: LoginState,
    /// Error text per invalid field
    pub field_errors: BTreeMap<Field, String>,
    /// Error not tied to a field, e.g. a connection failure
    pub notice: Option<String>,
    /// The logged in account once authenticated
    pub account: Option<Account>,
}

impl Default for LoginSnapshot {
    fn default() -> Self {
        LoginSnapshot {
            state: LoginState::AwaitingCredentials,
            field_errors: BTreeMap::new(),
            notice: None,
            account: None,
        }
    }
}
