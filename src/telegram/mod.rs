//! Telegram integration for the saver.
//!
//! Everything that talks to Telegram goes through two narrow traits:
//!
//! - [`Connector`] builds a client handle from [`Credentials`] and a session file
//! - [`TelegramApi`] is the capability set used by the login flow and the media saver
//!
//! The login flow, the media saver and the backend only depend on these traits, which
//! lets their tests run against `mockall` fakes. The concrete implementation lives in
//! the client submodule and wraps `grammers-client`.
//!
//! # Examples
//!
//! ```no_run
//! use saveit::telegram::{Connector, Credentials, GrammersConnector, TelegramApi};
//!
//! # async fn example() -> Result<(), saveit::telegram::TelegramError> {
//! let credentials = Credentials {
//!     api_id: 123456,
//!     api_hash: "a1b2c3d4".to_string(),
//!     phone_number: "+98 912 000 0000".to_string(),
//! };
//!
//! let client = GrammersConnector
//!     .connect(&credentials, std::path::Path::new("session_989120000000.session"))
//!     .await?;
//! println!("authorized: {}", client.is_authorized().await?);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use mockall::automock;

mod client;
mod session;

pub use crate::telegram::client::GrammersConnector;
pub use crate::telegram::session::SessionStore;

/// Credentials of a Telegram application and the account to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Application id from my.telegram.org
    pub api_id: i32,
    /// Application hash from my.telegram.org
    pub api_hash: String,
    /// Phone number of the account, as typed by the user
    pub phone_number: String,
}

/// The authenticated Telegram account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Telegram user id
    pub id: i64,
    /// First name, used for the welcome line
    pub first_name: String,
}

/// Read-only view of a Telegram message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id, unique inside its chat
    pub id: i32,
    /// Chat the message belongs to
    pub chat_id: i64,
    /// Sender of the message, if Telegram exposes it
    pub sender_id: Option<i64>,
    /// Whether the message was sent by the logged in account
    pub outgoing: bool,
    /// Text (or caption) of the message
    pub text: String,
    /// Id of the message this one replies to
    pub reply_to_message_id: Option<i32>,
    /// Whether the message carries a media attachment
    pub has_media: bool,
}

/// Errors returned across the Telegram boundary.
///
/// `PasswordRequired` is not a failure: it tells the login flow that the account
/// has a second factor enabled.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TelegramError {
    #[error("a 2FA password is required")]
    PasswordRequired,
    #[error("invalid login code")]
    InvalidCode,
    #[error("invalid password")]
    InvalidPassword,
    #[error("{0}")]
    Other(String),
}

impl TelegramError {
    /// Wraps any error coming from the SDK or the filesystem.
    pub fn other(err: impl Display) -> Self {
        TelegramError::Other(err.to_string())
    }
}

/// Builds connected client handles.
#[automock(type Client = MockTelegramApi;)]
pub trait Connector {
    /// Client handle produced by this connector.
    type Client: TelegramApi;

    /// Connects to Telegram using the session stored at `session_path`.
    ///
    /// The session file is created if it does not exist yet.
    async fn connect(
        &self,
        credentials: &Credentials,
        session_path: &Path,
    ) -> Result<Self::Client, TelegramError>;
}

/// Capability set of a connected Telegram client.
#[automock]
pub trait TelegramApi {
    /// Whether the loaded session is already logged in.
    async fn is_authorized(&self) -> Result<bool, TelegramError>;

    /// Asks Telegram to send a login code to `phone_number`.
    async fn request_login_code(&self, phone_number: &str) -> Result<(), TelegramError>;

    /// Completes the login with the received code.
    ///
    /// Returns [`TelegramError::PasswordRequired`] when the account has 2FA enabled.
    async fn sign_in(&self, phone_number: &str, code: &str) -> Result<(), TelegramError>;

    /// Completes a 2FA login with the account password.
    async fn check_password(&self, password: &str) -> Result<(), TelegramError>;

    /// Fetches the logged in account.
    async fn get_me(&self) -> Result<Account, TelegramError>;

    /// Waits for the next new message seen by the account.
    async fn next_message(&self) -> Result<IncomingMessage, TelegramError>;

    /// Fetches a single message, `None` if it does not exist anymore.
    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Option<IncomingMessage>, TelegramError>;

    /// Replies to a message and returns the id of the reply.
    async fn reply(&self, chat_id: i64, reply_to: i32, text: &str) -> Result<i32, TelegramError>;

    /// Replaces the text of a message.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), TelegramError>;

    /// Deletes a message for everyone.
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TelegramError>;

    /// Downloads the media of a message into `dir` and returns the file path.
    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i32,
        dir: &Path,
    ) -> Result<PathBuf, TelegramError>;

    /// Uploads a file to Saved Messages as a document.
    async fn send_file_to_saved(&self, path: &Path, caption: &str) -> Result<(), TelegramError>;

    /// Persists the session.
    ///
    /// The connection itself closes once the last handle on the client is dropped,
    /// at the latest with the process.
    async fn disconnect(&self);
}

/// Picks the file name of a downloaded media.
///
/// Documents keep their original name when they have one. Everything else is
/// named after the chat and message ids, with an extension guessed from the
/// mime type.
pub fn media_file_name(
    chat_id: i64,
    message_id: i32,
    name: Option<&str>,
    mime_type: Option<&str>,
) -> String {
    if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
        // Keep only the last component, names come from other users
        if let Some(file_name) = Path::new(name).file_name().and_then(|n| n.to_str()) {
            return file_name.to_owned();
        }
    }

    let extension = mime_type
        .and_then(|m| m.parse::<mime::Mime>().ok())
        .map(|m| match m.essence_str() {
            "image/jpeg" => "jpg".to_owned(),
            "text/plain" => "txt".to_owned(),
            _ => m.subtype().as_str().to_owned(),
        })
        .unwrap_or_else(|| "bin".to_owned());

    format!("{}_{}.{}", chat_id, message_id, extension)
}
