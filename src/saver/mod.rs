//! Media saver command.
//!
//! When the logged in account replies to a media message with the trigger
//! (`.saveit` by default), the [`MediaSaver`] downloads the media and uploads it
//! again to the account's Saved Messages.
//!
//! # Flow
//!
//! ```text
//! trigger message
//!      │
//!      ├── not sent by the account ──► ignored
//!      ▼
//! reply "Downloading..."
//!      │
//!      ├── not a reply ──────────────► "Please reply to a media."
//!      ├── reply target has no media ► "No media found."
//!      ▼
//! download ─► upload to Saved Messages ─► "Saved successfully!"
//!      │                                        │
//!      └── error ──► "Error: ..."               ├── delete trigger message
//!                                               └── delete status after a delay
//! ```

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::fs;

use crate::{
    config,
    telegram::{IncomingMessage, TelegramApi, TelegramError},
    utils::get_path,
};

mod listener;

pub use crate::saver::listener::listen;

/// Status shown while the media is being saved.
pub const STATUS_DOWNLOADING: &str = "Downloading...";
/// Status shown when the trigger is not a reply.
pub const STATUS_NOT_A_REPLY: &str = "Please reply to a media.";
/// Status shown when the replied message has no media.
pub const STATUS_NO_MEDIA: &str = "No media found.";
/// Status shown once the media is in Saved Messages.
pub const STATUS_SAVED: &str = "Saved successfully!";

/// Formats the status shown when saving failed.
pub fn format_error_status(error: &TelegramError) -> String {
    format!("Error: {}", error)
}

/// Settings of the media saver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaverSettings {
    /// Text a message must contain to trigger the saver
    pub trigger: String,
    /// Directory receiving downloaded media, created on demand
    pub download_dir: PathBuf,
    /// Caption of the document sent to Saved Messages
    pub caption: String,
    /// Delay before the status message is deleted
    pub status_delete_delay: Duration,
}

impl SaverSettings {
    /// Builds the settings from the configuration, resolving the download
    /// directory against the data directory.
    pub fn from_config(saver: &config::Saver, data_path: &str) -> Self {
        SaverSettings {
            trigger: saver.trigger.clone(),
            download_dir: PathBuf::from(get_path(data_path, &saver.download_dir)),
            caption: saver.caption.clone(),
            status_delete_delay: Duration::from_secs(saver.status_delete_delay),
        }
    }
}

/// Result of one saver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The trigger was not sent by the account
    Ignored,
    /// The trigger was not a reply
    NotAReply,
    /// The replied message has no media
    NoMedia,
    /// The media was saved from this local file
    Saved(PathBuf),
    /// Saving failed with this error
    Failed(String),
}

impl fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveOutcome::Ignored => write!(f, "ignored a trigger from another user"),
            SaveOutcome::NotAReply => write!(f, "trigger was not a reply"),
            SaveOutcome::NoMedia => write!(f, "replied message has no media"),
            SaveOutcome::Saved(path) => write!(f, "saved {}", path.display()),
            SaveOutcome::Failed(error) => write!(f, "failed to save media: {}", error),
        }
    }
}

/// Handler saving replied media to Saved Messages.
///
/// It is created by the login flow once authenticated and owns a handle on the
/// client, so it can be moved into the message listener.
pub struct MediaSaver<T: TelegramApi> {
    /// Client handle shared with the login flow
    client: Arc<T>,
    /// Id of the logged in account; only its messages trigger the saver
    owner_id: i64,
    /// Saver settings
    settings: SaverSettings,
}

impl<T: TelegramApi> MediaSaver<T> {
    /// Creates a saver bound to `client` and acting for `owner_id` only.
    pub fn new(client: Arc<T>, owner_id: i64, settings: SaverSettings) -> Self {
        MediaSaver {
            client,
            owner_id,
            settings,
        }
    }

    /// Id of the account this saver acts for.
    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }

    /// Settings of this saver.
    pub fn settings(&self) -> &SaverSettings {
        &self.settings
    }

    /// The client handle the saver uses.
    pub fn client(&self) -> &Arc<T> {
        &self.client
    }

    /// Whether a message text contains the trigger.
    pub fn matches(&self, text: &str) -> bool {
        text.contains(&self.settings.trigger)
    }

    /// Handles a trigger message.
    ///
    /// Every failure is reported in the chat through the status message and in the
    /// returned [`SaveOutcome`]; nothing is retried.
    pub async fn handle(&self, message: &IncomingMessage) -> SaveOutcome {
        if !message.outgoing && message.sender_id != Some(self.owner_id) {
            debug!(
                "ignore trigger from {:?} in chat {}",
                message.sender_id, message.chat_id
            );
            return SaveOutcome::Ignored;
        }

        let chat_id = message.chat_id;
        let status_id = match self
            .client
            .reply(chat_id, message.id, STATUS_DOWNLOADING)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("failed to reply to trigger {}: {}", message.id, e);
                return SaveOutcome::Failed(e.to_string());
            }
        };

        let Some(reply_to) = message.reply_to_message_id else {
            self.set_status(chat_id, status_id, STATUS_NOT_A_REPLY).await;
            return SaveOutcome::NotAReply;
        };

        match self.client.get_message(chat_id, reply_to).await {
            Ok(Some(target)) if target.has_media => {}
            Ok(_) => {
                self.set_status(chat_id, status_id, STATUS_NO_MEDIA).await;
                return SaveOutcome::NoMedia;
            }
            Err(e) => {
                self.set_status(chat_id, status_id, &format_error_status(&e))
                    .await;
                return SaveOutcome::Failed(e.to_string());
            }
        }

        match self.save(chat_id, reply_to).await {
            Ok(path) => {
                info!("saved {} to saved messages", path.display());
                self.clean_up(chat_id, message.id, status_id).await;
                SaveOutcome::Saved(path)
            }
            Err(e) => {
                warn!("failed to save media of message {}: {}", reply_to, e);
                self.set_status(chat_id, status_id, &format_error_status(&e))
                    .await;
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    /// Downloads the media of `message_id` and uploads it to Saved Messages.
    async fn save(&self, chat_id: i64, message_id: i32) -> Result<PathBuf, TelegramError> {
        fs::create_dir_all(&self.settings.download_dir)
            .await
            .map_err(TelegramError::other)?;

        let path = self
            .client
            .download_media(chat_id, message_id, &self.settings.download_dir)
            .await?;
        debug!("downloaded {}", path.display());

        self.client
            .send_file_to_saved(&path, &self.settings.caption)
            .await?;
        Ok(path)
    }

    /// Reports success, then removes the trigger and, after the delay, the status.
    async fn clean_up(&self, chat_id: i64, trigger_id: i32, status_id: i32) {
        self.set_status(chat_id, status_id, STATUS_SAVED).await;

        if let Err(e) = self.client.delete_message(chat_id, trigger_id).await {
            warn!("failed to delete trigger message {}: {}", trigger_id, e);
        }

        tokio::time::sleep(self.settings.status_delete_delay).await;

        if let Err(e) = self.client.delete_message(chat_id, status_id).await {
            warn!("failed to delete status message {}: {}", status_id, e);
        }
    }

    async fn set_status(&self, chat_id: i64, status_id: i32, text: &str) {
        if let Err(e) = self.client.edit_message(chat_id, status_id, text).await {
            warn!("failed to edit status message {}: {}", status_id, e);
        }
    }
}
