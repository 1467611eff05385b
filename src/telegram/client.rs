//! `grammers` implementation of the Telegram traits.
//!
//! [`GrammersConnector`] opens a connection with the session file chosen by the
//! login flow, and [`GrammersClient`] maps the [`TelegramApi`] capability set onto
//! `grammers-client` calls.

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
};

use grammers_client::{
    Client, Config, InitParams, InputMessage, SignInError, Update,
    types::{LoginToken, Media, Message, PasswordToken},
};
use grammers_session::PackedChat;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::telegram::{
    Account, Connector, Credentials, IncomingMessage, SessionStore, TelegramApi, TelegramError,
    media_file_name,
};

/// Connects [`GrammersClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrammersConnector;

impl Connector for GrammersConnector {
    type Client = GrammersClient;

    async fn connect(
        &self,
        credentials: &Credentials,
        session_path: &Path,
    ) -> Result<GrammersClient, TelegramError> {
        info!("connecting to telegram with api id {}", credentials.api_id);

        let session = SessionStore::load(session_path)?;
        let client = Client::connect(Config {
            session,
            api_id: credentials.api_id,
            api_hash: credentials.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(TelegramError::other)?;

        info!("connected");
        Ok(GrammersClient::new(client, session_path))
    }
}

/// Telegram client backed by `grammers`.
///
/// Login tokens returned by Telegram between two login steps are kept here so the
/// login flow only deals with plain strings. Chats seen in incoming messages are
/// remembered because every `grammers` call needs the packed chat, not only its id.
pub struct GrammersClient {
    /// Underlying grammers client
    client: Client,
    /// Where the session is saved after login and on disconnect
    session_path: PathBuf,
    /// Token of the last login code request
    login_token: Mutex<Option<LoginToken>>,
    /// Token returned when the account has 2FA enabled
    password_token: Mutex<Option<PasswordToken>>,
    /// Packed chats indexed by chat id
    chats: Mutex<HashMap<i64, PackedChat>>,
    /// Packed chat of the logged in account, i.e. Saved Messages
    saved_messages: Mutex<Option<PackedChat>>,
}

impl GrammersClient {
    fn new(client: Client, session_path: &Path) -> Self {
        GrammersClient {
            client,
            session_path: session_path.to_path_buf(),
            login_token: Mutex::new(None),
            password_token: Mutex::new(None),
            chats: Mutex::new(HashMap::new()),
            saved_messages: Mutex::new(None),
        }
    }

    /// Saves the session, logging instead of failing: the login itself succeeded.
    fn persist_session(&self) {
        if let Err(e) = SessionStore::persist(self.client.session(), &self.session_path) {
            error!("failed to persist session: {}", e);
        }
    }

    async fn packed_chat(&self, chat_id: i64) -> Result<PackedChat, TelegramError> {
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .copied()
            .ok_or_else(|| TelegramError::Other(format!("unknown chat {}", chat_id)))
    }

    /// Packed chat of Saved Messages, fetched once.
    async fn saved_messages(&self) -> Result<PackedChat, TelegramError> {
        cached(&self.saved_messages, || async move {
            let me = self.client.get_me().await.map_err(TelegramError::other)?;
            Ok(me.pack())
        })
        .await
    }

    async fn fetch(&self, chat_id: i64, message_id: i32) -> Result<Option<Message>, TelegramError> {
        let chat = self.packed_chat(chat_id).await?;
        let messages = self
            .client
            .get_messages_by_id(chat, &[message_id])
            .await
            .map_err(TelegramError::other)?;

        Ok(messages.into_iter().next().flatten())
    }

    fn to_incoming(message: &Message) -> IncomingMessage {
        IncomingMessage {
            id: message.id(),
            chat_id: message.chat().id(),
            sender_id: message.sender().map(|sender| sender.id()),
            outgoing: message.outgoing(),
            text: message.text().to_owned(),
            reply_to_message_id: message.reply_to_message_id(),
            has_media: message.media().is_some(),
        }
    }
}

impl TelegramApi for GrammersClient {
    async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(TelegramError::other)
    }

    async fn request_login_code(&self, phone_number: &str) -> Result<(), TelegramError> {
        info!("request login code");
        let token = self
            .client
            .request_login_code(phone_number)
            .await
            .map_err(TelegramError::other)?;

        *self.login_token.lock().await = Some(token);
        Ok(())
    }

    async fn sign_in(&self, _phone_number: &str, code: &str) -> Result<(), TelegramError> {
        // The login token already carries the phone number
        let mut login_token = self.login_token.lock().await;
        let token = login_token
            .take()
            .ok_or_else(|| TelegramError::Other("no login code was requested".to_owned()))?;

        match self.client.sign_in(&token, code).await {
            Ok(_) => {
                info!("signed in");
                self.persist_session();
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                info!("2FA password required");
                *self.password_token.lock().await = Some(password_token);
                Err(TelegramError::PasswordRequired)
            }
            Err(SignInError::InvalidCode) => {
                *login_token = Some(token);
                Err(TelegramError::InvalidCode)
            }
            Err(e) => {
                *login_token = Some(token);
                Err(TelegramError::other(e))
            }
        }
    }

    async fn check_password(&self, password: &str) -> Result<(), TelegramError> {
        let password_token = self.password_token.lock().await.clone().ok_or_else(|| {
            TelegramError::Other("telegram did not ask for a password".to_owned())
        })?;

        match self.client.check_password(password_token, password).await {
            Ok(_) => {
                info!("signed in with 2FA password");
                self.password_token.lock().await.take();
                self.persist_session();
                Ok(())
            }
            Err(SignInError::InvalidPassword) => Err(TelegramError::InvalidPassword),
            Err(e) => Err(TelegramError::other(e)),
        }
    }

    async fn get_me(&self) -> Result<Account, TelegramError> {
        let me = self.client.get_me().await.map_err(TelegramError::other)?;
        *self.saved_messages.lock().await = Some(me.pack());
        Ok(Account {
            id: me.id(),
            first_name: me.first_name().to_owned(),
        })
    }

    async fn next_message(&self) -> Result<IncomingMessage, TelegramError> {
        loop {
            let update = self
                .client
                .next_update()
                .await
                .map_err(TelegramError::other)?;

            if let Update::NewMessage(message) = update {
                let chat = message.chat();
                self.chats.lock().await.insert(chat.id(), chat.pack());
                return Ok(GrammersClient::to_incoming(&message));
            }
        }
    }

    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<Option<IncomingMessage>, TelegramError> {
        let message = self.fetch(chat_id, message_id).await?;
        Ok(message.as_ref().map(GrammersClient::to_incoming))
    }

    async fn reply(&self, chat_id: i64, reply_to: i32, text: &str) -> Result<i32, TelegramError> {
        let chat = self.packed_chat(chat_id).await?;
        let sent = self
            .client
            .send_message(chat, InputMessage::text(text).reply_to(Some(reply_to)))
            .await
            .map_err(TelegramError::other)?;

        Ok(sent.id())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), TelegramError> {
        let chat = self.packed_chat(chat_id).await?;
        self.client
            .edit_message(chat, message_id, InputMessage::text(text))
            .await
            .map_err(TelegramError::other)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TelegramError> {
        let chat = self.packed_chat(chat_id).await?;
        let deleted = self
            .client
            .delete_messages(chat, &[message_id])
            .await
            .map_err(TelegramError::other)?;

        if deleted == 0 {
            warn!("message {} in chat {} was already gone", message_id, chat_id);
        }
        Ok(())
    }

    async fn download_media(
        &self,
        chat_id: i64,
        message_id: i32,
        dir: &Path,
    ) -> Result<PathBuf, TelegramError> {
        let message = self
            .fetch(chat_id, message_id)
            .await?
            .ok_or_else(|| TelegramError::Other("message not found".to_owned()))?;

        let file_name = match message.media() {
            Some(Media::Document(document)) => media_file_name(
                chat_id,
                message_id,
                Some(document.name()),
                document.mime_type(),
            ),
            Some(Media::Photo(_)) => media_file_name(chat_id, message_id, None, Some("image/jpeg")),
            Some(_) => media_file_name(chat_id, message_id, None, None),
            None => return Err(TelegramError::Other("message has no media".to_owned())),
        };

        let path = dir.join(file_name);
        debug!("download media to {}", path.display());

        let downloaded = message
            .download_media(&path)
            .await
            .map_err(TelegramError::other)?;
        if !downloaded {
            return Err(TelegramError::Other("media cannot be downloaded".to_owned()));
        }

        Ok(path)
    }

    async fn send_file_to_saved(&self, path: &Path, caption: &str) -> Result<(), TelegramError> {
        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(TelegramError::other)?;
        let saved_messages = self.saved_messages().await?;

        self.client
            .send_message(saved_messages, InputMessage::text(caption).document(uploaded))
            .await
            .map_err(TelegramError::other)?;

        debug!("{} uploaded to saved messages", path.display());
        Ok(())
    }

    async fn disconnect(&self) {
        info!("persisting session before disconnecting");
        self.persist_session();
    }
}

/// Returns the value in `slot`, filling it with `fetch` when empty.
///
/// A failed fetch leaves the slot empty so the next call tries again.
async fn cached<T, F, Fut>(slot: &Mutex<Option<T>>, fetch: F) -> Result<T, TelegramError>
where
    T: Copy,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TelegramError>>,
{
    let mut slot = slot.lock().await;
    if let Some(value) = *slot {
        return Ok(value);
    }

    let value = fetch().await?;
    *slot = Some(value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_cached_fetches_once() {
        let slot = Mutex::new(None);
        let fetches = AtomicUsize::new(0);
        let fetches = &fetches;

        for _ in 0..3 {
            let value = cached(&slot, || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(42_i64)
            })
            .await;
            assert_eq!(value, Ok(42));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_uses_prefilled_value() {
        let slot = Mutex::new(Some(7_i64));

        let value = cached(&slot, || async { Err(TelegramError::other("offline")) }).await;

        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_cached_retries_after_failure() {
        let slot = Mutex::new(None);

        let failed = cached(&slot, || async { Err(TelegramError::other("FLOOD_WAIT")) }).await;
        let value = cached(&slot, || async { Ok(42_i64) }).await;

        assert_eq!(failed, Err(TelegramError::other("FLOOD_WAIT")));
        assert_eq!(value, Ok(42));
        assert_eq!(*slot.lock().await, Some(42));
    }
}
