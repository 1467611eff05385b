use std::path::{Path, PathBuf};

use grammers_session::Session;
use log::{debug, trace};

use crate::{
    telegram::TelegramError,
    utils::{get_path, normalize_phone},
};

/// Telegram session file locator.
///
/// Sessions are owned by `grammers`: this type only decides where they live and
/// asks the SDK to load or save them. One session file is kept per phone number,
/// keyed by the digits of the number so `+98 912-000` and `98912000` share it.
///
/// # File Structure
///
/// The data directory contains one `session_<digits>.session` file per account.
///
/// # Examples
///
/// ```no_run
/// use saveit::telegram::SessionStore;
///
/// let store = SessionStore::new("./data");
/// let path = store.session_path("+98 912 000 0000");
/// assert!(path.ends_with("session_989120000000.session"));
/// ```
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory holding the session files.
    dir_path: String,
}

impl SessionStore {
    /// Create a new session locator rooted at `dir_path`.
    pub fn new(dir_path: &str) -> Self {
        SessionStore {
            dir_path: dir_path.to_owned(),
        }
    }

    /// Name of the session for a phone number, without extension.
    pub fn session_name(phone_number: &str) -> String {
        format!("session_{}", normalize_phone(phone_number))
    }

    /// Path of the session file used for `phone_number`.
    pub fn session_path(&self, phone_number: &str) -> PathBuf {
        let file_name = format!("{}.session", SessionStore::session_name(phone_number));
        PathBuf::from(get_path(&self.dir_path, &file_name))
    }

    /// Whether a session file already exists for `phone_number`.
    pub fn has_session(&self, phone_number: &str) -> bool {
        self.session_path(phone_number).exists()
    }

    /// Loads the session at `path`, or starts a fresh one.
    ///
    /// The parent directory is created when missing so that the first save succeeds.
    pub fn load(path: &Path) -> Result<Session, TelegramError> {
        debug!("read session at {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(TelegramError::other)?;
        }

        Session::load_file_or_create(path).map_err(TelegramError::other)
    }

    /// Writes `session` back to `path`.
    pub fn persist(session: &Session, path: &Path) -> Result<(), TelegramError> {
        trace!("persist session to {}", path.display());
        session.save_to_file(path).map_err(TelegramError::other)?;
        trace!("session persisted");
        Ok(())
    }
}
