//! Backend of the saver.
//!
//! The window and the Telegram client live on different threads. The [`Bot`] owns
//! the [`LoginFlow`] on the backend thread, runs the commands sent by the window
//! and publishes what the window has to render.
//!
//! # Architecture
//!
//! ```text
//! window ── BackendCommand ──► Bot ── LoginFlow ──► Telegram
//!   ▲                           │
//!   └──────── UiEvent ──────────┤
//!                               └── listener ──► MediaSaver (one local task per trigger)
//! ```
//!
//! The backend thread drives a current-thread tokio runtime with a
//! [`LocalSet`], so the listener and every save run as local tasks on the same
//! loop as the login flow.

use std::{
    sync::{Arc, mpsc::Sender},
    thread,
};

use anyhow::Context;
use log::{debug, info};
use tokio::{
    runtime,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::{JoinHandle, LocalSet},
};

use crate::{
    config::Config,
    login::{LoginFlow, LoginForm, LoginSnapshot, LoginState},
    saver::{MediaSaver, SaveOutcome, SaverSettings, listen},
    telegram::{Connector, GrammersConnector, SessionStore},
};

/// Commands sent by the window.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    /// The action button was pressed with these form values
    Advance(LoginForm),
    /// The logout button was pressed
    Logout,
}

/// Events published to the window.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// New state of the login flow
    Login(LoginSnapshot),
    /// Line for the activity log
    Log(String),
    /// The client is disconnected, the window can close
    Closed,
}

/// Backend owning the login flow and the message listener.
pub struct Bot<C: Connector> {
    /// Login flow, registering the media saver once authenticated
    flow: LoginFlow<C>,
    /// Events to the window
    ui_tx: Sender<UiEvent>,
    /// Message listener task, started once authenticated
    listener: Option<JoinHandle<()>>,
}

impl<C> Bot<C>
where
    C: Connector,
    C::Client: 'static,
{
    /// Creates a backend around `flow`.
    pub fn new(flow: LoginFlow<C>, ui_tx: Sender<UiEvent>) -> Self {
        Bot {
            flow,
            ui_tx,
            listener: None,
        }
    }

    /// Runs commands until logout or until the window goes away.
    ///
    /// Must run inside a [`LocalSet`].
    pub async fn run(mut self, mut cmd_rx: UnboundedReceiver<BackendCommand>) {
        self.publish(UiEvent::Login(self.flow.snapshot()));

        while let Some(command) = cmd_rx.recv().await {
            match command {
                BackendCommand::Advance(form) => self.advance(&form).await,
                BackendCommand::Logout => {
                    info!("logout requested");
                    self.shutdown().await;
                    self.publish(UiEvent::Closed);
                    return;
                }
            }
        }

        debug!("window closed, stopping backend");
        self.shutdown().await;
    }

    async fn advance(&mut self, form: &LoginForm) {
        let state = self.flow.advance(form).await;
        let snapshot = self.flow.snapshot();

        if let Some(notice) = &snapshot.notice {
            self.log(notice.clone());
        }
        if let Some(account) = &snapshot.account {
            self.log(format!("Logged in as {}", account.first_name));
        }
        self.publish(UiEvent::Login(snapshot));

        if state != LoginState::Authenticated {
            return;
        }
        if let Some(saver) = self.flow.take_media_saver() {
            self.start_listener(saver);
        }
    }

    /// Spawns the listener feeding `saver` and reporting outcomes to the log.
    fn start_listener(&mut self, saver: MediaSaver<C::Client>) {
        self.log(format!(
            "Bot Active. Reply '{}' to a media to save it",
            saver.settings().trigger
        ));

        let ui_tx = self.ui_tx.clone();
        let on_outcome = {
            let ui_tx = self.ui_tx.clone();
            move |outcome: SaveOutcome| {
                info!("trigger handled: {}", outcome);
                if outcome != SaveOutcome::Ignored {
                    let _ = ui_tx.send(UiEvent::Log(outcome.to_string()));
                }
            }
        };

        self.listener = Some(tokio::task::spawn_local(async move {
            if let Err(e) = listen(Arc::new(saver), on_outcome).await {
                let _ = ui_tx.send(UiEvent::Log(format!("Listener stopped: {}", e)));
            }
        }));
    }

    async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.flow.disconnect().await;
    }

    fn log(&self, line: String) {
        self.publish(UiEvent::Log(line));
    }

    fn publish(&self, event: UiEvent) {
        if self.ui_tx.send(event).is_err() {
            debug!("window is gone, event dropped");
        }
    }
}

/// Starts the backend thread talking to Telegram through `grammers`.
///
/// Sessions are stored in `data_path` and downloads go to the configured directory
/// under it.
///
/// The thread is detached: it stops once the returned sender is dropped, or with
/// the process.
///
/// # Returns
///
/// The sender for window commands.
///
/// # Errors
///
/// Returns an error if the tokio runtime or the thread cannot be created.
pub fn spawn_backend(
    config: &Config,
    data_path: &str,
    ui_tx: Sender<UiEvent>,
) -> Result<UnboundedSender<BackendCommand>, anyhow::Error> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    let sessions = SessionStore::new(data_path);
    let settings = SaverSettings::from_config(&config.saver, data_path);
    let (cmd_tx, cmd_rx) = unbounded_channel();

    thread::Builder::new()
        .name("telegram".to_owned())
        .spawn(move || {
            let flow = LoginFlow::new(GrammersConnector, sessions, settings);
            let bot = Bot::new(flow, ui_tx);

            LocalSet::new().block_on(&runtime, bot.run(cmd_rx));
            info!("backend stopped");
        })
        .context("failed to spawn the backend thread")?;

    Ok(cmd_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        login::Field,
        telegram::{Account, MockConnector, MockTelegramApi, TelegramError},
    };
    use std::{path::PathBuf, sync::mpsc, time::Duration};

    fn create_settings() -> SaverSettings {
        SaverSettings {
            trigger: ".saveit".to_string(),
            download_dir: PathBuf::from("downloads"),
            caption: "Saved via App".to_string(),
            status_delete_delay: Duration::ZERO,
        }
    }

    fn create_form() -> LoginForm {
        LoginForm {
            api_id: "123456".to_string(),
            api_hash: "a1b2c3d4".to_string(),
            phone_number: "+98912".to_string(),
            ..LoginForm::default()
        }
    }

    /// Runs a backend over `connector` with the given commands, returning every
    /// event it published.
    async fn run_bot(connector: MockConnector, commands: Vec<BackendCommand>) -> Vec<UiEvent> {
        let flow = LoginFlow::new(connector, SessionStore::new("/data"), create_settings());
        let (ui_tx, ui_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = unbounded_channel();

        for command in commands {
            cmd_tx.send(command).unwrap();
        }
        drop(cmd_tx);

        LocalSet::new()
            .run_until(Bot::new(flow, ui_tx).run(cmd_rx))
            .await;

        ui_rx.try_iter().collect()
    }

    fn snapshots(events: &[UiEvent]) -> Vec<&LoginSnapshot> {
        events
            .iter()
            .filter_map(|event| match event {
                UiEvent::Login(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_published() {
        let events = run_bot(MockConnector::new(), vec![]).await;

        assert_eq!(events, vec![UiEvent::Login(LoginSnapshot::default())]);
    }

    #[tokio::test]
    async fn test_invalid_advance_publishes_errors() {
        let events = run_bot(
            MockConnector::new(),
            vec![BackendCommand::Advance(LoginForm::default())],
        )
        .await;

        let snapshots = snapshots(&events);
        assert_eq!(snapshots.len(), 2);
        let last = snapshots[1];
        assert_eq!(last.state, LoginState::AwaitingCredentials);
        assert_eq!(last.field_errors.len(), 3);
        assert_eq!(last.field_errors[&Field::ApiId], "Required");
    }

    #[tokio::test]
    async fn test_connection_error_is_logged() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_, _| Err(TelegramError::other("timeout")));

        let events = run_bot(
            connector,
            vec![BackendCommand::Advance(create_form())],
        )
        .await;

        assert!(events.contains(&UiEvent::Log("Error: timeout".to_string())));
        assert_eq!(
            snapshots(&events)[1].notice.as_deref(),
            Some("Error: timeout")
        );
    }

    #[tokio::test]
    async fn test_logout_publishes_closed() {
        let mut client = MockTelegramApi::new();
        client.expect_is_authorized().returning(|| Ok(true));
        client.expect_get_me().returning(|| {
            Ok(Account {
                id: 42,
                first_name: "Sam".to_string(),
            })
        });
        // The listener may or may not poll before the logout aborts it
        client
            .expect_next_message()
            .returning(|| Err(TelegramError::other("connection closed")));
        client.expect_disconnect().times(1).returning(|| ());
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(client));

        let events = run_bot(
            connector,
            vec![
                BackendCommand::Advance(create_form()),
                BackendCommand::Logout,
            ],
        )
        .await;

        assert_eq!(events.last(), Some(&UiEvent::Closed));
        assert!(events.contains(&UiEvent::Log("Logged in as Sam".to_string())));
        assert!(events.contains(&UiEvent::Log(
            "Bot Active. Reply '.saveit' to a media to save it".to_string()
        )));
        assert_eq!(snapshots(&events)[1].state, LoginState::Authenticated);
    }

    #[tokio::test]
    async fn test_commands_after_logout_are_ignored() {
        let events = run_bot(
            MockConnector::new(),
            vec![
                BackendCommand::Logout,
                BackendCommand::Advance(create_form()),
            ],
        )
        .await;

        assert_eq!(
            events,
            vec![UiEvent::Login(LoginSnapshot::default()), UiEvent::Closed]
        );
    }
}
