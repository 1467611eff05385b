//! Message listener feeding the media saver.

use std::sync::Arc;

use log::{error, info, trace};
use tokio::task::JoinSet;

use crate::{
    saver::{MediaSaver, SaveOutcome},
    telegram::{TelegramApi, TelegramError},
};

/// Pulls new messages and hands trigger messages to the saver.
///
/// Each trigger is handled in its own local task, so a handler waiting to delete its
/// status message does not delay the next trigger. Must run inside a
/// [`tokio::task::LocalSet`].
///
/// Returns the error that stopped the client from delivering messages, once every
/// pending handler has finished.
///
/// # Arguments
///
/// * `saver` - The saver registered by the login flow
/// * `on_outcome` - Callback invoked with the outcome of every handled trigger
pub async fn listen<T, F>(saver: Arc<MediaSaver<T>>, on_outcome: F) -> Result<(), TelegramError>
where
    T: TelegramApi + 'static,
    F: Fn(SaveOutcome) + Clone + 'static,
{
    info!(
        "listening for '{}' from account {}",
        saver.settings().trigger,
        saver.owner_id()
    );
    let mut handlers = JoinSet::new();

    let error = loop {
        let message = match saver.client().next_message().await {
            Ok(message) => message,
            Err(e) => break e,
        };

        // Forget handlers that are done
        while handlers.try_join_next().is_some() {}

        if !saver.matches(&message.text) {
            trace!("skip message {} in chat {}", message.id, message.chat_id);
            continue;
        }

        info!("trigger {} received in chat {}", message.id, message.chat_id);
        let saver = Arc::clone(&saver);
        let on_outcome = on_outcome.clone();
        handlers.spawn_local(async move {
            let outcome = saver.handle(&message).await;
            on_outcome(outcome);
        });
    };

    error!("stopped listening for messages: {}", error);
    while handlers.join_next().await.is_some() {}

    Err(error)
}
