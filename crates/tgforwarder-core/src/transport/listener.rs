use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::InboundEvent;
use super::telegram::{TelegramBotClient, Update};

#[derive(Clone, Copy, Debug)]
pub struct ListenerConfig {
    /// Server-side long-poll wait passed to getUpdates.
    pub poll_timeout_secs: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Long-poll the Bot API and push every message or channel post into `events`.
/// Returns when `shutdown` fires or the receiving side is dropped.
pub async fn run_update_listener(
    client: TelegramBotClient,
    events: mpsc::Sender<InboundEvent>,
    config: ListenerConfig,
    shutdown: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    let mut backoff = config.initial_backoff;

    info!(poll_timeout_secs = config.poll_timeout_secs, "starting telegram update listener");

    while !shutdown.is_cancelled() {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = client.get_updates(offset, config.poll_timeout_secs) => result,
        };

        let updates = match result {
            Ok(updates) => {
                backoff = config.initial_backoff;
                updates
            }
            Err(err) => {
                warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "getUpdates failed; backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(backoff) => {},
                }
                backoff = (backoff * 2).min(config.max_backoff);
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(event) = update_to_event(update) else {
                continue;
            };

            debug!(source_id = %event.source_id, message_id = event.message_id, "received message");
            if events.send(event).await.is_err() {
                info!("event receiver dropped; stopping update listener");
                return;
            }
        }
    }

    info!("telegram update listener stopped");
}

fn update_to_event(update: Update) -> Option<InboundEvent> {
    let update_id = update.update_id;
    let Some(message) = update.into_message() else {
        debug!(update_id, "ignoring update without a message");
        return None;
    };

    let text = message.text.or(message.caption);
    Some(InboundEvent::new(
        message.chat.id.to_string(),
        message.message_id,
        text,
    ))
}
