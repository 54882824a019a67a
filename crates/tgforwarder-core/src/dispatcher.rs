use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchEngine, panic_message};
use crate::transport::InboundEvent;

#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Events handled concurrently.
    pub max_in_flight: usize,
    /// How long after shutdown in-flight and buffered events may keep running
    /// before they are cancelled.
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Feed events from `events` into the engine until shutdown or the sender goes away.
///
/// On shutdown the channel is closed and the drain deadline starts. Events
/// already buffered are still dispatched if capacity frees up before the
/// deadline. Once it passes, in-flight work is cancelled and every remaining
/// event is dispatched with a cancelled token, so its matching rules are logged
/// as failed rather than dropped.
pub async fn run_dispatcher(
    engine: DispatchEngine,
    mut events: mpsc::Receiver<InboundEvent>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let abort = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut pending = Vec::new();

    info!(max_in_flight = config.max_in_flight, "dispatcher started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            maybe_event = events.recv() => match maybe_event {
                Some(event) => event,
                None => {
                    info!("event channel closed");
                    break;
                }
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                pending.push(event);
                break;
            }
            permit = permits.clone().acquire_owned() => permit.ok(),
        };

        spawn_event(&mut tasks, permit, &engine, &abort, event);
        while tasks.try_join_next().is_some() {}
    }

    let deadline = Instant::now() + config.drain_timeout;
    events.close();
    while let Ok(event) = events.try_recv() {
        pending.push(event);
    }

    info!(
        in_flight = tasks.len(),
        buffered = pending.len(),
        "dispatcher draining"
    );

    for event in pending {
        let permit = if abort.is_cancelled() {
            None
        } else {
            match timeout_at(deadline, permits.clone().acquire_owned()).await {
                Ok(permit) => permit.ok(),
                Err(_) => {
                    warn!(
                        in_flight = tasks.len(),
                        "drain timeout elapsed with events still buffered; cancelling"
                    );
                    abort.cancel();
                    None
                }
            }
        };
        spawn_event(&mut tasks, permit, &engine, &abort, event);
    }

    let drained = timeout_at(deadline, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = tasks.len(),
            "drain timeout elapsed; cancelling in-flight dispatches"
        );
        abort.cancel();
        while tasks.join_next().await.is_some() {}
    }

    info!("dispatcher stopped");
}

/// `permit` is `None` only once the dispatcher is cancelling, when the task
/// just records cancellations and must not wait for capacity.
fn spawn_event(
    tasks: &mut JoinSet<()>,
    permit: Option<OwnedSemaphorePermit>,
    engine: &DispatchEngine,
    abort: &CancellationToken,
    event: InboundEvent,
) {
    let engine = engine.clone();
    let abort = abort.clone();
    tasks.spawn(async move {
        handle_event(engine, event, abort).await;
        drop(permit);
    });
}

async fn handle_event(engine: DispatchEngine, event: InboundEvent, abort: CancellationToken) {
    let result = AssertUnwindSafe(engine.handle_until(&event, &abort))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(report)) => {
            debug!(
                source_id = %event.source_id,
                message_id = event.message_id,
                candidates = report.candidates,
                delivered = report.delivered(),
                failed = report.failed(),
                "event handled"
            );
        }
        Ok(Err(err)) => {
            error!(source_id = %event.source_id, message_id = event.message_id, error = %err, "event not dispatched");
        }
        Err(panic) => {
            let err_msg = panic_message(panic.as_ref());
            error!(source_id = %event.source_id, message_id = event.message_id, "dispatch panicked: {err_msg}");
        }
    }
}
