//! Background redrive scan, spec.md §4.G step 11: periodically picks
//! up deliveries whose `nextRetryAt` has passed and retries them.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use fleetwatch_common::Clock;
use fleetwatch_storage::Storage;

use crate::dispatcher::WebhookDispatcher;

/// Run the redrive scan forever at `interval`, stopping when
/// `shutdown` resolves. Intended to be spawned once at startup
/// alongside the dispatcher.
pub async fn run(
    dispatcher: Arc<WebhookDispatcher>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_once(&dispatcher, &storage, clock.as_ref()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn scan_once(dispatcher: &WebhookDispatcher, storage: &Arc<dyn Storage>, clock: &dyn Clock) {
    let due = match storage.get_retriable_deliveries(clock.now()).await {
        Ok(due) => due,
        Err(err) => {
            warn!(error = %err, "failed to scan for retriable webhook deliveries");
            return;
        }
    };

    for delivery in due {
        let subscriber = match storage.get_webhook(delivery.webhook_id).await {
            Ok(Some(sub)) if sub.enabled => sub,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "failed to load subscriber for retriable delivery");
                continue;
            }
        };
        dispatcher.attempt(subscriber, delivery).await;
    }
}
