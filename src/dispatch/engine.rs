use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::notifier;
use crate::models::order::OrderStatus;
use crate::state::AppState;

/// Background loop draining the dispatch queue. Orders are re-read at
/// dequeue time; anything no longer Pending (accepted, assigned or cancelled
/// while queued) is skipped.
pub async fn run_dispatch_engine(state: Arc<AppState>, mut order_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch engine started");

    while let Some(order_id) = order_rx.recv().await {
        let Some(order) = state.store.get_order(order_id) else {
            warn!(order_id = %order_id, "queued order vanished from store");
            continue;
        };

        if order.status != OrderStatus::Pending {
            info!(order_id = %order_id, status = ?order.status, "skipping dispatch for settled order");
            continue;
        }

        let start = Instant::now();
        let outcome = notifier::notify_order(&state, &order);
        let elapsed = start.elapsed().as_secs_f64();

        let label = if outcome.offered_count > 0 {
            "offered"
        } else {
            "empty"
        };
        state
            .metrics
            .dispatch_rounds_total
            .with_label_values(&[label])
            .inc();
        state
            .metrics
            .dispatch_latency_seconds
            .with_label_values(&[label])
            .observe(elapsed);
    }

    warn!("dispatch engine stopped: queue channel closed");
}

/// Hand an order to the engine. Never surfaces an error to the caller:
/// order persistence has already happened, and a dead queue only means this
/// round is lost until someone calls the retry endpoint.
pub async fn enqueue_dispatch(state: &AppState, order_id: Uuid) {
    if let Err(err) = state.dispatch_tx.send(order_id).await {
        warn!(order_id = %order_id, error = %err,
            "dispatch queue unavailable; order stays pending until retried");
    }
}
