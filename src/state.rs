use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::observability::metrics::Metrics;
use crate::push::PushChannel;
use crate::registry::ConnectionRegistry;
use crate::store::DurableStore;

pub struct AppState {
    pub store: DurableStore,
    pub registry: ConnectionRegistry,
    pub push: Arc<dyn PushChannel>,
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        push: Arc<dyn PushChannel>,
        dispatch_queue_size: usize,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_queue_size);

        (
            Self {
                store: DurableStore::new(),
                registry: ConnectionRegistry::new(),
                push,
                dispatch_tx,
                metrics: Metrics::new(),
            },
            dispatch_rx,
        )
    }
}
