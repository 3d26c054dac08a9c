use hos_core::wire::JobFeedFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

pub type SubscriberId = u64;

const SUBSCRIBER_QUEUE: usize = 256;

// Fan-out registry for live job observers. Each observer owns the
// receiving half of a bounded channel; a writer task on the socket
// side drains it.
pub struct JobFeed {
    conn_counter: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<String>>>,
}

impl JobFeed {
    pub fn new() -> Self {
        Self {
            conn_counter: AtomicU64::new(0),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    // Registering and queueing the snapshot happen under the write
    // lock, so no broadcast can slot in between them.
    pub async fn register(&self, snapshot: &JobFeedFrame) -> (SubscriberId, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let mut subscribers = self.subscribers.write().await;
        match serde_json::to_string(snapshot) {
            // A fresh channel always has room for the snapshot frame.
            Ok(raw) => {
                let _ = sender.try_send(raw);
            }
            Err(err) => error!(event = "encode_error", error = %err),
        }
        subscribers.insert(id, sender);
        info!(
            event = "observer_connected",
            observer_id = id,
            observers = subscribers.len()
        );
        (id, receiver)
    }

    pub async fn remove(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(&id).is_some() {
            info!(
                event = "observer_disconnected",
                observer_id = id,
                observers = subscribers.len()
            );
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    // Delivery is best effort: an observer whose queue is full or gone
    // is dropped rather than waited on.
    pub async fn broadcast(&self, frame: &JobFeedFrame) {
        let raw = match serde_json::to_string(frame) {
            Ok(raw) => raw,
            Err(err) => {
                error!(event = "encode_error", error = %err);
                return;
            }
        };

        let targets: Vec<(SubscriberId, mpsc::Sender<String>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        for (id, sender) in targets {
            if sender.try_send(raw.clone()).is_err() {
                warn!(event = "observer_send_error", observer_id = id);
                self.remove(id).await;
            }
        }
    }
}
