use chrono::Local;
use hos_core::wire::TerminalFrame;
use hos_storage::{HealthStore, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

pub mod commands;

pub const HISTORY_CAP: usize = 100;
pub const BACKLOG_LIMIT: usize = 1000;
pub const BACKLOG_KEEP: usize = 500;
pub const WELCOME_TEXT: &str = "Connected to HealthOS Terminal (WebSocket)";

const OBSERVER_QUEUE: usize = 256;

pub type ObserverId = u64;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// One session per terminal id. The session is the single writer for its
// history and owns the sockets watching it, like the job coordinator
// owns the job registry.
pub struct TerminalSession {
    id: String,
    store: Arc<HealthStore>,
    history: RwLock<Vec<String>>,
    conn_counter: AtomicU64,
    observers: RwLock<HashMap<ObserverId, mpsc::Sender<String>>>,
}

impl TerminalSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    // Appends the line, checkpoints the capped history, broadcasts the
    // acknowledgment, and returns the dispatch output. The line only
    // lands in memory once the checkpoint write has succeeded.
    pub async fn execute(&self, line: &str) -> Result<String, TerminalError> {
        {
            let mut history = self.history.write().await;
            let mut next = history.clone();
            next.push(line.to_string());
            if next.len() > HISTORY_CAP {
                let excess = next.len() - HISTORY_CAP;
                next.drain(..excess);
            }
            self.store.save_terminal_history(&self.id, &next)?;
            *history = next;
        }

        let output = commands::dispatch(line);
        let ack = format!("[{}] Executed: {line}", Local::now().format("%H:%M:%S"));
        self.broadcast(&TerminalFrame::output(ack)).await;

        info!(event = "terminal_command", session_id = %self.id, command = line);
        Ok(output)
    }

    pub async fn history(&self) -> Vec<String> {
        self.history.read().await.clone()
    }

    pub async fn clear(&self) -> Result<(), TerminalError> {
        self.store.clear_terminal_history(&self.id)?;
        self.history.write().await.clear();
        info!(event = "terminal_cleared", session_id = %self.id);
        Ok(())
    }

    // Stored transcripts larger than the backlog limit are cut down to
    // the most recent entries. Normal execution never grows past the
    // history cap; this covers histories seeded from older deployments.
    pub async fn trim_backlog(&self) -> Result<usize, TerminalError> {
        let stored = self.store.load_terminal_history(&self.id)?;
        if stored.len() <= BACKLOG_LIMIT {
            return Ok(0);
        }

        let dropped = stored.len() - BACKLOG_KEEP;
        let trimmed = stored[dropped..].to_vec();
        self.store.save_terminal_history(&self.id, &trimmed)?;
        *self.history.write().await = trimmed;
        info!(event = "terminal_backlog_trimmed", session_id = %self.id, dropped);
        Ok(dropped)
    }

    // The welcome frame is queued under the write lock so no broadcast
    // can land ahead of it.
    pub async fn observe(&self) -> (ObserverId, mpsc::Receiver<String>) {
        let mut observers = self.observers.write().await;
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE);

        match serde_json::to_string(&TerminalFrame::welcome(WELCOME_TEXT)) {
            // A fresh channel always has room for the welcome frame.
            Ok(raw) => {
                let _ = tx.try_send(raw);
            }
            Err(err) => error!(event = "encode_error", error = %err),
        }

        observers.insert(id, tx);
        info!(
            event = "terminal_observer_connected",
            session_id = %self.id,
            observer_id = id,
            observers = observers.len()
        );
        (id, rx)
    }

    pub async fn remove_observer(&self, id: ObserverId) {
        if self.observers.write().await.remove(&id).is_some() {
            info!(
                event = "terminal_observer_disconnected",
                session_id = %self.id,
                observer_id = id
            );
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    // Delivery is best effort: an observer whose queue is full or gone
    // is dropped rather than waited on, so a stalled socket never holds
    // up `execute`.
    pub async fn broadcast(&self, frame: &TerminalFrame) {
        let raw = match serde_json::to_string(frame) {
            Ok(raw) => raw,
            Err(err) => {
                error!(event = "encode_error", error = %err);
                return;
            }
        };

        let targets: Vec<(ObserverId, mpsc::Sender<String>)> = {
            let observers = self.observers.read().await;
            observers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        for (id, tx) in targets {
            if tx.try_send(raw.clone()).is_err() {
                warn!(
                    event = "terminal_observer_send_error",
                    session_id = %self.id,
                    observer_id = id
                );
                self.remove_observer(id).await;
            }
        }
    }
}

pub struct TerminalRegistry {
    store: Arc<HealthStore>,
    sessions: RwLock<HashMap<String, Arc<TerminalSession>>>,
}

impl TerminalRegistry {
    pub fn new(store: Arc<HealthStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    // Get-or-create. First touch loads the stored transcript.
    pub async fn session(&self, session_id: &str) -> Result<Arc<TerminalSession>, TerminalError> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write().await;
        // A second lookup covers the race between two first touches.
        if let Some(session) = sessions.get(session_id) {
            return Ok(session.clone());
        }

        let history = self.store.load_terminal_history(session_id)?;
        info!(
            event = "terminal_session_opened",
            session_id,
            history = history.len()
        );
        let session = Arc::new(TerminalSession {
            id: session_id.to_string(),
            store: self.store.clone(),
            history: RwLock::new(history),
            conn_counter: AtomicU64::new(0),
            observers: RwLock::new(HashMap::new()),
        });
        sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn sweep_backlogs(&self) -> usize {
        let sessions: Vec<Arc<TerminalSession>> =
            self.sessions.read().await.values().cloned().collect();

        let mut dropped = 0;
        for session in sessions {
            match session.trim_backlog().await {
                Ok(count) => dropped += count,
                Err(err) => warn!(
                    event = "terminal_sweep_error",
                    session_id = %session.id,
                    error = %err
                ),
            }
        }
        dropped
    }

    pub fn start_backlog_sweep(self: Arc<Self>, every: Duration) {
        if every.is_zero() {
            return;
        }
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                registry.sweep_backlogs().await;
            }
        });
    }
}
