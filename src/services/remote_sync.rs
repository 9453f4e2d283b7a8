use crate::models::history_types::{now_millis, NewAnalysis, RemoteRecord};
use crate::models::predict_types::{Alternative, Prediction};
use crate::services::remote_store::{
    HistoryStore, RestStoreClient, StoreConfig, REMOTE_HISTORY_LIMIT,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Live sequence of remote history snapshots, newest first. Ends when the
/// subscription is torn down or the transport fails.
pub struct SnapshotStream {
    rx: mpsc::UnboundedReceiver<Vec<RemoteRecord>>,
}

impl SnapshotStream {
    pub async fn next(&mut self) -> Option<Vec<RemoteRecord>> {
        self.rx.recv().await
    }
}

/// Handle for one live subscription. Consuming it is the one true
/// cancellation; dropping it also stops delivery so a handle cannot leak
/// its listener.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { task: None }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

enum SyncState {
    Disabled,
    Enabled { store: Arc<dyn HistoryStore> },
}

/// Mirror of the analysis history in a remote realtime store.
///
/// The variant is selected once at construction: without a complete store
/// configuration every operation is a safe no-op, so call sites never
/// branch on enablement themselves. Writes are fire-and-forget; failures
/// are logged and the system degrades to local-only history.
#[derive(Clone)]
pub struct RemoteHistorySync {
    state: Arc<SyncState>,
}

impl RemoteHistorySync {
    pub fn disabled() -> Self {
        Self {
            state: Arc::new(SyncState::Disabled),
        }
    }

    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            state: Arc::new(SyncState::Enabled { store }),
        }
    }

    /// Capability detection from the environment. Must be called within a
    /// tokio runtime when the store is configured.
    pub fn from_env() -> Self {
        match StoreConfig::from_env() {
            Some(config) => Self::new(Arc::new(RestStoreClient::connect(config))),
            None => {
                tracing::debug!("remote history store not configured; history stays local");
                Self::disabled()
            }
        }
    }

    pub fn enabled(&self) -> bool {
        matches!(*self.state, SyncState::Enabled { .. })
    }

    /// Open the live history listener. Disabled: the stream ends
    /// immediately and the handle is inert. Enabled: snapshots are
    /// forwarded only after the store's auth-readiness signal fires.
    pub fn subscribe(&self) -> (SnapshotStream, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = SnapshotStream { rx };

        let store = match &*self.state {
            SyncState::Disabled => return (stream, Subscription::inert()),
            SyncState::Enabled { store } => store.clone(),
        };

        let task = tokio::spawn(async move {
            if !store.ready().await {
                tracing::warn!("remote history unavailable: store authentication failed");
                return;
            }
            let mut updates = match store.watch(REMOTE_HISTORY_LIMIT).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("remote history subscription failed: {}", e);
                    return;
                }
            };
            while let Some(records) = updates.recv().await {
                if tx.send(records).is_err() {
                    break;
                }
            }
        });

        (stream, Subscription { task: Some(task) })
    }

    /// Append one analysis, stamped with the current time. Fire-and-forget.
    pub fn push(
        &self,
        prediction: Prediction,
        alternatives: Vec<Alternative>,
        image_snippet: Option<String>,
    ) {
        let store = match &*self.state {
            SyncState::Disabled => return,
            SyncState::Enabled { store } => store.clone(),
        };
        tokio::spawn(async move {
            if !store.ready().await {
                return;
            }
            let record = NewAnalysis {
                prediction,
                alternatives,
                image_snippet,
                timestamp: now_millis(),
            };
            if let Err(e) = store.append(&record).await {
                tracing::warn!("failed to sync analysis to remote history: {}", e);
            }
        });
    }

    /// Remove every entry in the namespace. Fire-and-forget.
    pub fn clear(&self) {
        let store = match &*self.state {
            SyncState::Disabled => return,
            SyncState::Enabled { store } => store.clone(),
        };
        tokio::spawn(async move {
            if !store.ready().await {
                return;
            }
            if let Err(e) = store.clear_all().await {
                tracing::warn!("failed to clear remote history: {}", e);
            }
        });
    }
}
