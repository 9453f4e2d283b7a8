use crate::models::history_types::{HistoryEntry, LocalEntry, RawEntry, RemoteRecord};
use crate::services::history_cache::LocalHistoryCache;
use crate::services::remote_sync::{RemoteHistorySync, Subscription};
use std::sync::{Arc, RwLock};

/// Map a raw history entry of either origin to the canonical form.
/// Returns `None` when no prediction is resolvable (rejections, errors,
/// malformed remote data); such entries are never displayed.
pub fn normalize(entry: &RawEntry) -> Option<HistoryEntry> {
    match entry {
        RawEntry::Local(local) => normalize_local(local),
        RawEntry::Remote(remote) => normalize_remote(remote),
    }
}

fn normalize_local(entry: &LocalEntry) -> Option<HistoryEntry> {
    if !entry.result.success {
        return None;
    }
    let prediction = entry.result.prediction.as_ref()?;
    Some(HistoryEntry {
        id: entry.id.clone(),
        thumbnail: entry.preview.clone(),
        plant: prediction.plant.clone(),
        condition: prediction.condition.clone(),
        confidence: prediction.confidence,
        is_healthy: prediction.is_healthy,
        timestamp: entry.timestamp,
        alternatives: entry.result.alternatives.clone(),
    })
}

fn normalize_remote(entry: &RemoteRecord) -> Option<HistoryEntry> {
    let prediction = entry.prediction.as_ref()?;
    Some(HistoryEntry {
        id: entry.id.clone(),
        thumbnail: entry.image_snippet.clone(),
        plant: prediction.plant.clone(),
        condition: prediction.condition.clone(),
        confidence: prediction.confidence,
        is_healthy: prediction.is_healthy,
        timestamp: entry.timestamp,
        alternatives: entry.alternatives.clone(),
    })
}

/// Merge the two history sources into one display list. The remote store
/// is authoritative whenever sync is enabled; the local cache only drives
/// the view in local-only sessions. Both inputs are already newest-first.
pub fn merge(
    remote_enabled: bool,
    remote: &[RemoteRecord],
    local: &[LocalEntry],
) -> Vec<HistoryEntry> {
    if remote_enabled {
        remote.iter().filter_map(normalize_remote).collect()
    } else {
        local.iter().filter_map(normalize_local).collect()
    }
}

/// Unified, time-ordered history for the presentation layer.
///
/// The subscription consumer task is the sole writer of the remote
/// snapshot; everything else only reads it.
pub struct HistoryView {
    local: LocalHistoryCache,
    sync: RemoteHistorySync,
    remote: Arc<RwLock<Vec<RemoteRecord>>>,
    subscription: Subscription,
}

impl HistoryView {
    pub fn connect(local: LocalHistoryCache, sync: RemoteHistorySync) -> Self {
        let remote = Arc::new(RwLock::new(Vec::new()));
        let (mut stream, subscription) = sync.subscribe();

        let writer = remote.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = stream.next().await {
                *writer.write().unwrap() = snapshot;
            }
        });

        Self {
            local,
            sync,
            remote,
            subscription,
        }
    }

    /// Current canonical history, newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let remote = self.remote.read().unwrap();
        merge(self.sync.enabled(), &remote, &self.local.entries())
    }

    /// Clear both the session cache and, when enabled, the remote
    /// namespace.
    pub fn clear(&self) {
        self.local.clear();
        self.sync.clear();
    }

    /// Tear down the live listener. Consumes the view, so the
    /// subscription is released exactly once.
    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}
