use crate::error::AppError;
use crate::models::history_types::{NewAnalysis, RemoteRecord};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};

/// Server-side window for the live history query.
pub const REMOTE_HISTORY_LIMIT: usize = 10;

/// Connection bundle for the realtime history store. The component is
/// enabled only when the full bundle is present; a partial bundle reads
/// as "not configured", never as an error.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub api_key: String,
    /// Anonymous sign-in endpoint. Absent selects the no-auth variant
    /// with a single shared namespace.
    pub auth_url: Option<String>,
}

impl StoreConfig {
    pub fn from_env() -> Option<Self> {
        let database_url = non_empty_env("PLANT_VISION_STORE_URL")?;
        let api_key = non_empty_env("PLANT_VISION_STORE_KEY")?;
        let auth_url = non_empty_env("PLANT_VISION_STORE_AUTH_URL");
        Some(Self {
            database_url,
            api_key,
            auth_url,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Remote history store boundary: append-only writes with server-assigned
/// keys, whole-namespace removal, and a live full-snapshot subscription.
/// Injected into `RemoteHistorySync` so tests can substitute a fake.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Resolves once the store is usable. `false` means it never will be
    /// (authentication failed) and callers should stay silent.
    async fn ready(&self) -> bool;

    /// Append one analysis, returning the server-assigned key.
    async fn append(&self, record: &NewAnalysis) -> Result<String, AppError>;

    /// Remove every entry in the namespace.
    async fn clear_all(&self) -> Result<(), AppError>;

    /// Open a live listener over the last `limit` entries. Every remote
    /// change delivers the complete current sequence, sorted by timestamp
    /// descending. The stream ends when the transport does; dropping the
    /// receiver tears the listener down.
    async fn watch(
        &self,
        limit: usize,
    ) -> Result<mpsc::UnboundedReceiver<Vec<RemoteRecord>>, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
struct Session {
    uid: String,
    token: String,
}

#[derive(Debug, Clone, PartialEq)]
enum AuthState {
    Pending,
    /// `None` is the no-auth variant: one shared namespace.
    Ready(Option<Session>),
    Failed,
}

/// REST client for a Firebase-RTDB-wire-compatible realtime store.
///
/// The anonymous session is established once in the background at
/// construction; data operations await its settlement before touching
/// the network.
pub struct RestStoreClient {
    http: reqwest::Client,
    database_url: String,
    auth: watch::Receiver<AuthState>,
}

impl RestStoreClient {
    /// Must be called within a tokio runtime: the sign-in task is spawned
    /// immediately.
    pub fn connect(config: StoreConfig) -> Self {
        let http = reqwest::Client::new();
        let database_url = config.database_url.trim_end_matches('/').to_string();

        let auth = match config.auth_url {
            None => watch::channel(AuthState::Ready(None)).1,
            Some(auth_url) => {
                let (tx, rx) = watch::channel(AuthState::Pending);
                let client = http.clone();
                let api_key = config.api_key;
                tokio::spawn(async move {
                    let state = match sign_in_anonymously(&client, &auth_url, &api_key).await {
                        Ok(session) => AuthState::Ready(Some(session)),
                        Err(e) => {
                            tracing::warn!("anonymous sign-in failed: {}", e);
                            AuthState::Failed
                        }
                    };
                    let _ = tx.send(state);
                });
                rx
            }
        };

        Self {
            http,
            database_url,
            auth,
        }
    }

    /// Wait for auth settlement. `None` means the store is unusable.
    async fn session(&self) -> Option<Option<Session>> {
        let mut auth = self.auth.clone();
        loop {
            let state = auth.borrow().clone();
            match state {
                AuthState::Pending => {
                    if auth.changed().await.is_err() {
                        return None;
                    }
                }
                AuthState::Ready(session) => return Some(session),
                AuthState::Failed => return None,
            }
        }
    }

    async fn usable_session(&self) -> Result<Option<Session>, AppError> {
        self.session().await.ok_or_else(|| {
            AppError::RemoteSyncFailure("remote store authentication failed".to_string())
        })
    }

    fn namespace_url(&self, session: &Option<Session>) -> String {
        match session {
            Some(s) => format!("{}/users/{}/analyses.json", self.database_url, s.uid),
            None => format!("{}/analyses.json", self.database_url),
        }
    }

    fn with_auth(
        &self,
        request: reqwest::RequestBuilder,
        session: &Option<Session>,
    ) -> reqwest::RequestBuilder {
        match session {
            Some(s) => request.query(&[("auth", s.token.as_str())]),
            None => request,
        }
    }
}

#[async_trait]
impl HistoryStore for RestStoreClient {
    async fn ready(&self) -> bool {
        self.session().await.is_some()
    }

    async fn append(&self, record: &NewAnalysis) -> Result<String, AppError> {
        let session = self.usable_session().await?;
        let request = self
            .with_auth(self.http.post(self.namespace_url(&session)), &session)
            .json(record);

        let response = request
            .send()
            .await
            .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::RemoteSyncFailure(format!(
                "store write rejected: HTTP {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct PushResponse {
            name: String,
        }
        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
        Ok(body.name)
    }

    async fn clear_all(&self) -> Result<(), AppError> {
        let session = self.usable_session().await?;
        let response = self
            .with_auth(self.http.delete(self.namespace_url(&session)), &session)
            .send()
            .await
            .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::RemoteSyncFailure(format!(
                "store clear rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn watch(
        &self,
        limit: usize,
    ) -> Result<mpsc::UnboundedReceiver<Vec<RemoteRecord>>, AppError> {
        let session = self.usable_session().await?;
        let request = self
            .with_auth(self.http.get(self.namespace_url(&session)), &session)
            .query(&[("orderBy", "\"timestamp\"")])
            .query(&[("limitToLast", limit)])
            .header("Accept", "text/event-stream");

        let mut events = EventSource::new(request)
            .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut records: BTreeMap<String, Value> = BTreeMap::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => match message.event.as_str() {
                        "put" | "patch" => {
                            let payload: StreamPayload =
                                match serde_json::from_str(&message.data) {
                                    Ok(p) => p,
                                    Err(e) => {
                                        tracing::warn!("unreadable stream payload: {}", e);
                                        continue;
                                    }
                                };
                            if message.event == "put" {
                                apply_put(&mut records, &payload.path, payload.data);
                            } else {
                                apply_patch(&mut records, &payload.path, payload.data);
                            }
                            if tx.send(snapshot(&records)).is_err() {
                                events.close();
                                break;
                            }
                        }
                        "keep-alive" => {}
                        "cancel" | "auth_revoked" => {
                            tracing::warn!("history stream cancelled by server");
                            events.close();
                            break;
                        }
                        _ => {}
                    },
                    Err(e) => {
                        tracing::warn!("history stream ended: {}", e);
                        events.close();
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    #[serde(rename = "idToken")]
    id_token: String,
    #[serde(rename = "localId")]
    local_id: String,
}

async fn sign_in_anonymously(
    http: &reqwest::Client,
    auth_url: &str,
    api_key: &str,
) -> Result<Session, AppError> {
    let response = http
        .post(auth_url)
        .query(&[("key", api_key)])
        .json(&serde_json::json!({ "returnSecureToken": true }))
        .send()
        .await
        .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AppError::RemoteSyncFailure(format!(
            "sign-in rejected: HTTP {}",
            response.status()
        )));
    }
    let body: SignInResponse = response
        .json()
        .await
        .map_err(|e| AppError::RemoteSyncFailure(e.to_string()))?;
    Ok(Session {
        uid: body.local_id,
        token: body.id_token,
    })
}

/// First segment of a stream path; `None` for the namespace root.
fn child_key(path: &str) -> Option<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        trimmed.split('/').next()
    }
}

fn apply_put(records: &mut BTreeMap<String, Value>, path: &str, data: Value) {
    match child_key(path) {
        // Root put replaces the whole window; null clears it.
        None => {
            records.clear();
            if let Value::Object(map) = data {
                records.extend(map);
            }
        }
        Some(key) => {
            // A null child put is the server evicting an entry that fell
            // out of the query window.
            if data.is_null() {
                records.remove(key);
            } else if path.trim_matches('/').contains('/') {
                tracing::debug!("ignoring deep put at {}", path);
            } else {
                records.insert(key.to_string(), data);
            }
        }
    }
}

fn apply_patch(records: &mut BTreeMap<String, Value>, path: &str, data: Value) {
    match child_key(path) {
        None => {
            if let Value::Object(map) = data {
                for (key, value) in map {
                    if value.is_null() {
                        records.remove(&key);
                    } else {
                        records.insert(key, value);
                    }
                }
            }
        }
        Some(key) => {
            if path.trim_matches('/').contains('/') {
                tracing::debug!("ignoring deep patch at {}", path);
                return;
            }
            match (records.get_mut(key), data) {
                (Some(Value::Object(existing)), Value::Object(map)) => {
                    existing.extend(map);
                }
                (_, Value::Null) => {}
                (_, data) => {
                    records.insert(key.to_string(), data);
                }
            }
        }
    }
}

/// Materialize the current window, newest first. Records that do not
/// parse are skipped rather than poisoning the snapshot.
fn snapshot(records: &BTreeMap<String, Value>) -> Vec<RemoteRecord> {
    let mut entries: Vec<RemoteRecord> = records
        .iter()
        .filter_map(|(id, value)| {
            match serde_json::from_value::<RemoteRecord>(value.clone()) {
                Ok(mut record) => {
                    record.id = id.clone();
                    Some(record)
                }
                Err(e) => {
                    tracing::debug!("skipping malformed history record {}: {}", id, e);
                    None
                }
            }
        })
        .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(timestamp: i64) -> Value {
        json!({
            "prediction": {
                "class_name": "Tomato — Late Blight",
                "plant": "Tomato",
                "condition": "Late Blight",
                "confidence": 87.3,
                "is_healthy": false
            },
            "alternatives": [],
            "imageSnippet": null,
            "timestamp": timestamp
        })
    }

    #[test]
    fn root_put_replaces_the_window() {
        let mut records = BTreeMap::new();
        records.insert("stale".to_string(), record(1));

        apply_put(
            &mut records,
            "/",
            json!({ "a": record(10), "b": record(20) }),
        );
        assert_eq!(records.len(), 2);
        assert!(!records.contains_key("stale"));
    }

    #[test]
    fn null_root_put_clears_the_window() {
        let mut records = BTreeMap::new();
        records.insert("a".to_string(), record(1));
        apply_put(&mut records, "/", Value::Null);
        assert!(records.is_empty());
    }

    #[test]
    fn child_put_inserts_and_null_evicts() {
        let mut records = BTreeMap::new();
        apply_put(&mut records, "/a", record(10));
        apply_put(&mut records, "/b", record(20));
        assert_eq!(records.len(), 2);

        apply_put(&mut records, "/a", Value::Null);
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("b"));
    }

    #[test]
    fn patch_merges_fields_into_existing_record() {
        let mut records = BTreeMap::new();
        apply_put(&mut records, "/a", record(10));
        apply_patch(&mut records, "/a", json!({ "timestamp": 99 }));
        assert_eq!(records["a"]["timestamp"], json!(99));
        assert!(records["a"]["prediction"].is_object());
    }

    #[test]
    fn snapshot_sorts_by_timestamp_descending() {
        let mut records = BTreeMap::new();
        apply_put(&mut records, "/a", record(10));
        apply_put(&mut records, "/b", record(30));
        apply_put(&mut records, "/c", record(20));

        let entries = snapshot(&records);
        let order: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
        assert_eq!(order, vec![30, 20, 10]);
        assert_eq!(entries[0].id, "b");
    }

    #[test]
    fn snapshot_skips_malformed_records() {
        let mut records = BTreeMap::new();
        apply_put(&mut records, "/good", record(10));
        apply_put(&mut records, "/bad", json!("just a string"));

        let entries = snapshot(&records);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "good");
    }

    #[test]
    fn config_requires_full_bundle() {
        std::env::remove_var("PLANT_VISION_STORE_URL");
        std::env::remove_var("PLANT_VISION_STORE_KEY");
        assert!(StoreConfig::from_env().is_none());
    }
}
