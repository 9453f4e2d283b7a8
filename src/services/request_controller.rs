use crate::models::history_types::{now_millis, LocalEntry};
use crate::models::predict_types::{ImageUpload, PredictionResult};
use crate::services::history_cache::LocalHistoryCache;
use crate::services::inference_client::Predictor;
use crate::services::remote_sync::RemoteHistorySync;
use crate::services::thumbnail_service;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub enum Phase {
    Idle,
    Loading,
    Success,
    Error,
}

/// The prediction lifecycle state machine; owns the current analysis.
///
/// Each `predict` call takes a fresh generation token. A response only
/// commits state when its token is still the latest, so overlapping calls
/// cannot interleave: the newest submission always wins and a superseded
/// response is dropped on arrival.
#[derive(Clone)]
pub struct RequestController {
    predictor: Arc<dyn Predictor>,
    history: LocalHistoryCache,
    remote: RemoteHistorySync,
    result: Arc<Mutex<Option<PredictionResult>>>,
    error: Arc<Mutex<Option<String>>>,
    loading: Arc<Mutex<bool>>,
    generation: Arc<AtomicU64>,
    last_upload: Arc<Mutex<Option<ImageUpload>>>,
}

impl RequestController {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        history: LocalHistoryCache,
        remote: RemoteHistorySync,
    ) -> Self {
        Self {
            predictor,
            history,
            remote,
            result: Arc::new(Mutex::new(None)),
            error: Arc::new(Mutex::new(None)),
            loading: Arc::new(Mutex::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            last_upload: Arc::new(Mutex::new(None)),
        }
    }

    /// Submit one image for analysis. Returns the committed result, or
    /// `None` when the call failed or was superseded by a newer one.
    ///
    /// The upload is assumed valid; `ImageUpload::new` enforces type and
    /// size at the acquisition boundary.
    pub async fn predict(&self, upload: ImageUpload) -> Option<PredictionResult> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.loading.lock().await = true;
        *self.result.lock().await = None;
        *self.error.lock().await = None;
        *self.last_upload.lock().await = Some(upload.clone());

        let outcome = self.predictor.predict(&upload).await;

        // A newer request owns the state now; this response is stale.
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }

        *self.loading.lock().await = false;
        match outcome {
            Ok(result) => {
                *self.result.lock().await = Some(result.clone());
                if result.success && result.prediction.is_some() {
                    self.record_history(&upload, &result).await;
                }
                Some(result)
            }
            Err(err) => {
                *self.error.lock().await = Some(err.to_string());
                None
            }
        }
    }

    /// Record a successful analysis in the local cache and, when enabled,
    /// the remote mirror. Never fails the surrounding state transition: a
    /// thumbnail failure degrades to no preview, a sync failure is only
    /// logged.
    async fn record_history(&self, upload: &ImageUpload, result: &PredictionResult) {
        let bytes = upload.bytes.clone();
        let thumbnail = match tokio::task::spawn_blocking(move || thumbnail_service::encode(&bytes))
            .await
        {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                tracing::warn!("thumbnail task failed: {}", e);
                None
            }
        };

        self.history.push(LocalEntry {
            id: Uuid::new_v4().to_string(),
            preview: thumbnail.clone(),
            result: result.clone(),
            timestamp: now_millis(),
        });

        if let Some(prediction) = &result.prediction {
            self.remote
                .push(prediction.clone(), result.alternatives.clone(), thumbnail);
        }
    }

    /// Clear the visible result and error. Idempotent; an in-flight
    /// request is not cancelled, its response is discarded on arrival.
    pub async fn reset(&self) {
        *self.result.lock().await = None;
        *self.error.lock().await = None;
    }

    /// Re-run the last submission. No-op when nothing was ever submitted.
    pub async fn retry(&self) -> Option<PredictionResult> {
        let upload = self.last_upload.lock().await.clone();
        match upload {
            Some(upload) => self.predict(upload).await,
            None => None,
        }
    }

    pub async fn result(&self) -> Option<PredictionResult> {
        self.result.lock().await.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.error.lock().await.clone()
    }

    pub async fn is_loading(&self) -> bool {
        *self.loading.lock().await
    }

    pub async fn phase(&self) -> Phase {
        if *self.loading.lock().await {
            return Phase::Loading;
        }
        if self.error.lock().await.is_some() {
            return Phase::Error;
        }
        if self.result.lock().await.is_some() {
            return Phase::Success;
        }
        Phase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::predict_types::{Alternative, DiseaseInfo, Prediction};
    use crate::services::remote_sync::tests::FakeStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn upload(name: &str) -> ImageUpload {
        ImageUpload::new(name, "image/jpeg", vec![1, 2, 3]).unwrap()
    }

    fn tomato_result() -> PredictionResult {
        PredictionResult {
            success: true,
            prediction: Some(Prediction {
                class_name: "Tomato — Late Blight".to_string(),
                plant: "Tomato".to_string(),
                condition: "Late Blight".to_string(),
                confidence: 87.3,
                is_healthy: false,
                info: DiseaseInfo::default(),
            }),
            alternatives: vec![Alternative {
                class_name: "Tomato — Early Blight".to_string(),
                plant: "Tomato".to_string(),
                condition: "Early Blight".to_string(),
                confidence: 8.1,
                is_healthy: false,
            }],
            rejected: false,
            reason: None,
        }
    }

    fn potato_result() -> PredictionResult {
        PredictionResult {
            success: true,
            prediction: Some(Prediction {
                class_name: "Potato — healthy".to_string(),
                plant: "Potato".to_string(),
                condition: "healthy".to_string(),
                confidence: 95.0,
                is_healthy: true,
                info: DiseaseInfo::default(),
            }),
            alternatives: Vec::new(),
            rejected: false,
            reason: None,
        }
    }

    /// Replies immediately with a fixed outcome.
    struct ImmediatePredictor {
        outcome: Result<PredictionResult, AppError>,
    }

    #[async_trait]
    impl Predictor for ImmediatePredictor {
        async fn predict(&self, _upload: &ImageUpload) -> Result<PredictionResult, AppError> {
            self.outcome.clone()
        }
    }

    /// Holds each call open until the test releases it, keyed by file
    /// name. Panics on a call it was not armed for.
    struct GatedPredictor {
        gates: StdMutex<HashMap<String, oneshot::Receiver<Result<PredictionResult, AppError>>>>,
    }

    impl GatedPredictor {
        fn new() -> Self {
            Self {
                gates: StdMutex::new(HashMap::new()),
            }
        }

        fn arm(&self, name: &str) -> oneshot::Sender<Result<PredictionResult, AppError>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(name.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl Predictor for GatedPredictor {
        async fn predict(&self, upload: &ImageUpload) -> Result<PredictionResult, AppError> {
            let gate = self
                .gates
                .lock()
                .unwrap()
                .remove(&upload.file_name)
                .expect("predictor called for an unexpected upload");
            gate.await.expect("gate dropped")
        }
    }

    fn controller(predictor: Arc<dyn Predictor>) -> RequestController {
        RequestController::new(
            predictor,
            LocalHistoryCache::new(),
            RemoteHistorySync::disabled(),
        )
    }

    #[tokio::test]
    async fn success_commits_result_and_records_history() {
        let ctrl = controller(Arc::new(ImmediatePredictor {
            outcome: Ok(tomato_result()),
        }));

        let result = ctrl.predict(upload("a.jpg")).await.expect("committed");
        assert!(result.success);
        assert_eq!(ctrl.phase().await, Phase::Success);
        assert!(ctrl.error().await.is_none());

        let entries = ctrl.history.entries();
        assert_eq!(entries.len(), 1);
        let prediction = entries[0].result.prediction.as_ref().unwrap();
        assert_eq!(prediction.plant, "Tomato");
        assert_eq!(prediction.condition, "Late Blight");
        // Upload bytes are not a decodable image; the entry still lands,
        // just without a preview.
        assert!(entries[0].preview.is_none());
    }

    #[tokio::test]
    async fn stale_response_is_discarded() {
        let predictor = Arc::new(GatedPredictor::new());
        let gate_a = predictor.arm("a.jpg");
        let gate_b = predictor.arm("b.jpg");
        let ctrl = controller(predictor);

        let ctrl_a = ctrl.clone();
        let task_a = tokio::spawn(async move { ctrl_a.predict(upload("a.jpg")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ctrl.is_loading().await);

        let ctrl_b = ctrl.clone();
        let task_b = tokio::spawn(async move { ctrl_b.predict(upload("b.jpg")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // B resolves first and commits; A's late response must be dropped.
        gate_b.send(Ok(potato_result())).unwrap();
        let committed = task_b.await.unwrap().expect("B commits");
        assert_eq!(committed.prediction.as_ref().unwrap().plant, "Potato");

        gate_a.send(Ok(tomato_result())).unwrap();
        assert!(task_a.await.unwrap().is_none());

        let result = ctrl.result().await.expect("state holds B");
        assert_eq!(result.prediction.as_ref().unwrap().plant, "Potato");
        assert_eq!(ctrl.phase().await, Phase::Success);

        // Only B reached history.
        let entries = ctrl.history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].result.prediction.as_ref().unwrap().plant,
            "Potato"
        );
    }

    #[tokio::test]
    async fn error_leaves_error_state_and_no_history() {
        let ctrl = controller(Arc::new(ImmediatePredictor {
            outcome: Err(AppError::ServerError {
                status: 500,
                message: "Model not loaded.".to_string(),
            }),
        }));

        assert!(ctrl.predict(upload("a.jpg")).await.is_none());
        assert_eq!(ctrl.phase().await, Phase::Error);
        assert_eq!(ctrl.error().await.as_deref(), Some("Model not loaded."));
        assert!(ctrl.history.is_empty());
    }

    #[tokio::test]
    async fn rejection_is_terminal_but_not_an_error_and_skips_history() {
        let ctrl = controller(Arc::new(ImmediatePredictor {
            outcome: Ok(PredictionResult {
                success: false,
                prediction: None,
                alternatives: Vec::new(),
                rejected: true,
                reason: Some("No plant leaf detected.".to_string()),
            }),
        }));

        let result = ctrl.predict(upload("cat.jpg")).await.expect("committed");
        assert!(result.rejected);
        assert_eq!(ctrl.phase().await, Phase::Success);
        assert!(ctrl.error().await.is_none());
        assert!(ctrl.history.is_empty());
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let ctrl = controller(Arc::new(ImmediatePredictor {
            outcome: Ok(tomato_result()),
        }));
        ctrl.predict(upload("a.jpg")).await;

        ctrl.reset().await;
        assert_eq!(ctrl.phase().await, Phase::Idle);
        assert!(ctrl.result().await.is_none());

        ctrl.reset().await;
        assert_eq!(ctrl.phase().await, Phase::Idle);
        assert!(ctrl.result().await.is_none());
        assert!(ctrl.error().await.is_none());
    }

    #[tokio::test]
    async fn retry_without_submission_is_a_no_op() {
        // GatedPredictor with no armed gates would panic if called.
        let ctrl = controller(Arc::new(GatedPredictor::new()));
        assert!(ctrl.retry().await.is_none());
        assert_eq!(ctrl.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn retry_reuses_the_last_upload() {
        let predictor = Arc::new(GatedPredictor::new());
        let gate_first = predictor.arm("a.jpg");
        let ctrl = controller(predictor.clone());

        let ctrl_first = ctrl.clone();
        let first = tokio::spawn(async move { ctrl_first.predict(upload("a.jpg")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_first
            .send(Err(AppError::NetworkUnreachable("offline".to_string())))
            .unwrap();
        assert!(first.await.unwrap().is_none());
        assert_eq!(ctrl.phase().await, Phase::Error);

        // Same file name goes through the predictor again.
        let gate_second = predictor.arm("a.jpg");
        let ctrl_second = ctrl.clone();
        let second = tokio::spawn(async move { ctrl_second.retry().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_second.send(Ok(tomato_result())).unwrap();
        assert!(second.await.unwrap().is_some());
        assert_eq!(ctrl.phase().await, Phase::Success);
    }

    #[tokio::test]
    async fn success_mirrors_to_remote_history_when_enabled() {
        let store = Arc::new(FakeStore::new(true));
        let ctrl = RequestController::new(
            Arc::new(ImmediatePredictor {
                outcome: Ok(tomato_result()),
            }),
            LocalHistoryCache::new(),
            RemoteHistorySync::new(store.clone()),
        );

        ctrl.predict(upload("a.jpg")).await.expect("committed");

        let mut synced = false;
        for _ in 0..100 {
            if !store.appended.lock().unwrap().is_empty() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced, "remote push never arrived");
        let appended = store.appended.lock().unwrap();
        assert_eq!(appended[0].prediction.plant, "Tomato");
        assert_eq!(appended[0].alternatives.len(), 1);
    }
}
