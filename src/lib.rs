//! Client engine for plant disease analysis: the request lifecycle state
//! machine, a bounded session history cache, and an optional realtime
//! remote history mirror.

pub mod error;
pub mod models;
pub mod services;

pub use error::AppError;
pub use models::history_types::{
    HistoryEntry, LocalEntry, NewAnalysis, RawEntry, RemoteRecord,
};
pub use models::predict_types::{
    Alternative, ClassCatalog, ClassInfo, DiseaseInfo, HealthStatus, ImageUpload, Prediction,
    PredictionResult,
};
pub use services::history_cache::{LocalHistoryCache, HISTORY_CAPACITY};
pub use services::history_view::{merge, normalize, HistoryView};
pub use services::inference_client::{InferenceClient, Predictor};
pub use services::remote_store::{HistoryStore, RestStoreClient, StoreConfig, REMOTE_HISTORY_LIMIT};
pub use services::remote_sync::{RemoteHistorySync, SnapshotStream, Subscription};
pub use services::request_controller::{Phase, RequestController};
