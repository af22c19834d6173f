//! HTTP surface: training, model management and scoring over JSON.
//!
//! ```text
//! GET    /health
//! GET    /files/:filename/columns
//! POST   /train_anomaly_detector/
//! GET    /models/
//! GET    /models/:name/config
//! DELETE /models/:name
//! POST   /predict_or_score/
//! POST   /score_file/
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::csv_reader;
use crate::error::ScoringError;
use crate::schema::{FeatureSchema, RecordInput, TrainSpec};
use crate::scoring::{self, Score};
use crate::store::ModelStore;
use crate::trainer;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Scoring(ScoringError),
    // Worker task panicked or was cancelled
    Internal(String),
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        ApiError::Scoring(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Scoring(err) if err.is_client_error() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Scoring(err) if err.is_not_found() => (StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Scoring(err) => {
                tracing::error!("Request failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ModelStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> crate::error::Result<Self> {
        let store = ModelStore::new(&config.model_dir)?;
        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files/:filename/columns", get(file_columns))
        .route("/train_anomaly_detector/", post(train_anomaly_detector))
        .route("/models/", get(list_models))
        .route("/models/:name/config", get(model_config))
        .route("/models/:name", delete(delete_model))
        .route("/predict_or_score/", post(predict_or_score))
        .route("/score_file/", post(score_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Training and scoring are CPU-bound; keep them off the async workers
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

fn upload_path(config: &Config, filename: &str) -> ApiResult<std::path::PathBuf> {
    config.upload_path(filename).ok_or_else(|| {
        ApiError::Scoring(ScoringError::InvalidInput(format!(
            "invalid file name '{}'",
            filename
        )))
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ColumnsResponse {
    pub columns: Vec<String>,
}

pub async fn file_columns(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<ColumnsResponse>> {
    let path = upload_path(&state.config, &filename)?;
    let columns = blocking(move || csv_reader::read_columns(&path)).await?;
    Ok(Json(ColumnsResponse { columns }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainRequest {
    pub filename: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(flatten)]
    pub spec: TrainSpec,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    pub message: String,
    pub model_name: String,
}

pub async fn train_anomaly_detector(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<Json<TrainResponse>> {
    let path = upload_path(&state.config, &request.filename)?;
    let model_name = request
        .model_name
        .clone()
        .unwrap_or_else(|| format!("{}_anomaly", request.filename));
    crate::store::validate_name(&model_name)?;

    let mut spec = request.spec;
    spec.seed = Some(spec.seed.unwrap_or(state.config.random_seed));
    let store = state.store.clone();
    let name = model_name.clone();
    let schema = blocking(move || {
        let table = csv_reader::read_csv(&path)?;
        let (artifact, schema) = trainer::train(&table, &spec)?;
        store.save(&name, &artifact, &schema)?;
        Ok(schema)
    })
    .await?;

    tracing::info!(model = %model_name, algorithm = %schema.algorithm, "training request completed");
    Ok(Json(TrainResponse {
        status: "success".to_string(),
        message: format!(
            "{} trained on {} rows with {} feature columns",
            schema.algorithm,
            schema.n_training_rows,
            schema.feature_columns.len()
        ),
        model_name,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let store = state.store.clone();
    let models = blocking(move || store.list()).await?;
    Ok(Json(ModelsResponse { models }))
}

pub async fn model_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<FeatureSchema>> {
    let store = state.store.clone();
    let schema = blocking(move || store.load_config(&name)).await?;
    Ok(Json(schema))
}

pub async fn delete_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.store.clone();
    let deleted = name.clone();
    blocking(move || store.delete(&name)).await?;
    Ok(Json(json!({ "status": "deleted", "model_name": deleted })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreRecordRequest {
    pub model_name: String,
    pub record: RecordInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowScore {
    pub anomaly_score: f64,
    pub is_anomaly_predicted: bool,
}

impl From<Score> for RowScore {
    fn from(score: Score) -> Self {
        Self {
            anomaly_score: score.anomaly_score,
            is_anomaly_predicted: score.is_anomaly,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreRecordResponse {
    pub model_type: String,
    pub anomaly_score: f64,
    pub is_anomaly_predicted: bool,
}

pub async fn predict_or_score(
    State(state): State<AppState>,
    Json(request): Json<ScoreRecordRequest>,
) -> ApiResult<Json<ScoreRecordResponse>> {
    let store = state.store.clone();
    let (model_type, score) = blocking(move || {
        let (artifact, schema) = store.load(&request.model_name)?;
        let score = scoring::score_record(&request.record, &artifact, &schema)?;
        Ok((schema.model_type, score))
    })
    .await?;

    Ok(Json(ScoreRecordResponse {
        model_type,
        anomaly_score: score.anomaly_score,
        is_anomaly_predicted: score.is_anomaly,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreFileRequest {
    pub model_name: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreFileResponse {
    pub model_type: String,
    pub scores: Vec<RowScore>,
    pub n_anomalies: usize,
}

pub async fn score_file(
    State(state): State<AppState>,
    Json(request): Json<ScoreFileRequest>,
) -> ApiResult<Json<ScoreFileResponse>> {
    let path = upload_path(&state.config, &request.filename)?;
    let store = state.store.clone();
    let (model_type, scores) = blocking(move || {
        let (artifact, schema) = store.load(&request.model_name)?;
        let table = csv_reader::read_csv(&path)?;
        let scores = scoring::score_table(&table, &artifact, &schema)?;
        Ok((schema.model_type, scores))
    })
    .await?;

    let n_anomalies = scores.iter().filter(|s| s.is_anomaly).count();
    tracing::info!(rows = scores.len(), n_anomalies, "file scored");
    Ok(Json(ScoreFileResponse {
        model_type,
        scores: scores.into_iter().map(RowScore::from).collect(),
        n_anomalies,
    }))
}
