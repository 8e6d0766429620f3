//! JSON API for the engine
//!
//! Every engine operation is exposed under `/api/v1`. Creatives and daily
//! snapshots can be pushed in through the same surface so the analyzers
//! have data to work on.

use crate::engine::{Context, Engine, EngineError};
use crate::model::creative::{Creative, MetricSnapshot};
use crate::model::experiment::{
    CreateExperimentRequest, EarlyStoppingDecision, Experiment, ExperimentAnalysis, StopReason,
};
use crate::model::fatigue::{BatchFatigueReport, FatigueVerdict};
use crate::model::intent::PlatformIntent;
use crate::model::performance::{AdGroupPerformance, PerformanceProfile};
use crate::model::rotation::{
    RotationAnalysis, RotationConfig, RotationRecommendation, RotationSchedule,
};
use crate::model::selection::{
    BatchSelectionReport, MarketContext, MonitoringReport, SelectionCriteria, SelectionResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    engine: Engine,
    ctx: Arc<Context>,
}

impl ApiState {
    pub fn new(engine: Engine, ctx: Arc<Context>) -> Self {
        ApiState { engine, ctx }
    }
}

/// Engine failure rendered as a JSON error body
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            EngineError::NotFound { .. } | EngineError::EmptyAdGroup(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.class(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookbackQuery {
    pub lookback_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentListQuery {
    pub ad_group_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopBody {
    pub reason: StopReason,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatigueBatchBody {
    pub creative_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EvaluateBody {
    pub criteria: SelectionCriteria,
    pub market: MarketContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionBatchBody {
    pub experiment_ids: Vec<Uuid>,
    #[serde(default)]
    pub criteria: SelectionCriteria,
    #[serde(default)]
    pub market: MarketContext,
}

#[derive(Debug, Serialize)]
pub struct Recorded {
    pub recorded: usize,
}

/// Routes for every engine operation, nested under `/api/v1`
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/creatives/{id}", put(upsert_creative))
        .route("/creatives/{id}/snapshots", post(record_snapshots))
        .route("/creatives/{id}/performance", get(creative_performance))
        .route("/creatives/{id}/fatigue", post(detect_fatigue).get(fatigue_history))
        .route("/fatigue/batch", post(detect_fatigue_batch))
        .route("/campaigns/{id}/fatigue", post(detect_campaign_fatigue))
        .route("/ad-groups/{id}/performance", get(ad_group_performance))
        .route("/ad-groups/{id}/rotation/analysis", post(analyze_rotation))
        .route("/ad-groups/{id}/rotation/recommendation", post(recommend_rotation))
        .route("/ad-groups/{id}/rotation/apply", post(apply_rotation))
        .route("/ad-groups/{id}/rotation/schedule", get(rotation_schedule))
        .route("/experiments", post(create_experiment).get(list_experiments))
        .route("/experiments/{id}", get(get_experiment))
        .route("/experiments/{id}/start", post(start_experiment))
        .route("/experiments/{id}/pause", post(pause_experiment))
        .route("/experiments/{id}/resume", post(resume_experiment))
        .route("/experiments/{id}/cancel", post(cancel_experiment))
        .route("/experiments/{id}/stop", post(stop_experiment))
        .route("/experiments/{id}/analysis", post(analyze_experiment))
        .route("/experiments/{id}/early-stopping", post(check_early_stopping))
        .route(
            "/experiments/{id}/selections",
            post(evaluate_winner).get(list_selections),
        )
        .route("/selections/batch", post(batch_evaluate))
        .route("/selections/{id}", get(get_selection))
        .route("/selections/{id}/implementation", post(begin_implementation))
        .route("/selections/{id}/monitoring", post(monitor_implementation))
        .route("/intents", get(list_intents))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}

async fn upsert_creative(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(creative): Json<Creative>,
) -> Result<StatusCode, ApiError> {
    if creative.id != id {
        return Err(EngineError::InvalidConfiguration(format!(
            "creative id {} does not match path {}",
            creative.id, id
        ))
        .into());
    }
    state
        .ctx
        .store
        .upsert_creative(&creative)
        .await
        .map_err(EngineError::from)?;
    info!(creative = %id, ad_group = %creative.ad_group_id, "Creative stored");
    Ok(StatusCode::NO_CONTENT)
}

async fn record_snapshots(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(snapshots): Json<Vec<MetricSnapshot>>,
) -> ApiResult<Recorded> {
    let store = &state.ctx.store;
    if store.get_creative(&id).await.map_err(EngineError::from)?.is_none() {
        return Err(EngineError::not_found("creative", &id).into());
    }
    if let Some(other) = snapshots.iter().find(|s| s.creative_id != id) {
        return Err(EngineError::InvalidConfiguration(format!(
            "snapshot for {} posted under creative {}",
            other.creative_id, id
        ))
        .into());
    }
    for snapshot in &snapshots {
        store
            .record_snapshot(snapshot)
            .await
            .map_err(EngineError::from)?;
    }
    Ok(Json(Recorded {
        recorded: snapshots.len(),
    }))
}

async fn creative_performance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<LookbackQuery>,
) -> ApiResult<PerformanceProfile> {
    Ok(Json(
        state
            .engine
            .performance
            .analyze_creative(&id, q.lookback_days)
            .await?,
    ))
}

async fn ad_group_performance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<LookbackQuery>,
) -> ApiResult<AdGroupPerformance> {
    Ok(Json(
        state
            .engine
            .performance
            .analyze_ad_group(&id, q.lookback_days)
            .await?,
    ))
}

async fn detect_fatigue(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<FatigueVerdict> {
    Ok(Json(state.engine.fatigue.detect(&id).await?))
}

async fn fatigue_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Vec<FatigueVerdict>> {
    Ok(Json(state.engine.fatigue.history(&id, q.days).await?))
}

async fn detect_fatigue_batch(
    State(state): State<ApiState>,
    Json(body): Json<FatigueBatchBody>,
) -> Json<BatchFatigueReport> {
    Json(state.engine.fatigue.detect_batch(&body.creative_ids).await)
}

async fn detect_campaign_fatigue(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<BatchFatigueReport> {
    Ok(Json(state.engine.fatigue.detect_campaign(&id).await?))
}

async fn analyze_rotation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(config): Json<RotationConfig>,
) -> ApiResult<RotationAnalysis> {
    Ok(Json(state.engine.rotation.analyze(&id, &config).await?))
}

async fn recommend_rotation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(config): Json<RotationConfig>,
) -> ApiResult<RotationRecommendation> {
    Ok(Json(state.engine.rotation.recommend(&id, &config).await?))
}

async fn apply_rotation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(config): Json<RotationConfig>,
) -> ApiResult<RotationRecommendation> {
    Ok(Json(state.engine.rotation.apply(&id, &config).await?))
}

async fn rotation_schedule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<RotationSchedule> {
    state
        .engine
        .rotation
        .current_schedule(&id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::not_found("rotation schedule", &id).into())
}

async fn create_experiment(
    State(state): State<ApiState>,
    Json(request): Json<CreateExperimentRequest>,
) -> Result<(StatusCode, Json<Experiment>), ApiError> {
    let experiment = state.engine.experiments.create(request).await?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

async fn list_experiments(
    State(state): State<ApiState>,
    Query(q): Query<ExperimentListQuery>,
) -> ApiResult<Vec<Experiment>> {
    Ok(Json(
        state
            .engine
            .experiments
            .list(q.ad_group_id.as_deref())
            .await?,
    ))
}

async fn get_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Experiment> {
    Ok(Json(state.engine.experiments.get(id).await?))
}

async fn start_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Experiment> {
    Ok(Json(state.engine.experiments.start(id).await?))
}

async fn pause_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<Experiment> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.engine.experiments.pause(id, reason).await?))
}

async fn resume_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Experiment> {
    Ok(Json(state.engine.experiments.resume(id).await?))
}

async fn cancel_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<Experiment> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.engine.experiments.cancel(id, reason).await?))
}

async fn stop_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StopBody>,
) -> ApiResult<Experiment> {
    Ok(Json(state.engine.experiments.stop(id, body.reason).await?))
}

async fn analyze_experiment(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ExperimentAnalysis> {
    Ok(Json(state.engine.experiments.analyze(id).await?))
}

async fn check_early_stopping(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<EarlyStoppingDecision> {
    Ok(Json(state.engine.experiments.check_early_stopping(id).await?))
}

async fn evaluate_winner(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    body: Option<Json<EvaluateBody>>,
) -> ApiResult<SelectionResult> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .engine
            .selection
            .evaluate(id, &body.criteria, &body.market)
            .await?,
    ))
}

async fn list_selections(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<SelectionResult>> {
    Ok(Json(state.engine.selection.list_for_experiment(id).await?))
}

async fn batch_evaluate(
    State(state): State<ApiState>,
    Json(body): Json<SelectionBatchBody>,
) -> Json<BatchSelectionReport> {
    Json(
        state
            .engine
            .selection
            .batch_evaluate(&body.experiment_ids, &body.criteria, &body.market)
            .await,
    )
}

async fn get_selection(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SelectionResult> {
    Ok(Json(state.engine.selection.get(id).await?))
}

async fn begin_implementation(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SelectionResult> {
    Ok(Json(state.engine.selection.begin_implementation(id).await?))
}

async fn monitor_implementation(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<MonitoringReport> {
    Ok(Json(state.engine.selection.monitor(id).await?))
}

async fn list_intents(
    State(state): State<ApiState>,
) -> ApiResult<Vec<PlatformIntent>> {
    Ok(Json(
        state
            .ctx
            .store
            .list_intents()
            .await
            .map_err(EngineError::from)?,
    ))
}
