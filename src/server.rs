use crate::categories::CategorySpec;
use crate::config::{AppConfig, TransactionConfig};
use crate::departments::{department_codes, resolve_path};
use crate::error::PipelineError;
use crate::pipeline::HazardService;
use crate::processing::aggregate_in;
use crate::render::{self, ChartData};
use crate::transactions::{self, JoinedTransactions, OutlierBounds};
use crate::types::{Crs, HazardDataset, HazardValue, LoadReport};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub config: AppConfig,
    pub service: HazardService,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::UnknownDepartment(_) => StatusCode::NOT_FOUND,
            PipelineError::DepartmentScope { .. } => StatusCode::BAD_REQUEST,
            PipelineError::ResourceUnavailable { .. } | PipelineError::Schema { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

impl AppState {
    fn hazard(&self, name: &str, dept: Option<&str>) -> std::result::Result<Arc<HazardDataset>, ApiError> {
        let dataset = self
            .config
            .dataset(name)
            .ok_or_else(|| ApiError::not_found(format!("unknown dataset '{}'", name)))?;
        let path = resolve_path(&dataset.path_template, dept)?;
        Ok(self.service.dataset(&path, dataset.crs, dataset.variant)?)
    }

    fn joined(
        &self,
        name: &str,
        bounds: impl Fn(&TransactionConfig) -> OutlierBounds,
    ) -> std::result::Result<(&TransactionConfig, JoinedTransactions), ApiError> {
        let table = self
            .config
            .transaction_table(name)
            .ok_or_else(|| ApiError::not_found(format!("unknown transaction table '{}'", name)))?;
        let loaded = self.service.transactions(&table.path, &table.columns)?;
        let mapping = table.join.table();
        let joined = transactions::build(&loaded.raw, &table.join.keys(), mapping.unclassified(), &bounds(table));
        tracing::debug!(
            "{}: {} records, {} non-positive surfaces, {} outliers",
            name,
            joined.records.len(),
            joined.non_positive_surface,
            joined.outliers
        );
        Ok((table, joined))
    }
}

/// Runs pipeline work off the async workers; loads are synchronous.
async fn blocking<T, F>(state: Arc<AppState>, work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> std::result::Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })?
        .map(Json)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/departments", get(departments_handler))
        .route("/api/datasets", get(datasets_handler))
        .route("/api/hazard/:dataset/:dept/map", get(map_handler))
        .route("/api/hazard/:dataset/:dept/summary", get(summary_handler))
        .route("/api/hazard/:dataset/:dept/at", get(point_handler))
        .route("/api/region/:dataset/map", get(regional_map_handler))
        .route("/api/region/:dataset/summary", get(regional_summary_handler))
        .route("/api/region/:dataset/at", get(regional_point_handler))
        .route("/api/transactions/:name/scatter", get(scatter_handler))
        .route("/api/transactions/:name/boxplot", get(box_handler))
        .route("/api/transactions/:name/distribution", get(distribution_handler))
        .route("/api/cache/clear", post(clear_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let port = state.config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    tracing::info!("Starting server on http://{}", addr);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn departments_handler() -> Json<Vec<String>> {
    Json(department_codes())
}

#[derive(Serialize)]
pub struct DatasetInfo {
    name: String,
    crs: Option<Crs>,
    kind: &'static str,
    per_department: bool,
}

async fn datasets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DatasetInfo>> {
    let hazard = state.config.datasets.iter().map(|d| DatasetInfo {
        name: d.name.clone(),
        crs: Some(d.crs),
        kind: "hazard",
        per_department: d.per_department(),
    });
    let sales = state.config.transactions.iter().map(|t| DatasetInfo {
        name: t.name.clone(),
        crs: None,
        kind: "transactions",
        per_department: false,
    });
    Json(hazard.chain(sales).collect())
}

fn chart_title(dataset: &str, dept: Option<&str>) -> String {
    match dept {
        Some(dept) => format!("{} - {}", dataset, dept),
        None => dataset.to_string(),
    }
}

async fn map(state: Arc<AppState>, dataset: String, dept: Option<String>) -> ApiResult<ChartData> {
    blocking(state, move |state| {
        let ds = state.hazard(&dataset, dept.as_deref())?;
        Ok(render::choropleth(&chart_title(&dataset, dept.as_deref()), &ds)?)
    })
    .await
}

async fn summary(state: Arc<AppState>, dataset: String, dept: Option<String>) -> ApiResult<ChartData> {
    blocking(state, move |state| {
        let ds = state.hazard(&dataset, dept.as_deref())?;
        let aggregated = aggregate_in(&ds, Crs::Lambert93)?;
        Ok(render::pie(&chart_title(&dataset, dept.as_deref()), &aggregated))
    })
    .await
}

#[derive(Deserialize)]
pub struct PointQuery {
    x: f64,
    y: f64,
}

#[derive(Serialize)]
pub struct PointResponse {
    category: CategorySpec,
    raw_value: String,
    hazard: HazardValue,
    report: LoadReport,
}

async fn point(
    state: Arc<AppState>,
    dataset: String,
    dept: Option<String>,
    params: PointQuery,
) -> ApiResult<Option<PointResponse>> {
    blocking(state, move |state| {
        let ds = state.hazard(&dataset, dept.as_deref())?;
        Ok(ds.record_at(params.x, params.y).map(|record| PointResponse {
            category: record.category.clone(),
            raw_value: record.raw_value.clone(),
            hazard: record.hazard.clone(),
            report: ds.report().clone(),
        }))
    })
    .await
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Path((dataset, dept)): Path<(String, String)>,
) -> ApiResult<ChartData> {
    map(state, dataset, Some(dept)).await
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Path((dataset, dept)): Path<(String, String)>,
) -> ApiResult<ChartData> {
    summary(state, dataset, Some(dept)).await
}

async fn point_handler(
    State(state): State<Arc<AppState>>,
    Path((dataset, dept)): Path<(String, String)>,
    Query(params): Query<PointQuery>,
) -> ApiResult<Option<PointResponse>> {
    point(state, dataset, Some(dept), params).await
}

async fn regional_map_handler(State(state): State<Arc<AppState>>, Path(dataset): Path<String>) -> ApiResult<ChartData> {
    map(state, dataset, None).await
}

async fn regional_summary_handler(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
) -> ApiResult<ChartData> {
    summary(state, dataset, None).await
}

async fn regional_point_handler(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
    Query(params): Query<PointQuery>,
) -> ApiResult<Option<PointResponse>> {
    point(state, dataset, None, params).await
}

async fn scatter_handler(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<ChartData> {
    blocking(state, move |state| {
        let (_, joined) = state.joined(&name, |t| t.scatter_bounds)?;
        Ok(render::scatter(&name, &joined.records))
    })
    .await
}

async fn box_handler(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<ChartData> {
    blocking(state, move |state| {
        let (table, joined) = state.joined(&name, |t| t.box_bounds)?;
        Ok(render::box_plot(&name, &joined.records, &table.join.table()))
    })
    .await
}

async fn distribution_handler(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<ChartData> {
    blocking(state, move |state| {
        let (table, joined) = state.joined(&name, |_| OutlierBounds::default())?;
        let counts = transactions::count_by_category(&joined.records, &table.join.table());
        Ok(render::pie(&name, &counts))
    })
    .await
}

async fn clear_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cleared = state.service.clear_cache();
    Json(json!({ "cleared": cleared }))
}
