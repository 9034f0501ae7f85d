use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{
    Band, HistoricalReturns, MarketRegime, Plan, RunConfig, SimError, SimulationResult,
    YearRecord, debug_trace, simulate,
};

/// Seed used when a request does not pin one; results stay reproducible
/// across identical requests either way.
const DEFAULT_SEED: u64 = 42;

const MAX_COMPARE_PLANS: usize = 3;

/// Read-only resources shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    history: Arc<HistoricalReturns>,
    /// Server-wide run-count threshold for rayon fan-out, set by the
    /// `serve` command line.
    parallel_threshold: usize,
}

impl ApiState {
    pub fn new(history: Arc<HistoricalReturns>, parallel_threshold: usize) -> Self {
        Self {
            history,
            parallel_threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    plan: Plan,
    #[serde(default)]
    num_runs: Option<usize>,
    #[serde(default)]
    lower_percentile: Option<u8>,
    #[serde(default)]
    upper_percentile: Option<u8>,
    #[serde(default)]
    initial_market_regime: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComparePayload {
    plans: Vec<Plan>,
    #[serde(default)]
    num_runs: Option<usize>,
    #[serde(default)]
    lower_percentile: Option<u8>,
    #[serde(default)]
    upper_percentile: Option<u8>,
    #[serde(default)]
    initial_market_regime: Option<String>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DebugQuery {
    band: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    results: Vec<SimulationResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugResponse {
    band: Band,
    years: Vec<YearRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    months: usize,
    bear_windows: usize,
    bull_windows: usize,
    p_bull_stay: f64,
    p_bear_stay: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

fn build_config(
    num_runs: Option<usize>,
    lower_percentile: Option<u8>,
    upper_percentile: Option<u8>,
    initial_market_regime: Option<&str>,
    parallel_threshold: usize,
) -> Result<RunConfig, SimError> {
    let defaults = RunConfig::default();
    let config = RunConfig {
        num_runs: num_runs.unwrap_or(defaults.num_runs),
        lower_pct: lower_percentile.unwrap_or(defaults.lower_pct),
        upper_pct: upper_percentile.unwrap_or(defaults.upper_pct),
        initial_regime: parse_regime(initial_market_regime)?,
        parallel_threshold,
    };
    config.validate()?;
    Ok(config)
}

fn parse_regime(label: Option<&str>) -> Result<Option<MarketRegime>, SimError> {
    match label {
        None | Some("") | Some("none") => Ok(None),
        Some("bear") => Ok(Some(MarketRegime::Bear)),
        Some("bull") => Ok(Some(MarketRegime::Bull)),
        Some(other) => Err(SimError::UnknownRegime(other.to_string())),
    }
}

fn parse_band(label: Option<&str>) -> Result<Band, SimError> {
    match label {
        None | Some("median") => Ok(Band::Median),
        Some("lower") => Ok(Band::Lower),
        Some("upper") => Ok(Band::Upper),
        Some(other) => Err(SimError::invalid(
            "band",
            format!("unknown band '{other}' (expected lower, median, or upper)"),
        )),
    }
}

pub async fn run_http_server(port: u16, state: ApiState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "simulation API listening");

    axum::serve(listener, app).await
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/simulate/compare", post(compare_handler))
        .route("/api/simulate/debug", post(debug_handler))
        .route("/api/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    error_body(StatusCode::NOT_FOUND, "Not found", None)
}

async fn health_handler(State(state): State<ApiState>) -> Response {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            months: state.history.months(),
            bear_windows: state.history.bear_window_count(),
            bull_windows: state.history.bull_window_count(),
            p_bull_stay: state.history.p_bull_stay(),
            p_bear_stay: state.history.p_bear_stay(),
        }),
    )
        .into_response()
}

async fn simulate_handler(
    State(state): State<ApiState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    let config = match build_config(
        payload.num_runs,
        payload.lower_percentile,
        payload.upper_percentile,
        payload.initial_market_regime.as_deref(),
        state.parallel_threshold,
    ) {
        Ok(config) => config,
        Err(err) => return error_response(err),
    };
    let seed = payload.seed.unwrap_or(DEFAULT_SEED);

    match simulate(&state.history, &payload.plan, &config, seed) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn compare_handler(
    State(state): State<ApiState>,
    Json(payload): Json<ComparePayload>,
) -> Response {
    if payload.plans.is_empty() || payload.plans.len() > MAX_COMPARE_PLANS {
        return error_response(SimError::invalid(
            "plans",
            format!("expected 1..={MAX_COMPARE_PLANS} plans, got {}", payload.plans.len()),
        ));
    }
    let config = match build_config(
        payload.num_runs,
        payload.lower_percentile,
        payload.upper_percentile,
        payload.initial_market_regime.as_deref(),
        state.parallel_threshold,
    ) {
        Ok(config) => config,
        Err(err) => return error_response(err),
    };
    let seed = payload.seed.unwrap_or(DEFAULT_SEED);

    let mut results = Vec::with_capacity(payload.plans.len());
    for plan in &payload.plans {
        match simulate(&state.history, plan, &config, seed) {
            Ok(result) => results.push(result),
            Err(err) => return error_response(err),
        }
    }
    (StatusCode::OK, Json(CompareResponse { results })).into_response()
}

/// Re-derives the requested band's representative run for the given request
/// and returns its full per-age trace. Deterministic seeding makes this
/// reproduce the exact run behind the aggregate result.
async fn debug_handler(
    State(state): State<ApiState>,
    Query(query): Query<DebugQuery>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    let band = match parse_band(query.band.as_deref()) {
        Ok(band) => band,
        Err(err) => return error_response(err),
    };
    let config = match build_config(
        payload.num_runs,
        payload.lower_percentile,
        payload.upper_percentile,
        payload.initial_market_regime.as_deref(),
        state.parallel_threshold,
    ) {
        Ok(config) => config,
        Err(err) => return error_response(err),
    };
    let seed = payload.seed.unwrap_or(DEFAULT_SEED);

    match debug_trace(&state.history, &payload.plan, &config, seed, band) {
        Ok(years) => (StatusCode::OK, Json(DebugResponse { band, years })).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: SimError) -> Response {
    let status = match &err {
        SimError::InvalidInput { .. } | SimError::UnknownRegime(_) => StatusCode::BAD_REQUEST,
        SimError::EmptyHistory { .. }
        | SimError::DataFile { .. }
        | SimError::EmptyRegimePool { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SimError::Cancelled | SimError::InvariantViolation { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let field = err.field().map(str::to_string);
    if status.is_server_error() {
        tracing::error!(%err, "simulation request failed");
    }
    error_body(status, &err.to_string(), field)
}

fn error_body(status: StatusCode, message: &str, field: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            field,
        }),
    )
        .into_response()
}
