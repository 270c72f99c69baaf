use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::export;
use crate::scenario::Drivers;
use crate::state::SessionState;
use crate::workbook;

pub struct AppState {
    session: Mutex<SessionState>,
}

#[derive(Serialize)]
struct ApiResponse {
    status: String,
    message: Option<String>,
}

impl ApiResponse {
    fn error(message: impl Into<String>) -> Json<Self> {
        Json(ApiResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        })
    }
}

#[derive(Deserialize)]
struct MetricsUpdate {
    metrics: Vec<String>,
}

/// Start the dashboard server on the given port.
pub async fn run(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app_state = Arc::new(AppState {
        session: Mutex::new(SessionState::default()),
    });

    let app = Router::new()
        .route("/", get(serve_index))
        .route("/api/upload", post(upload_workbook))
        .route("/api/drivers", post(set_drivers))
        .route("/api/metrics", post(set_metrics))
        .route("/api/state", get(get_state))
        .route("/api/chart", get(get_chart))
        .route("/api/table", get(get_table))
        .route("/api/export", get(export_csv))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .with_state(app_state);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    log::info!("listening on http://127.0.0.1:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

/// Accept a workbook upload (multipart field `workbook`), parse it, and only
/// then swap it into the session. A parse failure leaves whatever was
/// previously loaded untouched.
async fn upload_workbook(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut file_data = Vec::new();

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("workbook") {
                    match field.bytes().await {
                        Ok(bytes) => file_data = bytes.to_vec(),
                        Err(e) => {
                            return (
                                StatusCode::BAD_REQUEST,
                                ApiResponse::error(format!("failed to read upload: {e}")),
                            )
                                .into_response();
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    ApiResponse::error(format!("malformed upload: {e}")),
                )
                    .into_response();
            }
        }
    }

    if file_data.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::error("no file data received"),
        )
            .into_response();
    }

    match workbook::parse_workbook(&file_data) {
        Ok(tables) => {
            log::info!(
                "workbook loaded: {} periods, {} base columns",
                tables.base.len(),
                tables.base.columns().len()
            );
            let mut session = state.session.lock().unwrap();
            session.load(tables);
            Json(serde_json::json!({
                "status": "ok",
                "state": session.snapshot(),
            }))
            .into_response()
        }
        Err(e) => {
            log::warn!("workbook rejected: {e}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiResponse::error(e.to_string()),
            )
                .into_response()
        }
    }
}

async fn set_drivers(
    State(state): State<Arc<AppState>>,
    Json(drivers): Json<Drivers>,
) -> impl IntoResponse {
    let mut session = state.session.lock().unwrap();
    session.set_drivers(drivers);
    Json(serde_json::json!({
        "status": "ok",
        "drivers": session.drivers(),
    }))
}

async fn set_metrics(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MetricsUpdate>,
) -> impl IntoResponse {
    let mut session = state.session.lock().unwrap();
    session.set_metrics(payload.metrics);
    Json(serde_json::json!({
        "status": "ok",
        "metrics": session.metrics(),
    }))
}

async fn get_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().unwrap();
    Json(session.snapshot())
}

/// Long-form chart payload: one `{period, metric, value}` row per period ×
/// selected metric, in selection order.
async fn get_chart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().unwrap();
    match session.derived(true) {
        Ok(Some(frame)) => {
            let rows = frame.melt(session.metrics());
            Json(serde_json::json!({
                "status": "ok",
                "series_order": session.metrics(),
                "rows": rows,
            }))
            .into_response()
        }
        Ok(None) => no_workbook_response(),
        Err(e) => compute_warning_response(e),
    }
}

/// Full derived table for the data explorer.
async fn get_table(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session.lock().unwrap();
    match session.derived(false) {
        Ok(Some(frame)) => Json(serde_json::json!({
            "status": "ok",
            "table": frame,
        }))
        .into_response(),
        Ok(None) => no_workbook_response(),
        Err(e) => compute_warning_response(e),
    }
}

/// Download the currently derived table as CSV.
async fn export_csv(State(state): State<Arc<AppState>>) -> Response {
    let session = state.session.lock().unwrap();
    match session.derived(false) {
        Ok(Some(frame)) => {
            let csv = export::to_csv(&frame);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
                .header(
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"dau_scenario.csv\"",
                )
                .body(axum::body::Body::from(csv))
                .unwrap()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            ApiResponse::error("no workbook loaded"),
        )
            .into_response(),
        Err(e) => {
            log::warn!("recalculation failed: {e}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiResponse::error("scenario could not be computed from the loaded model"),
            )
                .into_response()
        }
    }
}

fn no_workbook_response() -> Response {
    Json(serde_json::json!({
        "status": "empty",
        "message": "upload a workbook to begin",
    }))
    .into_response()
}

fn compute_warning_response(e: crate::error::ComputeError) -> Response {
    log::warn!("recalculation failed: {e}");
    Json(serde_json::json!({
        "status": "warning",
        "message": "scenario could not be computed from the loaded model",
    }))
    .into_response()
}
