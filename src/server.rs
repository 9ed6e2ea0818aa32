use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
    error::ScanError,
    ports,
    scanner::Scanner,
    types::{ScanEvent, ScanSession},
};

#[derive(Clone)]
pub struct AppState {
    scanner: Scanner,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub state: String, // "idle" | "running" | "completed" | "failed"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<ScanSession>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequestBody {
    pub target: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Serialize)]
pub struct Started {
    pub id: String,
    pub state: &'static str,
}

/// API routes backed by `scanner`.
pub fn router(scanner: Scanner) -> Router {
    let state = AppState { scanner };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/history", get(get_history))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, scanner: Scanner) -> Result<()> {
    let app = router(scanner);
    info!(bind, "serving API on http://{bind}/api");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let session = app.scanner.current_scan().await;
    let state = match &session {
        None => "idle".to_string(),
        Some(s) => s.status.as_str().to_string(),
    };
    (StatusCode::OK, Json(Status { state, session }))
}

async fn get_history(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.scanner.scan_history().await))
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    match app.scanner.stop_scan().await {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequestBody>,
) -> impl IntoResponse {
    let ports = if req.ports.is_empty() {
        ports::default_ports()
    } else {
        req.ports
    };

    let mut handle = match app.scanner.start_scan(&req.target, ports).await {
        Ok(h) => h,
        Err(e @ ScanError::InvalidInput(_)) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let id = handle.id.clone();
    // Output is kept on the session; the stream only feeds the log here.
    tokio::spawn(async move {
        while let Some(event) = handle.next_event().await {
            match event {
                ScanEvent::Output(line) => debug!(session = %handle.id, "{line}"),
                ScanEvent::Completed(s) | ScanEvent::Failed(s) => {
                    debug!(session = %s.id, status = ?s.status, "scan finished");
                }
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(Started {
            id,
            state: "running",
        }),
    )
        .into_response()
}
