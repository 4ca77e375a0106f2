//! HTTP front end: a JSON chat endpoint over a shared [`RagPipeline`].
//!
//! Routes:
//! - `POST /api/chat` runs one turn (never streamed)
//! - `GET /api/health` reports liveness and the configured model

use crate::error::IsbotError;
use crate::pipeline::{Answer, RagPipeline, TurnRequest};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Shared pipeline handle used as router state.
pub type SharedPipeline = Arc<RagPipeline>;

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub timestamp: String,
    pub feedback_link: Option<String>,
    pub retrieved: bool,
    pub queries: Vec<String>,
}

/// Build the axum router.
pub fn router(pipeline: SharedPipeline) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_handler))
        .with_state(pipeline)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(pipeline: SharedPipeline, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "ISbot HTTP server listening");
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP server");
        })
        .await
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn chat_handler(
    State(pipeline): State<SharedPipeline>,
    Json(mut request): Json<TurnRequest>,
) -> Response {
    request.options.stream = Some(false);
    let response = match pipeline.run_turn(request).await {
        Ok(response) => response,
        Err(e) => {
            let status = match e {
                IsbotError::Pipeline(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            error!(error = %e, status = status.as_u16(), "Chat request failed");
            return error_response(status, format!("Error: {}", e));
        }
    };

    let answer = match response.answer {
        Answer::Text(text) => text,
        Answer::Error(message) => return error_response(StatusCode::BAD_GATEWAY, message),
        Answer::Stream(stream) => match crate::brain::collect_stream(stream).await {
            Ok(text) => text,
            Err(e) => return error_response(StatusCode::BAD_GATEWAY, format!("Error: {}", e)),
        },
    };

    Json(ChatResponse {
        answer,
        timestamp: response.timestamp,
        feedback_link: response.feedback_link,
        retrieved: response.trace.retrieved,
        queries: response.trace.queries,
    })
    .into_response()
}

async fn health_handler(State(pipeline): State<SharedPipeline>) -> impl IntoResponse {
    let config = pipeline.config();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model": config.llm.model,
        "index": config.index.provider,
    }))
}
