//! HTTP server for the run-control protocol.
//!
//! Commands are queued on the runner and acknowledged immediately; progress
//! and questions arrive on the SSE streams.
//!
//! # API Endpoints
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/health`              | Health check                         |
//! | POST   | `/api/run/start`       | Start a run (optional filter)        |
//! | POST   | `/api/run/stop`        | Stop after the current transformer   |
//! | POST   | `/api/run/answer`      | Answer or ignore a question          |
//! | POST   | `/api/run/ignore-all`  | Ignore every question of the run     |
//! | GET    | `/api/status`          | Current run status                   |
//! | GET    | `/api/questions`       | Questions waiting for an answer      |
//! | GET    | `/api/events`          | SSE stream of status and questions   |
//! | GET    | `/api/logs`            | SSE stream of progress lines         |

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::logs::LOG_BROADCASTER;
use super::types::{accepted, reject, StartRequest, StatusResponse};
use crate::error::ServerResult;
use crate::resolve::{Answer, Question};
use crate::runner::{RunEvent, RunnerHandle};

type Rejection = (StatusCode, Json<Value>);

/// Routes bound to a runner.
pub fn router(runner: RunnerHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/run/start", post(start_run))
        .route("/api/run/stop", post(stop_run))
        .route("/api/run/answer", post(answer))
        .route("/api/run/ignore-all", post(ignore_all))
        .route("/api/status", get(status))
        .route("/api/questions", get(questions))
        .route("/api/events", get(sse_events))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(runner)
}

/// Start the HTTP server
pub async fn start_server(runner: RunnerHandle, port: u16) -> ServerResult<()> {
    let app = router(runner);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "server listening");
    println!("🚀 Rebater server running on http://localhost:{}", port);
    println!("   POST /api/run/start   - Start a run");
    println!("   POST /api/run/answer  - Answer a question");
    println!("   GET  /api/events      - SSE run events");
    println!("   GET  /api/logs        - SSE log stream");
    println!("   GET  /health          - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rebater",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn start_run(State(runner): State<RunnerHandle>, body: Bytes) -> Result<Json<Value>, Rejection> {
    let request = StartRequest::from_body(&body).map_err(reject)?;
    runner.start(request.filter).map_err(reject)?;
    Ok(Json(accepted("start")))
}

async fn stop_run(State(runner): State<RunnerHandle>) -> Result<Json<Value>, Rejection> {
    runner.stop().map_err(reject)?;
    Ok(Json(accepted("stop")))
}

async fn answer(State(runner): State<RunnerHandle>, Json(answer): Json<Answer>) -> Result<Json<Value>, Rejection> {
    runner.answer(answer).map_err(reject)?;
    Ok(Json(accepted("answer")))
}

async fn ignore_all(State(runner): State<RunnerHandle>) -> Result<Json<Value>, Rejection> {
    runner.ignore_all().map_err(reject)?;
    Ok(Json(accepted("ignore_all")))
}

async fn status(State(runner): State<RunnerHandle>) -> Json<StatusResponse> {
    Json(StatusResponse { status: runner.status(), pending_questions: runner.questions().len() })
}

async fn questions(State(runner): State<RunnerHandle>) -> Json<Vec<Question>> {
    Json(runner.questions())
}

/// SSE endpoint for run status and questions
async fn sse_events(State(runner): State<RunnerHandle>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(runner.subscribe()).filter_map(|result| {
        let event = result.ok()?;
        let name = match &event {
            RunEvent::Status(_) => "status",
            RunEvent::Question(_) => "question",
        };
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(name).data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(LOG_BROADCASTER.subscribe()).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::context::Time;
    use crate::runner::{RunStatus, Runner};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_then_status() {
        let dir = tempdir().unwrap();
        let (runner, handle) = Runner::new(Settings::new(dir.path(), Time { year: 2024, quarter: 1 }));
        runner.spawn();
        let mut events = handle.subscribe();

        let Json(body) = start_run(State(handle.clone()), Bytes::new()).await.unwrap();
        assert_eq!(body["status"], "accepted");

        loop {
            if let Ok(RunEvent::Status(s)) = events.recv().await {
                if s.is_settled() {
                    break;
                }
            }
        }
        let Json(response) = status(State(handle.clone())).await;
        assert!(matches!(response.status, RunStatus::Done { .. }));
        assert_eq!(response.pending_questions, 0);
    }

    #[tokio::test]
    async fn test_bad_start_body() {
        let dir = tempdir().unwrap();
        let (_runner, handle) = Runner::new(Settings::new(dir.path(), Time { year: 2024, quarter: 1 }));

        let (code, _) = start_run(State(handle), Bytes::from_static(b"{oops")).await.unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_runner_gone() {
        let dir = tempdir().unwrap();
        let (runner, handle) = Runner::new(Settings::new(dir.path(), Time { year: 2024, quarter: 1 }));
        drop(runner);

        let (code, _) = stop_run(State(handle)).await.unwrap_err();
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }
}
