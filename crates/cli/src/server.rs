use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::app::SharedState;
use crate::{dispatch, health};

pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub fn router(state: SharedState) -> Router {
	Router::new()
		.route("/command", post(command))
		.route("/health", get(health_check))
		.route("/logs", get(logs))
		.with_state(state)
}

/// Serves the API until `shutdown` resolves.
pub async fn serve<F>(state: SharedState, shutdown: F) -> Result<()>
where
	F: Future<Output = ()> + Send + 'static,
{
	let config = state.config();
	let addr: SocketAddr = format!("{}:{}", config.host, config.port)
		.parse()
		.with_context(|| format!("Invalid host/port combination: {}:{}", config.host, config.port))?;

	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind API server to {addr}"))?;
	info!(target = "swiftscope.api", addr = %listener.local_addr()?, "API listening");

	axum::serve(listener, router(state.clone()).into_make_service())
		.with_graceful_shutdown(shutdown)
		.await
		.context("API server error")
}

async fn command(State(state): State<SharedState>, body: Bytes) -> Response {
	match dispatch::handle(&state, &body).await {
		Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
		Err(err) => {
			debug!(target = "swiftscope.api", code = %err.code(), error = %err, "command failed");
			err.into_response()
		}
	}
}

async fn health_check(State(state): State<SharedState>) -> Response {
	let readiness = health::check(&state).await;
	let status = if readiness.is_ready() {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	(status, Json(health::envelope(&state, &readiness))).into_response()
}

/// Runs until the client disconnects or the log stream subprocess exits.
async fn logs(State(state): State<SharedState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let stream = state.logs().lines().map(|line| Ok(Event::default().data(line)));
	Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}
