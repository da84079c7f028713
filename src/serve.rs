//! Purpose: Provide the HTTP/JSON booking server.
//! Exports: `ServeConfig`, `serve`, `router`, `validate_config`.
//! Role: Axum server exposing the four booking routes in front of the cached upstream handle.
//! Invariants: Every response carries the permissive CORS headers; OPTIONS is 204 with an empty body.
//! Invariants: Transport/decode details are logged, never returned; business messages pass through verbatim.
//! Invariants: Error bodies are `{"error": "<message>"}`.

use std::error::Error as StdError;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::booking;
use crate::core::error::{Error, ErrorKind};
use crate::json::parse;
use crate::operation::Operation;
use crate::upstream::UpstreamHandle;

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "POST,OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const DECODE_ERROR_MESSAGE: &str = "Invalid SOAP response format";
const INVALID_JSON_MESSAGE: &str = "Invalid JSON payload";
const BODY_TOO_LARGE_MESSAGE: &str = "Request body too large";

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub max_body_bytes: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Clone)]
struct AppState {
    upstream: UpstreamHandle,
}

pub async fn serve(config: ServeConfig, upstream: UpstreamHandle) -> Result<(), Error> {
    validate_config(&config)?;
    let app = router(&config, upstream)?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_hint("Choose a free port with --bind.")
                .with_source(err)
        })?;
    info!(bind = %config.bind, "booking proxy listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }
    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }
    Ok(())
}

/// Builds the application router; exposed so tests can serve it on any listener.
pub fn router(config: &ServeConfig, upstream: UpstreamHandle) -> Result<Router, Error> {
    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let state = Arc::new(AppState { upstream });
    let mut app: Router<Arc<AppState>> = Router::new().route("/healthz", get(healthz));
    for operation in Operation::ALL {
        app = app.route(
            operation.route(),
            post(
                move |State(state): State<Arc<AppState>>,
                      body: Result<Bytes, BytesRejection>| async move {
                    match body {
                        Ok(body) => handle_operation(operation, &state, &body).await,
                        Err(rejection) => body_rejected(operation, rejection),
                    }
                },
            )
            .options(preflight),
        );
    }

    Ok(app
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::map_response(with_cors_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn preflight() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_operation(operation: Operation, state: &AppState, body: &[u8]) -> Response {
    let body: Value = match std::str::from_utf8(body)
        .ok()
        .and_then(|text| parse::from_str(text).ok())
    {
        Some(body) => body,
        None => {
            warn!(operation = operation.label(), "rejected request with invalid JSON body");
            return error_body(StatusCode::BAD_REQUEST, INVALID_JSON_MESSAGE);
        }
    };

    match booking::dispatch(&state.upstream, operation, &body).await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(err) => error_response(operation, err),
    }
}

fn body_rejected(operation: Operation, rejection: BytesRejection) -> Response {
    let status = rejection.status();
    warn!(
        operation = operation.label(),
        status = status.as_u16(),
        reason = %rejection.body_text(),
        "rejected request body"
    );
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        error_body(status, BODY_TOO_LARGE_MESSAGE)
    } else {
        error_body(status, INVALID_JSON_MESSAGE)
    }
}

fn error_response(operation: Operation, err: Error) -> Response {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::Business => {
            let message = err.message().unwrap_or("Bad request").to_string();
            info!(operation = operation.label(), kind = ?err.kind(), reason = %message, "request rejected");
            error_body(StatusCode::BAD_REQUEST, &message)
        }
        ErrorKind::Decode => {
            error!(operation = operation.label(), error = %err, "upstream returned an undecodable result");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, DECODE_ERROR_MESSAGE)
        }
        ErrorKind::Transport | ErrorKind::Usage | ErrorKind::Internal | ErrorKind::Io => {
            error!(
                operation = operation.label(),
                error = %err,
                cause = %source_chain(&err),
                "upstream call failed"
            );
            error_body(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn source_chain(err: &Error) -> String {
    let mut causes = Vec::new();
    let mut current = StdError::source(err);
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = StdError::source(cause);
    }
    if causes.is_empty() {
        "-".to_string()
    } else {
        causes.join(": ")
    }
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::{ServeConfig, validate_config};
    use crate::core::error::ErrorKind;

    #[test]
    fn default_config_is_valid() {
        validate_config(&ServeConfig::default()).expect("config ok");
    }

    #[test]
    fn body_limit_must_be_positive() {
        let config = ServeConfig {
            max_body_bytes: 0,
            ..ServeConfig::default()
        };
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
