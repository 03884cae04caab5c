use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::prelude::*;
use blobgate_core::{GateError, StatefulFrontend, WriteOutcome};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Clone)]
pub struct ServerState {
    pub frontend: Arc<StatefulFrontend>,
}

#[derive(Debug, Deserialize)]
struct PutBlobRequest {
    id: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct BlobResponse {
    id: String,
    size: i64,
    created_at: i64,
    data: String,
}

pub fn build_router(frontend: Arc<StatefulFrontend>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/blobs", post(put_blob))
        .route("/v1/blobs/:id", get(get_blob))
        .with_state(ServerState { frontend })
}

pub async fn run_server(config: Config) -> blobgate_core::Result<()> {
    let frontend = Arc::new(config.build_frontend()?);
    frontend.init().wait().await?;
    tracing::info!("frontend ready with {} backends", config.backends.len());

    if config.backup_interval_secs > 0 {
        let interval = std::time::Duration::from_secs(config.backup_interval_secs);
        let backup_frontend = Arc::clone(&frontend);
        tokio::spawn(async move {
            backup_loop(backup_frontend, interval).await;
        });
    }

    let app = build_router(Arc::clone(&frontend));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| GateError::Config(format!("cannot bind {}: {}", config.bind_addr, error)))?;
    tracing::info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| GateError::Internal(error.to_string()))?;

    tracing::info!("shutting down, closing frontend");
    if let Err(error) = frontend.close().wait().await {
        tracing::warn!("frontend close failed: {}", error);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for shutdown signal: {}", error);
    }
}

async fn backup_loop(frontend: Arc<StatefulFrontend>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick fires immediately; skip it so backups start one period in.
    interval.tick().await;
    loop {
        interval.tick().await;
        match frontend.backup().wait().await {
            Ok(_) => tracing::debug!("periodic backup completed"),
            Err(error) => tracing::warn!("periodic backup failed: {}", error),
        }
    }
}

/// The token after a leading `Bearer`; anything else means no bearer.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer"))
        .map(|token| token.trim().to_string())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn health(State(state): State<ServerState>) -> Response {
    match state.frontend.is_ready().try_wait() {
        Some(Ok(_)) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "status": "ok" })),
        )
            .into_response(),
        Some(Err(error)) => error_body(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        None => error_body(StatusCode::SERVICE_UNAVAILABLE, "starting"),
    }
}

async fn put_blob(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return error_body(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected application/json",
        );
    }
    let request: PutBlobRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return error_body(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("malformed body: {error}"),
            )
        }
    };
    if request.id.is_empty() {
        return error_body(StatusCode::UNPROCESSABLE_ENTITY, "id must not be empty");
    }

    let bearer = bearer_token(&headers);
    match state
        .frontend
        .write_object(&request.id, &request.data, bearer.as_deref())
        .wait()
        .await
    {
        Ok(WriteOutcome::Stored { .. }) => (
            StatusCode::CREATED,
            axum::Json(MessageResponse {
                message: format!("stored {}", request.id),
            }),
        )
            .into_response(),
        Ok(WriteOutcome::Rejected) => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, "id already exists")
        }
        Ok(WriteOutcome::InvalidPayload) => {
            error_body(StatusCode::UNPROCESSABLE_ENTITY, "payload is not valid base64")
        }
        Ok(WriteOutcome::NoBackendOnline) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, "no backend online")
        }
        Err(error) => {
            tracing::error!("write for {} failed: {}", request.id, error);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

async fn get_blob(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let bearer = bearer_token(&headers);
    match state
        .frontend
        .read_object(&id, bearer.as_deref())
        .wait()
        .await
    {
        Ok(Some(object)) => (
            StatusCode::OK,
            axum::Json(BlobResponse {
                id: object.meta.id,
                size: object.meta.size,
                created_at: object.meta.created_at,
                data: BASE64_STANDARD.encode(&object.data),
            }),
        )
            .into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "object not found"),
        Err(GateError::Unauthorized(_)) => error_body(StatusCode::UNAUTHORIZED, "wrong bearer"),
        Err(error) => {
            tracing::error!("read for {} failed: {}", id, error);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing_requires_the_bearer_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer  tok-A ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("tok-A".to_string()));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.remove(header::AUTHORIZATION);
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn bearer_without_a_token_is_public() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some(String::new()));
    }

    #[test]
    fn json_content_type_check_allows_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!is_json(&headers));
    }
}
