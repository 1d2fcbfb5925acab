//! menupic key-holding proxy server
//!
//! Forwards identification prompts to Gemini and image jobs to FLUX so the
//! API keys never leave the server.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use llm_bridge::proxy::{FluxProxyRequest, GeminiProxyRequest, GeminiProxyResponse};
use llm_bridge::{FluxClient, GeminiClient};
use menupic_core::ServiceError;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

struct AppState {
    gemini: Option<GeminiClient>,
    flux: Option<FluxClient>,
}

impl AppState {
    /// Clients whose key is missing stay `None` and answer 500
    fn from_env() -> Self {
        let gemini = GeminiClient::from_env()
            .map_err(|e| tracing::warn!("Gemini proxy disabled: {:#}", e))
            .ok();
        let flux = FluxClient::from_env()
            .map_err(|e| tracing::warn!("FLUX proxy disabled: {:#}", e))
            .ok();
        Self { gemini, flux }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let state = Arc::new(AppState::from_env());
    let app = router(state);

    let addr = std::env::var("MENUPIC_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/gemini-proxy", post(gemini_proxy))
        .route("/api/black-forest-proxy", post(black_forest_proxy))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn misconfigured(key: &str) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Server misconfiguration: {key} not found"),
    )
}

/// Malformed or non-JSON bodies still answer with an `{error}` object
fn rejected_body(rejection: JsonRejection) -> Response {
    tracing::debug!("rejected request body: {}", rejection.body_text());
    error_response(StatusCode::BAD_REQUEST, "Invalid JSON body")
}

/// Relay an upstream answer with its status, as JSON when it parses
fn passthrough(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = if serde_json::from_str::<Value>(&body).is_ok() {
        "application/json"
    } else {
        "text/plain"
    };
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn gemini_proxy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GeminiProxyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected_body(rejection),
    };
    let Some(prompt) = request.prompt.filter(|p| !p.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing prompt");
    };
    let Some(gemini) = state.gemini.as_ref() else {
        return misconfigured("GEMINI_API_KEY");
    };

    match gemini.generate_text(&prompt).await {
        Ok(text) => Json(GeminiProxyResponse {
            text: Some(text),
            error: None,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!("Gemini request failed: {}", err);
            let status = match err {
                ServiceError::Http { status: 429, .. } => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, err.to_string())
        }
    }
}

async fn black_forest_proxy(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(flux) = state.flux.as_ref() else {
        return misconfigured("BLACK_FOREST_LABS_API_KEY");
    };
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let Ok(request) = serde_json::from_value::<FluxProxyRequest>(body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid action");
    };

    let upstream = match request {
        FluxProxyRequest::Poll { poll_url } => {
            let Some(poll_url) = poll_url.filter(|u| !u.is_empty()) else {
                return error_response(StatusCode::BAD_REQUEST, "Missing pollUrl");
            };
            flux.poll_raw(&poll_url).await
        }
        generate => {
            let Some(request) = generate.into_flux_request() else {
                return error_response(StatusCode::BAD_REQUEST, "Missing prompt");
            };
            flux.submit_raw(&request).await
        }
    };

    match upstream {
        Ok((status, body)) => passthrough(status, body),
        Err(err) => {
            tracing::warn!("FLUX request failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
