//! HTTP server for CodePortal.
//!
//! Every route sits behind the access guard: mode/key/IP/payload
//! checks run before any handler, and each accepted request resets the
//! idle-shutdown countdown. The server drains in-flight requests and
//! exits when the countdown fires.

use anyhow::Result;
use axum::{
    Router,
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::guard::{self, AuthError};
use crate::lifecycle::LifecycleGovernor;
use crate::materialize::{self, MaterializeError, ProjectRequest, RejectedFile};
use crate::providers::{
    GenerationRequest, KeyStore, Provider, ProviderError, create_provider,
};
use crate::scaffold::{ArchiveScaffold, ProjectScaffold};

/// Upper bound on one materialization; large bundles land well under it.
const MATERIALIZE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Server {
    config: Config,
}

struct AppState {
    config: Config,
    governor: LifecycleGovernor,
    scaffold: ArchiveScaffold,
    keys: KeyStore,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let governor = LifecycleGovernor::new(self.config.idle_timeout());

        let keys = KeyStore::new(&self.config.paths);
        keys.init_if_missing()?;

        let state = Arc::new(AppState {
            config: self.config.clone(),
            governor: governor.clone(),
            scaffold: ArchiveScaffold::new(&self.config.paths),
            keys,
        });

        // Countdown task: raises the shutdown signal on idle expiry
        let countdown = governor.clone();
        tokio::spawn(async move { countdown.run().await });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Hard cap on body size, backing up the guard's header check
        let body_limit = usize::try_from(self.config.max_payload_bytes())
            .unwrap_or(usize::MAX);

        let app = Router::new()
            .route("/", get(home))
            .route("/health", get(health_check))
            .route("/createProject", post(create_project))
            .route("/recentProjects", get(recent_projects))
            .route("/ai/generate", post(ai_generate))
            .route("/ai/keys", get(list_keys).post(update_key))
            .layer(middleware::from_fn_with_state(state.clone(), access_guard))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state);

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);
        if self.config.public_mode {
            info!(
                "Public mode: API key required, {} address(es) allowed",
                self.config.allowed_ips.len()
            );
        } else {
            info!("Local-only mode: loopback requests only");
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { governor.wait_for_shutdown().await })
        .await?;

        info!("Idle timeout reached, server stopped");
        Ok(())
    }
}

// Error response type
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

// ── Access guard middleware ──

async fn access_guard(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let presented_key = bearer_token(request.headers());
    let payload_bytes = content_length(request.headers());

    match guard::authorize(
        addr.ip(),
        presented_key.as_deref(),
        payload_bytes,
        &state.config,
    ) {
        Ok(()) => {
            state.governor.touch();
            next.run(request).await
        }
        Err(e) => {
            info!("Denied request from {}: {}", addr.ip(), e.reason());
            deny_response(e)
        }
    }
}

fn deny_response(error: AuthError) -> Response {
    let status = match error {
        AuthError::NotLocal => StatusCode::FORBIDDEN,
        AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
        AuthError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
    };
    (
        status,
        Json(json!({"error": error.to_string(), "reason": error.reason()})),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

// ── Handlers ──

async fn home(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "CodePortal",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": [
            "/createProject - Create a new project from files",
            "/recentProjects - List recent projects",
            "/ai/generate - Generate text via a configured provider",
            "/ai/keys - Manage provider API keys",
        ],
        "auto_shutdown": format!(
            "Server shuts down after {} minutes without requests",
            state.config.idle_timeout_minutes
        ),
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct CreateProjectResponse {
    status: &'static str,
    project_name: String,
    root: String,
    files_written: Vec<String>,
    files_rejected: Vec<RejectedFile>,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProjectRequest>,
) -> Response {
    let project_name = request.project_name.clone();
    let scaffold = state.scaffold.clone();

    // Filesystem work off the async workers, bounded per request
    let task = tokio::task::spawn_blocking(move || materialize::materialize(&request, &scaffold));
    let result = match tokio::time::timeout(MATERIALIZE_TIMEOUT, task).await {
        Ok(result) => result,
        Err(_) => {
            return AppError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "materialization timed out".to_string(),
            )
            .into_response();
        }
    };

    match result {
        Ok(Ok(summary)) => Json(CreateProjectResponse {
            status: "created",
            project_name,
            root: summary.root,
            files_written: summary.files_written,
            files_rejected: summary.files_rejected,
        })
        .into_response(),
        Ok(Err(e @ MaterializeError::TargetNotDirectory)) => {
            AppError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Ok(Err(MaterializeError::Io(e))) => AppError(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to prepare project root: {}", e.kind()),
        )
        .into_response(),
        Err(e) => AppError(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Task error: {}", e),
        )
        .into_response(),
    }
}

async fn recent_projects(State(state): State<Arc<AppState>>) -> Response {
    match state.scaffold.recent_projects(20) {
        Ok(projects) => Json(json!({"projects": projects})).into_response(),
        Err(e) => {
            // Server-side paths stay in the log, not the response
            warn!("Failed to read project history: {}", e);
            AppError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "project history unavailable".to_string(),
            )
            .into_response()
        }
    }
}

#[derive(Deserialize)]
struct GenerateRequest {
    provider: Provider,
    #[serde(flatten)]
    generation: GenerationRequest,
}

async fn ai_generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    let provider = match create_provider(request.provider, &state.config, &state.keys) {
        Ok(provider) => provider,
        Err(e) => return provider_error_response(e),
    };

    match provider.generate(&request.generation).await {
        Ok(generated) => Json(generated).into_response(),
        Err(e) => provider_error_response(e),
    }
}

fn provider_error_response(error: ProviderError) -> Response {
    let status = match &error {
        ProviderError::InvalidCredentials(_) => StatusCode::BAD_REQUEST,
        ProviderError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::Unreachable(_) | ProviderError::Api { .. } => StatusCode::BAD_GATEWAY,
    };
    AppError(status, error.to_string()).into_response()
}

async fn list_keys(State(state): State<Arc<AppState>>) -> Response {
    match state.keys.statuses() {
        Ok(statuses) => {
            let providers: serde_json::Map<String, serde_json::Value> = statuses
                .into_iter()
                .map(|(name, configured)| (name, json!({"configured": configured})))
                .collect();
            Json(serde_json::Value::Object(providers)).into_response()
        }
        Err(e) => {
            warn!("Failed to read key store: {}", e);
            AppError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "key store unavailable".to_string(),
            )
            .into_response()
        }
    }
}

#[derive(Deserialize)]
struct KeyUpdateRequest {
    provider: Provider,
    api_key: String,
}

async fn update_key(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KeyUpdateRequest>,
) -> Response {
    match state.keys.update(request.provider, &request.api_key) {
        Ok(()) => Json(json!({
            "status": "success",
            "message": format!("{} API key updated", request.provider),
        }))
        .into_response(),
        Err(e) => {
            warn!("Failed to update key store: {}", e);
            AppError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to update API key".to_string(),
            )
            .into_response()
        }
    }
}
