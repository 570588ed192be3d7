//! SafeExec Gateway - HTTP front end for the execution coordinator.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use safeexec::config::Config;
use safeexec::sandbox::{BackendDescriptor, ExecutionLimits};
use safeexec::workspace::HistoryEntry;
use safeexec::{ExecutionCoordinator, ExecutionResult, VERSION};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// ---- CLI ----

#[derive(Parser)]
#[command(name = "safeexec-gateway", version = VERSION, about = "SafeExec HTTP gateway")]
struct Args {
    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides config)
    #[arg(long, short)]
    port: Option<u16>,
}

// ---- App State ----

#[derive(Clone)]
struct GatewayState {
    coordinator: Arc<ExecutionCoordinator>,
}

// ---- Error Handling ----

struct AppError(safeexec::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<safeexec::Error> for AppError {
    fn from(err: safeexec::Error) -> Self {
        AppError(err)
    }
}

// ---- Request / Response Types ----

#[derive(Debug, Deserialize)]
struct CodeBody {
    code: String,
    #[serde(flatten)]
    limits: ExecutionLimits,
}

#[derive(Debug, Deserialize)]
struct ShellBody {
    command: String,
    #[serde(flatten)]
    limits: ExecutionLimits,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    conversation_id: String,
    root: String,
    cwd: String,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// ---- Handlers ----

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: VERSION,
    })
}

async fn execute_code(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<CodeBody>,
) -> Json<ExecutionResult> {
    Json(
        state
            .coordinator
            .execute_code(&id, &body.code, Some(body.limits))
            .await,
    )
}

async fn execute_shell(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<ShellBody>,
) -> Json<ExecutionResult> {
    Json(
        state
            .coordinator
            .execute_shell(&id, &body.command, Some(body.limits))
            .await,
    )
}

async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let workspaces = state.coordinator.workspaces();
    let root = workspaces.root_path_of(&id).await?;
    let cwd = workspaces.cwd_of(&id).await?;
    let history = workspaces.history_of(&id).await?;

    Ok(Json(ConversationResponse {
        conversation_id: id,
        root: root.display().to_string(),
        cwd: format!("/{}", cwd.display()),
        history,
    }))
}

async fn list_backends(State(state): State<GatewayState>) -> Json<Vec<BackendDescriptor>> {
    Json(state.coordinator.selector().describe().await)
}

// ---- Router ----

fn build_router(state: GatewayState) -> Router {
    let api = Router::new()
        .route("/conversations/{id}", get(get_conversation))
        .route("/conversations/{id}/code", post(execute_code))
        .route("/conversations/{id}/shell", post(execute_shell))
        .route("/backends", get(list_backends));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// ---- Main ----

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    safeexec::logging::init_logging(&config.logging);

    let coordinator = ExecutionCoordinator::new(&config.sandbox)?;
    let state = GatewayState {
        coordinator: Arc::new(coordinator),
    };
    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.gateway.bind);
    let port = args.port.unwrap_or(config.gateway.port);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use safeexec::config::SandboxConfig;
    use tower::ServiceExt;

    fn test_router(base: &std::path::Path) -> Router {
        let config = SandboxConfig {
            preferred_backend_order: vec![],
            allow_direct_fallback: true,
            workspace_root_base_dir: base.to_path_buf(),
            default_timeout_secs: 10,
            ..Default::default()
        };
        build_router(GatewayState {
            coordinator: Arc::new(ExecutionCoordinator::new(&config).unwrap()),
        })
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(test_router(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_shell_then_conversation_state() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path());

        let (status, json) = send(
            router.clone(),
            post_json(
                "/v1/conversations/web1/shell",
                serde_json::json!({ "command": "mkdir app && cd app", "timeoutSeconds": 5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exitStatus"], "ok");
        assert_eq!(json["backendUsed"], "direct");

        let request = Request::builder()
            .uri("/v1/conversations/web1")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cwd"], "/app");
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_still_answer_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = send(
            test_router(dir.path()),
            post_json(
                "/v1/conversations/web2/shell",
                serde_json::json!({ "command": "cd ../../.." }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exitStatus"], "error");
        assert_eq!(json["errorKind"], "WorkspacePathViolation");
    }

    #[tokio::test]
    async fn test_backends_listing() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder().uri("/v1/backends").body(Body::empty()).unwrap();
        let (status, json) = send(test_router(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        let backends = json.as_array().unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0]["name"], "direct");
        assert_eq!(backends[0]["rank"], 0);
    }
}
