//! Route handlers for the plugin admin surface.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use estateguard_manifest::PluginKind;
use estateguard_plugins::{PluginError, PluginManager, PluginRecord};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PluginManager>,
}

/// Build the admin router. The trace middleware wraps every route.
pub fn router(manager: Arc<PluginManager>, cors_enabled: bool) -> Router {
    let state = AppState { manager };
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/plugins/register", post(register_plugin))
        .route("/api/v1/plugins", get(list_plugins))
        .route("/api/v1/plugins/:id", get(get_plugin))
        .route("/api/v1/plugins/:id/enable", put(enable_plugin))
        .route("/api/v1/plugins/:id/disable", put(disable_plugin))
        .route("/api/v1/plugins/:id/reload", post(reload_plugin))
        .route("/api/v1/plugins/:id", delete(unregister_plugin))
        .layer(axum::middleware::from_fn(crate::middleware::trace_context))
        .with_state(state);

    if cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Structured error body: stable kind code, human message, optional
/// details.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<PluginError> for ApiError {
    fn from(err: PluginError) -> Self {
        let status = match &err {
            PluginError::UnknownPlugin(_) => StatusCode::NOT_FOUND,
            PluginError::DuplicateId(_) | PluginError::InvalidState { .. } => StatusCode::CONFLICT,
            PluginError::Dependency(_) | PluginError::CoreVersionMismatch { .. } => {
                StatusCode::CONFLICT
            }
            PluginError::Manifest(_)
            | PluginError::MissingEntrypoint { .. }
            | PluginError::ConfigInvalid { .. }
            | PluginError::MissingConfigKey { .. }
            | PluginError::UnresolvedSecret { .. } => StatusCode::BAD_REQUEST,
            PluginError::ModuleNotFound { .. } | PluginError::ClassNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            PluginError::ConstructorFailed { .. }
            | PluginError::KindMismatch { .. }
            | PluginError::HookFailed { .. }
            | PluginError::LifecycleFailed { .. }
            | PluginError::ShutdownTimeout { .. }
            | PluginError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                error_kind: err.kind_code().to_string(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "plugins": state.manager.list(None).len(),
    }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    manifest_path: PathBuf,
}

async fn register_plugin(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<PluginRecord>, ApiError> {
    let plugin = state.manager.register_manifest(&request.manifest_path).await?;
    info!(plugin = plugin.id(), "plugin registered via API");
    Ok(Json(plugin.snapshot()))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    kind: Option<String>,
    state: Option<String>,
}

async fn list_plugins(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PluginRecord>>, ApiError> {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(raw) => Some(parse_kind(raw)?),
    };
    let records: Vec<PluginRecord> = state
        .manager
        .list(kind)
        .iter()
        .map(|p| p.snapshot())
        .filter(|record| match query.state.as_deref() {
            None => true,
            Some(wanted) => record.state.to_string() == wanted,
        })
        .collect();
    Ok(Json(records))
}

async fn get_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    let plugin = state
        .manager
        .get(&id)
        .ok_or(PluginError::UnknownPlugin(id))?;
    Ok(Json(plugin.snapshot()))
}

async fn enable_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    state.manager.enable(&id).await?;
    let plugin = state
        .manager
        .get(&id)
        .ok_or_else(|| PluginError::UnknownPlugin(id.clone()))?;
    Ok(Json(plugin.snapshot()))
}

async fn disable_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    state.manager.disable(&id).await?;
    let plugin = state
        .manager
        .get(&id)
        .ok_or_else(|| PluginError::UnknownPlugin(id.clone()))?;
    Ok(Json(plugin.snapshot()))
}

async fn reload_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    let plugin = state.manager.reload(&id).await?;
    Ok(Json(plugin.snapshot()))
}

async fn unregister_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    let plugin = state
        .manager
        .get(&id)
        .ok_or_else(|| PluginError::UnknownPlugin(id.clone()))?;
    let record = plugin.snapshot();
    state.manager.unregister(&id).await?;
    Ok(Json(record))
}

fn parse_kind(raw: &str) -> Result<PluginKind, ApiError> {
    match raw {
        "source" => Ok(PluginKind::Source),
        "processing" => Ok(PluginKind::Processing),
        "detection" => Ok(PluginKind::Detection),
        "search" => Ok(PluginKind::Search),
        "display" => Ok(PluginKind::Display),
        other => Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error_kind: "invalid_kind".to_string(),
                message: format!("`{other}` is not a plugin kind"),
                details: None,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use estateguard_manifest::Version;
    use estateguard_plugins::{EntrypointRegistry, PluginManagerConfig};
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    const NORMALIZER: &str = r#"
id: plugin-processing-normalizer
name: Normalizer
version: 1.0.0
kind: processing
api_version: "1.0"
description: maps raw scrapes into the canonical model
entrypoint:
  module: estateguard.builtin
  class: ListingNormalizer
"#;

    async fn app_with_plugin() -> (Router, Arc<PluginManager>, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("normalizer");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plugin.yaml"), NORMALIZER).unwrap();

        let manager = Arc::new(
            PluginManager::new(
                PluginManagerConfig {
                    root_dir: root.path().to_path_buf(),
                    core_version: Version::new(0, 1, 0),
                    shutdown_deadline: Duration::from_millis(500),
                    hook_timeout: Duration::from_secs(2),
                },
                EntrypointRegistry::with_builtins(),
            )
            .with_env(HashMap::new()),
        );
        manager.load_all().await;
        (router(Arc::clone(&manager), false), manager, root)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_and_detail() {
        let (app, _manager, _root) = app_with_plugin().await;
        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/plugins").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Trace headers are echoed on every response.
        assert!(response.headers().contains_key("x-trace-id"));
        assert!(response.headers().contains_key("x-request-id"));
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let response = app
            .oneshot(
                Request::get("/api/v1/plugins/plugin-processing-normalizer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert_eq!(detail["id"], "plugin-processing-normalizer");
        assert_eq!(detail["state"], "configured");
    }

    #[tokio::test]
    async fn enable_then_disable() {
        let (app, _manager, _root) = app_with_plugin().await;
        let response = app
            .clone()
            .oneshot(
                Request::put("/api/v1/plugins/plugin-processing-normalizer/enable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["state"], "enabled");

        let response = app
            .oneshot(
                Request::put("/api/v1/plugins/plugin-processing-normalizer/disable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["state"], "disabled");
    }

    #[tokio::test]
    async fn unknown_plugin_is_a_structured_404() {
        let (app, _manager, _root) = app_with_plugin().await;
        let response = app
            .oneshot(
                Request::get("/api/v1/plugins/plugin-processing-ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error = body_json(response).await;
        assert_eq!(error["error_kind"], "unknown_plugin");
        assert!(error["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn incoming_trace_id_is_preserved() {
        let (app, _manager, _root) = app_with_plugin().await;
        let trace = "0123456789abcdef0123456789abcdef";
        let response = app
            .oneshot(
                Request::get("/api/v1/plugins")
                    .header("x-trace-id", trace)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-trace-id").unwrap().to_str().unwrap(),
            trace
        );
        // A fresh request id is always generated.
        let request_id = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap();
        assert_ne!(request_id, trace);
        assert_eq!(request_id.len(), 32);
    }

    #[tokio::test]
    async fn unregister_returns_the_final_record() {
        let (app, manager, _root) = app_with_plugin().await;
        let response = app
            .oneshot(
                Request::delete("/api/v1/plugins/plugin-processing-normalizer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(manager.get("plugin-processing-normalizer").is_none());
    }
}
