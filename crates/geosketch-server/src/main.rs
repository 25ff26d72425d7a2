//! GeoSketch File Server
//!
//! A small storage service for serialized drawings and measurements.
//!
//! ## API
//!
//! ```text
//! POST /files             { "content": "<kml .../>", "format": "kml" }  -> { "adminId", "fileId" }
//! POST /files/{adminId}   { "content": "<kml .../>", "format": "kml" }  -> { "adminId", "fileId" }
//! GET  /files/{fileId}    -> raw content
//! GET  /health            -> "ok"
//! ```
//!
//! The admin id grants write access to a file; the file id only reads it.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

/// Default listen address
const DEFAULT_ADDR: &str = "0.0.0.0:3031";
const ADMIN_ID_PREFIX: &str = "a_";
const FILE_ID_PREFIX: &str = "f_";
const DEFAULT_FORMAT: &str = "kml";

/// Body of a save request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub content: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// Ids of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub admin_id: String,
    pub file_id: String,
}

/// A stored file
struct StoredFile {
    content: String,
    format: String,
}

/// Shared application state
struct AppState {
    /// admin id -> file id
    admins: DashMap<String, String>,
    /// file id -> file
    files: DashMap<String, StoredFile>,
}

impl AppState {
    fn new() -> Self {
        Self {
            admins: DashMap::new(),
            files: DashMap::new(),
        }
    }

    /// Store content under fresh ids
    fn create(&self, request: SaveRequest) -> SaveResponse {
        let admin_id = format!("{ADMIN_ID_PREFIX}{}", Uuid::new_v4().simple());
        let file_id = format!("{FILE_ID_PREFIX}{}", Uuid::new_v4().simple());
        self.files.insert(
            file_id.clone(),
            StoredFile {
                content: request.content,
                format: request.format,
            },
        );
        self.admins.insert(admin_id.clone(), file_id.clone());
        SaveResponse { admin_id, file_id }
    }

    /// Replace the content behind an admin id
    fn update(&self, admin_id: &str, request: SaveRequest) -> Option<SaveResponse> {
        let file_id = self.admins.get(admin_id)?.clone();
        self.files.insert(
            file_id.clone(),
            StoredFile {
                content: request.content,
                format: request.format,
            },
        );
        Some(SaveResponse {
            admin_id: admin_id.to_string(),
            file_id,
        })
    }

    fn load(&self, file_id: &str) -> Option<(String, String)> {
        self.files
            .get(file_id)
            .map(|file| (file.content.clone(), file.format.clone()))
    }
}

/// Content type of a transfer format
fn mime_type(format: &str) -> &'static str {
    match format {
        "kml" => "application/vnd.google-earth.kml+xml",
        "geojson" | "json" => "application/json",
        _ => "text/plain; charset=utf-8",
    }
}

fn listen_addr() -> SocketAddr {
    let configured = std::env::var("GEOSKETCH_ADDR").ok();
    if let Some(addr) = configured.as_deref().and_then(|value| value.parse().ok()) {
        return addr;
    }
    if let Some(value) = configured {
        warn!("Invalid GEOSKETCH_ADDR {:?}, using {}", value, DEFAULT_ADDR);
    }
    DEFAULT_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3031)))
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/files", post(create_file))
        .route("/files/{id}", post(update_file).get(get_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geosketch_server=info,tower_http=info".into()),
        )
        .init();

    let state = Arc::new(AppState::new());
    let addr = listen_addr();
    info!("GeoSketch file server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await
}

/// Index page
async fn index() -> &'static str {
    "GeoSketch File Server - POST /files to store a drawing"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// Create a new file
async fn create_file(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveRequest>,
) -> Json<SaveResponse> {
    let response = state.create(request);
    info!("Created file {}", response.file_id);
    Json(response)
}

/// Update the file behind an admin id
async fn update_file(
    State(state): State<Arc<AppState>>,
    Path(admin_id): Path<String>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, StatusCode> {
    match state.update(&admin_id, request) {
        Some(response) => {
            info!("Updated file {}", response.file_id);
            Ok(Json(response))
        }
        None => {
            warn!("Update for unknown admin id {}", admin_id);
            Err(StatusCode::NOT_FOUND)
        }
    }
}

/// Read a file
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let (content, format) = state.load(&file_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, mime_type(&format))], content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str) -> SaveRequest {
        SaveRequest {
            content: content.to_string(),
            format: DEFAULT_FORMAT.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let state = Arc::new(AppState::new());
        let Json(created) = create_file(State(state.clone()), Json(request("<kml/>"))).await;
        assert!(created.admin_id.starts_with(ADMIN_ID_PREFIX));
        assert!(created.file_id.starts_with(FILE_ID_PREFIX));
        assert_eq!(state.load(&created.file_id), Some(("<kml/>".to_string(), "kml".to_string())));

        assert!(get_file(State(state), Path(created.file_id)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_keeps_ids() {
        let state = Arc::new(AppState::new());
        let Json(created) = create_file(State(state.clone()), Json(request("one"))).await;
        let Json(updated) = update_file(
            State(state.clone()),
            Path(created.admin_id.clone()),
            Json(request("two")),
        )
        .await
        .unwrap();
        assert_eq!(created, updated);
        assert_eq!(state.load(&created.file_id).map(|(content, _)| content), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let state = Arc::new(AppState::new());
        let result = update_file(State(state.clone()), Path("a_missing".to_string()), Json(request("x"))).await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            get_file(State(state.clone()), Path("f_missing".to_string())).await.err(),
            Some(StatusCode::NOT_FOUND)
        );
        // A file id does not grant write access.
        let Json(created) = create_file(State(state.clone()), Json(request("x"))).await;
        let result = update_file(State(state), Path(created.file_id), Json(request("y"))).await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_request_format_defaults_to_kml() {
        let request: SaveRequest = serde_json::from_str(r#"{"content":"<kml/>"}"#).unwrap();
        assert_eq!(request.format, "kml");
        let response = serde_json::to_string(&SaveResponse {
            admin_id: "a_1".to_string(),
            file_id: "f_1".to_string(),
        })
        .unwrap();
        assert_eq!(response, r#"{"adminId":"a_1","fileId":"f_1"}"#);
    }

    #[test]
    fn test_router_builds() {
        let _router = app(Arc::new(AppState::new()));
        assert_eq!(mime_type("kml"), "application/vnd.google-earth.kml+xml");
    }
}
